//! Common types, errors and traits shared across the ledger

pub mod errors;
pub mod retry;
pub mod traits;
pub mod types;
