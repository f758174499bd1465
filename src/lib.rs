//! Pot Ledger Library
//!
//! Splits incoming wagered amounts across a fixed set of percentage-weighted
//! pots, moves money between pots, records withdrawals, and keeps an
//! append-only audit log that reconciles to the live balances.

pub mod common;
pub mod config;
pub mod ledger;
pub mod storage;

// Re-export commonly used types
pub use common::errors::{LedgerError, Result};
pub use common::retry::RetryPolicy;
pub use common::traits::{BalanceUpdate, LedgerCommit, LedgerStore};
pub use common::types::{
    AllocationResult, AuditEntry, AuditKind, AuditLeg, BalanceDiscrepancy, LedgerTotals, Pot,
    PotCredit, ReconciliationReport, TransferResult, WithdrawalRecord, WithdrawalRequest,
    WithdrawalResult,
};
pub use config::types::{LedgerConfig, PotSeed};
pub use ledger::Ledger;
pub use storage::{MemoryStore, PostgresStore};
