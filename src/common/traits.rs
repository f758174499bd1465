//! Trait definitions for ledger storage backends

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::errors::Result;
use super::types::{AuditEntry, Pot, WithdrawalRecord};

/// Signed change to one pot's balance
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceUpdate {
    pub pot: String,
    pub delta: Decimal,
    /// Balance the ledger expects once the delta is applied
    pub resulting_balance: Decimal,
}

/// Everything one accepted mutation writes
///
/// Backends apply a commit as a single atomic unit: either every balance
/// change, percentage change, audit entry and withdrawal record persists,
/// or none of them do.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerCommit {
    pub balance_updates: Vec<BalanceUpdate>,
    pub percentage_updates: Vec<(String, Decimal)>,
    pub entry: AuditEntry,
    pub withdrawal: Option<WithdrawalRecord>,
}

impl LedgerCommit {
    pub fn new(entry: AuditEntry) -> Self {
        Self {
            balance_updates: Vec::new(),
            percentage_updates: Vec::new(),
            entry,
            withdrawal: None,
        }
    }
}

/// Durable backing store for pots and the audit log
///
/// The ledger keeps a live copy of the registry in memory and only applies a
/// mutation to it after `commit` succeeds. Implementations must never apply
/// part of a commit.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Load pots in creation order (empty before setup)
    async fn load_pots(&self) -> Result<Vec<Pot>>;

    /// Create the initial pot set; only valid on an empty store
    async fn initialize_pots(&self, pots: &[Pot]) -> Result<()>;

    /// Load every audit entry in sequence order
    async fn load_entries(&self) -> Result<Vec<AuditEntry>>;

    /// Load every withdrawal record in sequence order
    async fn load_withdrawals(&self) -> Result<Vec<WithdrawalRecord>>;

    /// Atomically persist one mutation
    async fn commit(&self, commit: &LedgerCommit) -> Result<()>;

    /// Short backend name for logs
    fn backend_name(&self) -> &'static str;
}
