//! In-process store for tests and dry runs

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

use crate::common::errors::{LedgerError, Result};
use crate::common::traits::{LedgerCommit, LedgerStore};
use crate::common::types::{checked_balance, AuditEntry, Pot, WithdrawalRecord};

#[derive(Debug, Default)]
struct MemoryState {
    pots: Vec<Pot>,
    entries: Vec<AuditEntry>,
    withdrawals: Vec<WithdrawalRecord>,
}

/// Non-durable `LedgerStore`
///
/// Applies commits under one mutex with the same guards as the PostgreSQL
/// backend. Unavailability can be simulated to exercise rollback paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    unavailable: AtomicBool,
    failing_commits: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `StorageUnavailable` until re-enabled
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Fail the next `count` commits with `StorageUnavailable`
    pub fn fail_next_commits(&self, count: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::StorageUnavailable(
                "memory store offline".to_string(),
            ));
        }
        Ok(())
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn load_pots(&self) -> Result<Vec<Pot>> {
        self.check_available()?;
        Ok(self.state.lock().await.pots.clone())
    }

    async fn initialize_pots(&self, pots: &[Pot]) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        if !state.pots.is_empty() {
            return Err(LedgerError::InvalidConfiguration(
                "pots already initialized".to_string(),
            ));
        }
        state.pots = pots.to_vec();
        Ok(())
    }

    async fn load_entries(&self) -> Result<Vec<AuditEntry>> {
        self.check_available()?;
        Ok(self.state.lock().await.entries.clone())
    }

    async fn load_withdrawals(&self) -> Result<Vec<WithdrawalRecord>> {
        self.check_available()?;
        Ok(self.state.lock().await.withdrawals.clone())
    }

    async fn commit(&self, commit: &LedgerCommit) -> Result<()> {
        self.check_available()?;
        if self.take_injected_failure() {
            return Err(LedgerError::StorageUnavailable(
                "injected commit failure".to_string(),
            ));
        }

        let mut state = self.state.lock().await;

        let expected = state.entries.last().map(|e| e.sequence + 1).unwrap_or(1);
        if commit.entry.sequence != expected {
            return Err(LedgerError::StorageUnavailable(format!(
                "sequence conflict: expected {}, got {}",
                expected, commit.entry.sequence
            )));
        }

        // Stage on a copy; the store only changes once every guard passes
        let mut pots = state.pots.clone();
        for update in &commit.balance_updates {
            let pot = pots
                .iter_mut()
                .find(|p| p.name == update.pot)
                .ok_or_else(|| LedgerError::NotFound(update.pot.clone()))?;
            let next = checked_balance(&pot.name, pot.balance, update.delta)?;
            if next < Decimal::ZERO {
                return Err(LedgerError::InsufficientFunds {
                    pot: pot.name.clone(),
                    balance: pot.balance,
                    requested: -update.delta,
                });
            }
            pot.balance = next;
        }
        for (name, percentage) in &commit.percentage_updates {
            let pot = pots
                .iter_mut()
                .find(|p| &p.name == name)
                .ok_or_else(|| LedgerError::NotFound(name.clone()))?;
            pot.percentage = *percentage;
        }

        state.pots = pots;
        state.entries.push(commit.entry.clone());
        if let Some(record) = &commit.withdrawal {
            state.withdrawals.push(record.clone());
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
