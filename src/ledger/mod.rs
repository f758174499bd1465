//! Pot allocation ledger
//!
//! Splits every deposit across a fixed set of percentage-weighted pots,
//! moves money between pots, and lets it leave through withdrawals, while
//! keeping `sum(balance) == deposits - withdrawals` at all times.
//!
//! # Architecture
//!
//! ```text
//! bet intake ──allocate──┐
//!                        ▼
//! operators ──transfer──► Ledger ── RwLock<LedgerState> ── registry + audit mirror
//!           ──withdraw──┘    │
//!                            ▼
//!                      LedgerStore::commit  (one atomic unit per mutation)
//! ```
//!
//! Every mutation takes the single write lock, validates against the live
//! registry, builds a [`LedgerCommit`], and hands it to the store. The live
//! state only changes after the store reports success, so a failed commit
//! leaves balances and the audit log untouched. The store is fail-closed:
//! nothing is queued when it is unavailable.
//!
//! # Components
//!
//! - [`registry`]: ordered pots and the sum-to-100 invariant
//! - [`allocation`]: deposit split with deterministic rounding residual
//! - [`transfer`]: pot-to-pot movement
//! - [`withdrawal`]: debits with idempotency keys
//! - [`audit`]: append-only log mirror and balance replay

pub mod allocation;
pub mod audit;
pub mod registry;
pub mod transfer;
pub mod withdrawal;

use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use self::audit::{replay_balances, replay_flows, AuditLog};
use self::registry::PotRegistry;
use self::withdrawal::WithdrawalPlan;
use crate::common::errors::{LedgerError, Result};
use crate::common::traits::{LedgerCommit, LedgerStore};
use crate::common::types::{
    validate_amount, AllocationResult, AuditEntry, AuditKind, AuditLeg, BalanceDiscrepancy,
    LedgerTotals, Pot, ReconciliationReport, TransferResult, WithdrawalRecord,
    WithdrawalRequest, WithdrawalResult,
};
use crate::config::types::{LedgerSettings, PotSeed};

/// Label recorded as the reference of reconfiguration entries
const RECONFIGURATION_REFERENCE: &str = "set-percentages";

/// Everything guarded by the ledger lock
#[derive(Debug)]
struct LedgerState {
    registry: PotRegistry,
    audit: AuditLog,
    withdrawals_by_key: HashMap<String, WithdrawalRecord>,
}

impl LedgerState {
    fn apply(&mut self, commit: LedgerCommit) -> Result<()> {
        for update in &commit.balance_updates {
            self.registry.apply_delta(&update.pot, update.delta)?;
        }
        if !commit.percentage_updates.is_empty() {
            self.registry.apply_percentages(&commit.percentage_updates);
        }
        if let Some(record) = commit.withdrawal {
            if let Some(key) = record.idempotency_key.clone() {
                self.withdrawals_by_key.insert(key, record);
            }
        }
        self.audit.append(commit.entry)
    }
}

/// The ledger core
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    state: RwLock<LedgerState>,
}

impl Ledger {
    /// Open a ledger over `store`
    ///
    /// On an empty store the pots are created from `seed`; otherwise the
    /// persisted pots, audit log and withdrawal records are loaded and the
    /// seed is ignored.
    #[instrument(skip(store, seed, settings), fields(backend = store.backend_name()))]
    pub async fn open(
        store: Arc<dyn LedgerStore>,
        seed: &[PotSeed],
        settings: &LedgerSettings,
    ) -> Result<Self> {
        let state = Self::load_state(store.as_ref(), seed, settings.percentage_epsilon).await?;
        info!(
            pots = state.registry.len(),
            entries = state.audit.len(),
            "Ledger opened"
        );
        Ok(Self {
            store,
            state: RwLock::new(state),
        })
    }

    async fn load_state(
        store: &dyn LedgerStore,
        seed: &[PotSeed],
        epsilon: Decimal,
    ) -> Result<LedgerState> {
        let mut pots = store.load_pots().await?;
        if pots.is_empty() {
            let fresh: Vec<Pot> = seed
                .iter()
                .enumerate()
                .map(|(i, s)| Pot::new(s.name.clone(), s.percentage, i as u32))
                .collect();
            // Validate before touching the store
            PotRegistry::new(fresh.clone(), epsilon)?;
            store.initialize_pots(&fresh).await?;
            info!(pots = fresh.len(), "Initialized pots from seed");
            pots = fresh;
        }

        let registry = PotRegistry::new(pots, epsilon)?;
        let audit = AuditLog::from_entries(store.load_entries().await?)?;
        let withdrawals_by_key = store
            .load_withdrawals()
            .await?
            .into_iter()
            .filter_map(|r| r.idempotency_key.clone().map(|k| (k, r)))
            .collect();

        Ok(LedgerState {
            registry,
            audit,
            withdrawals_by_key,
        })
    }

    /// Persist a commit, then apply it to the live state
    async fn commit(&self, state: &mut LedgerState, commit: LedgerCommit) -> Result<()> {
        let sequence = commit.entry.sequence;
        let kind = commit.entry.kind;
        if let Err(err) = self.store.commit(&commit).await {
            error!(sequence, %kind, "Commit rejected by store: {}", err);
            self.resync(state).await;
            return Err(err);
        }
        state.apply(commit)?;
        debug!(sequence, %kind, "Committed");
        Ok(())
    }

    /// Reload live state after a failed commit in case another writer moved
    /// the store ahead of us. Keeps the current state if the store is down.
    async fn resync(&self, state: &mut LedgerState) {
        let pots = match self.store.load_pots().await {
            Ok(pots) => pots,
            Err(err) => {
                debug!("Skipping resync: {}", err);
                return;
            }
        };
        let entries = match self.store.load_entries().await {
            Ok(entries) => entries,
            Err(err) => {
                debug!("Skipping resync: {}", err);
                return;
            }
        };
        if entries.len() == state.audit.len() {
            return;
        }
        match AuditLog::from_entries(entries) {
            Ok(audit) => {
                warn!(
                    local = state.audit.len(),
                    stored = audit.len(),
                    "Store moved ahead of live state, reloading"
                );
                state.registry.replace_pots(pots);
                state.audit = audit;
                if let Ok(records) = self.store.load_withdrawals().await {
                    state.withdrawals_by_key = records
                        .into_iter()
                        .filter_map(|r| r.idempotency_key.clone().map(|k| (k, r)))
                        .collect();
                }
            }
            Err(err) => warn!("Resync failed: {}", err),
        }
    }

    // ========================================================================
    // Pot Registry
    // ========================================================================

    /// All pots in creation order
    pub async fn list_pots(&self) -> Vec<Pot> {
        self.state.read().await.registry.list().to_vec()
    }

    /// Look up one pot
    pub async fn get_pot(&self, name: &str) -> Result<Pot> {
        self.state.read().await.registry.get(name).cloned()
    }

    /// Atomically replace every pot's percentage
    ///
    /// The mapping must name every pot exactly once and sum to 100 within
    /// the configured epsilon. On failure the previous configuration stays.
    #[instrument(skip(self, mapping))]
    pub async fn set_percentages(&self, mapping: &HashMap<String, Decimal>) -> Result<Vec<Pot>> {
        let mut state = self.state.write().await;
        let updates = state.registry.plan_percentages(mapping).map_err(|e| {
            warn!("Rejected percentage change: {}", e);
            e
        })?;

        let legs = updates
            .iter()
            .map(|(name, percentage)| {
                let balance = state
                    .registry
                    .get(name)
                    .map(|p| p.balance)
                    .unwrap_or(Decimal::ZERO);
                AuditLeg {
                    pot: name.clone(),
                    delta: Decimal::ZERO,
                    resulting_balance: balance,
                    percentage: Some(*percentage),
                }
            })
            .collect();

        let entry = AuditEntry {
            sequence: state.audit.next_sequence(),
            kind: AuditKind::Reconfiguration,
            legs,
            reference: RECONFIGURATION_REFERENCE.to_string(),
            actor: None,
            withdrawal_id: None,
            recorded_at: Utc::now(),
        };
        let mut commit = LedgerCommit::new(entry);
        commit.percentage_updates = updates;

        self.commit(&mut state, commit).await?;
        info!("Pot percentages updated");
        Ok(state.registry.list().to_vec())
    }

    // ========================================================================
    // Allocation Engine
    // ========================================================================

    /// Split a deposit across all pots
    #[instrument(skip(self))]
    pub async fn allocate(&self, amount: Decimal, source_reference: &str) -> Result<AllocationResult> {
        let amount = validate_amount(amount).map_err(|e| {
            warn!("Rejected allocation: {}", e);
            e
        })?;

        let mut state = self.state.write().await;
        state.registry.ensure_balanced()?;

        let sequence = state.audit.next_sequence();
        let (commit, result) = allocation::build_allocation(
            &state.registry,
            amount,
            source_reference,
            sequence,
            Utc::now(),
        )?;

        self.commit(&mut state, commit).await?;
        info!(sequence, %amount, source_reference, "Deposit allocated");
        Ok(result)
    }

    // ========================================================================
    // Transfer Engine
    // ========================================================================

    /// Move `amount` from one pot to another
    #[instrument(skip(self))]
    pub async fn transfer(
        &self,
        from: &str,
        to: &str,
        amount: Decimal,
        actor: &str,
    ) -> Result<TransferResult> {
        let amount = validate_amount(amount).map_err(|e| {
            warn!("Rejected transfer: {}", e);
            e
        })?;

        let mut state = self.state.write().await;
        let sequence = state.audit.next_sequence();
        let (commit, result) =
            transfer::build_transfer(&state.registry, from, to, amount, actor, sequence, Utc::now())
                .map_err(|e| {
                    warn!("Rejected transfer: {}", e);
                    e
                })?;

        self.commit(&mut state, commit).await?;
        info!(sequence, from, to, %amount, actor, "Transfer applied");
        Ok(result)
    }

    // ========================================================================
    // Withdrawal Engine
    // ========================================================================

    /// Withdraw without an idempotency key
    pub async fn withdraw(&self, from: &str, amount: Decimal, actor: &str) -> Result<WithdrawalResult> {
        self.submit_withdrawal(WithdrawalRequest::new(from, amount, actor))
            .await
    }

    /// Withdraw, deduplicating on the request's idempotency key if present
    #[instrument(skip(self), fields(pot = %request.pot, amount = %request.amount))]
    pub async fn submit_withdrawal(&self, mut request: WithdrawalRequest) -> Result<WithdrawalResult> {
        request.amount = validate_amount(request.amount).map_err(|e| {
            warn!("Rejected withdrawal: {}", e);
            e
        })?;

        let mut state = self.state.write().await;
        let sequence = state.audit.next_sequence();
        let plan = withdrawal::plan_withdrawal(
            &state.registry,
            &state.withdrawals_by_key,
            &request,
            sequence,
            Utc::now(),
        )
        .map_err(|e| {
            warn!("Rejected withdrawal: {}", e);
            e
        })?;

        match plan {
            WithdrawalPlan::Replay(result) => {
                info!(withdrawal_id = %result.withdrawal_id, "Withdrawal replayed");
                Ok(result)
            }
            WithdrawalPlan::Execute(commit, result) => {
                self.commit(&mut state, commit).await?;
                info!(
                    sequence,
                    withdrawal_id = %result.withdrawal_id,
                    actor = %request.actor,
                    "Withdrawal applied"
                );
                Ok(result)
            }
        }
    }

    // ========================================================================
    // Ledger Audit Log
    // ========================================================================

    /// Every audit entry in sequence order
    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.state.read().await.audit.entries().to_vec()
    }

    /// Audit entries after `sequence`
    pub async fn entries_since(&self, sequence: u64) -> Vec<AuditEntry> {
        self.state.read().await.audit.since(sequence).to_vec()
    }

    /// Deposited, withdrawn and currently held totals
    pub async fn totals(&self) -> LedgerTotals {
        let state = self.state.read().await;
        state.audit.totals(state.registry.total_balance())
    }

    /// Replay the durable audit log from the beginning
    #[instrument(skip(self))]
    pub async fn reconstruct_balances(&self) -> Result<BTreeMap<String, Decimal>> {
        let state = self.state.read().await;
        let entries = self.store.load_entries().await?;
        let names = state.registry.list().iter().map(|p| p.name.as_str());
        Ok(replay_balances(&entries, names))
    }

    /// Compare the replayed audit log with live balances
    ///
    /// Holds the read lock for the whole check so no mutation lands between
    /// reading the log and reading the balances.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<ReconciliationReport> {
        let state = self.state.read().await;
        let entries = self.store.load_entries().await?;

        let names = state.registry.list().iter().map(|p| p.name.as_str());
        let replayed = replay_balances(&entries, names);
        let live: BTreeMap<String, Decimal> = state
            .registry
            .list()
            .iter()
            .map(|p| (p.name.clone(), p.balance))
            .collect();

        let mut discrepancies: Vec<BalanceDiscrepancy> = live
            .iter()
            .filter_map(|(pot, balance)| {
                let replayed_balance = replayed.get(pot).copied().unwrap_or(Decimal::ZERO);
                (replayed_balance != *balance).then(|| BalanceDiscrepancy {
                    pot: pot.clone(),
                    live: *balance,
                    replayed: replayed_balance,
                })
            })
            .collect();
        discrepancies.extend(
            replayed
                .iter()
                .filter(|(pot, _)| !live.contains_key(*pot))
                .map(|(pot, balance)| BalanceDiscrepancy {
                    pot: pot.clone(),
                    live: Decimal::ZERO,
                    replayed: *balance,
                }),
        );

        let (deposited, withdrawn) = replay_flows(&entries);
        let report = ReconciliationReport {
            live,
            replayed,
            totals: LedgerTotals {
                deposited,
                withdrawn,
                held: state.registry.total_balance(),
            },
            discrepancies,
            checked_at: Utc::now(),
        };

        if report.is_consistent() {
            info!(entries = entries.len(), "Reconciliation passed");
        } else {
            error!(
                discrepancies = report.discrepancies.len(),
                "Reconciliation failed"
            );
        }
        Ok(report)
    }
}
