//! Withdrawal engine: remove funds from a pot with an idempotent record

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use super::registry::PotRegistry;
use crate::common::errors::{LedgerError, Result};
use crate::common::traits::{BalanceUpdate, LedgerCommit};
use crate::common::types::{
    AuditEntry, AuditKind, AuditLeg, WithdrawalRecord, WithdrawalRequest, WithdrawalResult,
};

/// What the ledger should do with a withdrawal request
#[derive(Debug)]
pub(crate) enum WithdrawalPlan {
    /// The idempotency key was already used for this exact request
    Replay(WithdrawalResult),
    /// A new withdrawal to commit
    Execute(LedgerCommit, WithdrawalResult),
}

fn generate_withdrawal_id() -> String {
    format!("wd_{}", Uuid::new_v4().simple())
}

impl From<&WithdrawalRecord> for WithdrawalResult {
    fn from(record: &WithdrawalRecord) -> Self {
        Self {
            sequence: record.sequence,
            withdrawal_id: record.withdrawal_id.clone(),
            remaining_balance: record.remaining_balance,
            replayed: true,
        }
    }
}

/// Plan a withdrawal against the live registry
///
/// `request.amount` must already be validated. `by_key` holds earlier
/// withdrawals indexed by idempotency key.
pub(crate) fn plan_withdrawal(
    registry: &PotRegistry,
    by_key: &HashMap<String, WithdrawalRecord>,
    request: &WithdrawalRequest,
    sequence: u64,
    recorded_at: DateTime<Utc>,
) -> Result<WithdrawalPlan> {
    if let Some(key) = &request.idempotency_key {
        if let Some(previous) = by_key.get(key) {
            if previous.pot == request.pot && previous.amount == request.amount {
                return Ok(WithdrawalPlan::Replay(WithdrawalResult::from(previous)));
            }
            return Err(LedgerError::IdempotencyConflict { key: key.clone() });
        }
    }

    let pot = registry.get(&request.pot)?;
    if pot.balance < request.amount {
        return Err(LedgerError::InsufficientFunds {
            pot: pot.name.clone(),
            balance: pot.balance,
            requested: request.amount,
        });
    }

    let remaining_balance = pot.balance - request.amount;
    let withdrawal_id = generate_withdrawal_id();

    let entry = AuditEntry {
        sequence,
        kind: AuditKind::Withdrawal,
        legs: vec![AuditLeg::balance_change(
            &pot.name,
            -request.amount,
            remaining_balance,
        )],
        reference: request
            .idempotency_key
            .clone()
            .unwrap_or_else(|| withdrawal_id.clone()),
        actor: Some(request.actor.clone()),
        withdrawal_id: Some(withdrawal_id.clone()),
        recorded_at,
    };

    let record = WithdrawalRecord {
        withdrawal_id: withdrawal_id.clone(),
        idempotency_key: request.idempotency_key.clone(),
        pot: pot.name.clone(),
        amount: request.amount,
        actor: request.actor.clone(),
        remaining_balance,
        sequence,
        recorded_at,
    };

    let mut commit = LedgerCommit::new(entry);
    commit.balance_updates = vec![BalanceUpdate {
        pot: pot.name.clone(),
        delta: -request.amount,
        resulting_balance: remaining_balance,
    }];
    commit.withdrawal = Some(record);

    Ok(WithdrawalPlan::Execute(
        commit,
        WithdrawalResult {
            sequence,
            withdrawal_id,
            remaining_balance,
            replayed: false,
        },
    ))
}
