//! Transfer engine: move funds between two pots

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::registry::PotRegistry;
use crate::common::errors::{LedgerError, Result};
use crate::common::traits::{BalanceUpdate, LedgerCommit};
use crate::common::types::{checked_balance, AuditEntry, AuditKind, AuditLeg, TransferResult};

/// Validate a transfer against the live registry and build its commit
///
/// Must be called with the registry lock held so the balance check and the
/// mutation see the same state.
pub(crate) fn build_transfer(
    registry: &PotRegistry,
    from: &str,
    to: &str,
    amount: Decimal,
    actor: &str,
    sequence: u64,
    recorded_at: DateTime<Utc>,
) -> Result<(LedgerCommit, TransferResult)> {
    let source = registry.get(from)?;
    let destination = registry.get(to)?;

    if from == to {
        return Err(LedgerError::SamePot(from.to_string()));
    }

    if source.balance < amount {
        return Err(LedgerError::InsufficientFunds {
            pot: source.name.clone(),
            balance: source.balance,
            requested: amount,
        });
    }

    let from_balance = source.balance - amount;
    let to_balance = checked_balance(&destination.name, destination.balance, amount)?;

    let entry = AuditEntry {
        sequence,
        kind: AuditKind::Transfer,
        legs: vec![
            AuditLeg::balance_change(from, -amount, from_balance),
            AuditLeg::balance_change(to, amount, to_balance),
        ],
        reference: format!("transfer:{}->{}", from, to),
        actor: Some(actor.to_string()),
        withdrawal_id: None,
        recorded_at,
    };

    let mut commit = LedgerCommit::new(entry);
    commit.balance_updates = vec![
        BalanceUpdate {
            pot: from.to_string(),
            delta: -amount,
            resulting_balance: from_balance,
        },
        BalanceUpdate {
            pot: to.to_string(),
            delta: amount,
            resulting_balance: to_balance,
        },
    ];

    Ok((
        commit,
        TransferResult {
            sequence,
            from_balance,
            to_balance,
        },
    ))
}
