//! Allocation engine: split a deposit across pots by percentage
//!
//! Each pot is credited `round(amount * percentage / 100, 2)`. The rounding
//! residual (positive or negative, a few cents at most) goes to the pot with
//! the largest percentage, ties broken by creation order, so the credits
//! always sum to the deposit exactly. A negative residual that would push
//! that pot's credit below zero spills cent by cent to the next pots in the
//! same priority order.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};

use super::registry::PotRegistry;
use crate::common::errors::{LedgerError, Result};
use crate::common::traits::{BalanceUpdate, LedgerCommit};
use crate::common::types::{
    checked_balance, AllocationResult, AuditEntry, AuditKind, AuditLeg, PotCredit,
    FULL_ALLOCATION, MINOR_UNIT_SCALE,
};

/// Compute each pot's credit, in creation order
///
/// `amount` must already be validated.
pub fn split_amount(registry: &PotRegistry, amount: Decimal) -> Result<Vec<Decimal>> {
    let mut credits: Vec<Decimal> = registry
        .list()
        .iter()
        .map(|pot| {
            amount
                .checked_mul(pot.percentage)
                .and_then(|share| share.checked_div(FULL_ALLOCATION))
                .map(|share| {
                    share.round_dp_with_strategy(
                        MINOR_UNIT_SCALE,
                        RoundingStrategy::MidpointAwayFromZero,
                    )
                })
                .ok_or_else(|| {
                    LedgerError::InvalidAmount(format!(
                        "amount {} overflows the share of pot {}",
                        amount, pot.name
                    ))
                })
        })
        .collect::<Result<_>>()?;

    let residual = amount - credits.iter().copied().sum::<Decimal>();
    if residual.is_zero() {
        return Ok(credits);
    }

    let priority = registry.remainder_priority();
    let designated = priority[0];

    if residual > Decimal::ZERO || credits[designated] + residual >= Decimal::ZERO {
        credits[designated] += residual;
        return Ok(credits);
    }

    let mut outstanding = -residual;
    for idx in priority {
        if outstanding.is_zero() {
            break;
        }
        let take = credits[idx].min(outstanding);
        credits[idx] -= take;
        outstanding -= take;
    }

    if !outstanding.is_zero() {
        return Err(LedgerError::InvalidConfiguration(format!(
            "cannot distribute rounding residual {} for amount {}",
            residual, amount
        )));
    }
    Ok(credits)
}

/// Build the commit and result for one allocation
pub(crate) fn build_allocation(
    registry: &PotRegistry,
    amount: Decimal,
    source_reference: &str,
    sequence: u64,
    recorded_at: DateTime<Utc>,
) -> Result<(LedgerCommit, AllocationResult)> {
    let credits = split_amount(registry, amount)?;

    let mut legs = Vec::with_capacity(credits.len());
    let mut updates = Vec::with_capacity(credits.len());
    let mut pot_credits = Vec::with_capacity(credits.len());

    for (pot, credited) in registry.list().iter().zip(credits) {
        let balance = checked_balance(&pot.name, pot.balance, credited)?;
        legs.push(AuditLeg::balance_change(&pot.name, credited, balance));
        updates.push(BalanceUpdate {
            pot: pot.name.clone(),
            delta: credited,
            resulting_balance: balance,
        });
        pot_credits.push(PotCredit {
            pot: pot.name.clone(),
            credited,
            balance,
        });
    }

    let entry = AuditEntry {
        sequence,
        kind: AuditKind::Allocation,
        legs,
        reference: source_reference.to_string(),
        actor: None,
        withdrawal_id: None,
        recorded_at,
    };

    let mut commit = LedgerCommit::new(entry);
    commit.balance_updates = updates;

    let result = AllocationResult {
        sequence,
        source_reference: source_reference.to_string(),
        credits: pot_credits,
    };
    Ok((commit, result))
}
