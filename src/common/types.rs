//! Domain types shared by the registry, the engines and the storage backends

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use super::errors::{LedgerError, Result};

/// Decimal places of the minor currency unit (cents)
pub const MINOR_UNIT_SCALE: u32 = 2;

/// Smallest representable amount
pub const MINOR_UNIT: Decimal = dec!(0.01);

/// Percentages across all pots must sum to this value
pub const FULL_ALLOCATION: Decimal = dec!(100);

/// Largest amount or pot balance the ledger accepts (fits `NUMERIC(20, 2)`)
pub const MAX_BALANCE: Decimal = dec!(999999999999999999.99);

/// Decimal places kept for pot percentages (fits `NUMERIC(9, 4)`)
pub const PERCENTAGE_SCALE: u32 = 4;

/// Validate an amount entering a mutation
///
/// Amounts must be strictly positive, no larger than [`MAX_BALANCE`], and
/// expressible in the minor currency unit. The returned value is rescaled to
/// exactly two decimal places.
pub fn validate_amount(amount: Decimal) -> Result<Decimal> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    if amount.normalize().scale() > MINOR_UNIT_SCALE {
        return Err(LedgerError::InvalidAmount(format!(
            "amount {} is finer than the minor currency unit",
            amount
        )));
    }
    if amount > MAX_BALANCE {
        return Err(LedgerError::InvalidAmount(format!(
            "amount {} exceeds the maximum of {}",
            amount, MAX_BALANCE
        )));
    }
    let mut scaled = amount;
    scaled.rescale(MINOR_UNIT_SCALE);
    Ok(scaled)
}

/// Apply a signed change to a pot balance without overflowing
///
/// Results above [`MAX_BALANCE`] are rejected with `InvalidAmount`. Negative
/// results are left to the caller's funds check.
pub fn checked_balance(pot: &str, balance: Decimal, delta: Decimal) -> Result<Decimal> {
    balance
        .checked_add(delta)
        .filter(|next| *next <= MAX_BALANCE)
        .ok_or_else(|| {
            LedgerError::InvalidAmount(format!(
                "balance of pot {} would exceed {} ({} + {})",
                pot, MAX_BALANCE, balance, delta
            ))
        })
}

/// A named bucket holding a percentage-defined share of every deposit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pot {
    /// Unique, immutable identifier
    pub name: String,
    /// Share of every deposit, in (0, 100]
    pub percentage: Decimal,
    /// Current balance, never negative
    pub balance: Decimal,
    /// Creation order, used for listing and tie-breaking
    pub position: u32,
}

impl Pot {
    /// Create an empty pot
    pub fn new(name: impl Into<String>, percentage: Decimal, position: u32) -> Self {
        Self {
            name: name.into(),
            percentage,
            balance: Decimal::ZERO,
            position,
        }
    }

    /// Set the starting balance (used when loading persisted pots)
    pub fn with_balance(mut self, balance: Decimal) -> Self {
        self.balance = balance;
        self
    }
}

/// Kind of operation recorded in the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditKind {
    Allocation,
    Transfer,
    Withdrawal,
    Reconfiguration,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::Allocation => "allocation",
            AuditKind::Transfer => "transfer",
            AuditKind::Withdrawal => "withdrawal",
            AuditKind::Reconfiguration => "reconfiguration",
        }
    }
}

impl std::fmt::Display for AuditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AuditKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "allocation" => Ok(AuditKind::Allocation),
            "transfer" => Ok(AuditKind::Transfer),
            "withdrawal" => Ok(AuditKind::Withdrawal),
            "reconfiguration" => Ok(AuditKind::Reconfiguration),
            other => Err(LedgerError::Reconciliation(format!(
                "unknown audit entry kind: {}",
                other
            ))),
        }
    }
}

/// Effect of one audit entry on a single pot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLeg {
    pub pot: String,
    /// Signed balance change (zero for reconfiguration legs)
    pub delta: Decimal,
    /// Pot balance right after the entry was applied
    pub resulting_balance: Decimal,
    /// New percentage, only set on reconfiguration legs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<Decimal>,
}

impl AuditLeg {
    pub fn balance_change(pot: impl Into<String>, delta: Decimal, resulting_balance: Decimal) -> Self {
        Self {
            pot: pot.into(),
            delta,
            resulting_balance,
            percentage: None,
        }
    }
}

/// Immutable record of one accepted ledger operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Strictly increasing, gap-free sequence starting at 1
    pub sequence: u64,
    pub kind: AuditKind,
    pub legs: Vec<AuditLeg>,
    /// Source reference (allocations) or operation label
    pub reference: String,
    /// Operator on whose behalf the mutation ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub withdrawal_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Money moved by this entry
    ///
    /// Deposits for allocations, the debited amount for transfers and
    /// withdrawals, zero for reconfigurations.
    pub fn amount(&self) -> Decimal {
        match self.kind {
            AuditKind::Allocation => self.legs.iter().map(|leg| leg.delta).sum(),
            AuditKind::Transfer | AuditKind::Withdrawal => self
                .legs
                .iter()
                .filter(|leg| leg.delta < Decimal::ZERO)
                .map(|leg| -leg.delta)
                .sum(),
            AuditKind::Reconfiguration => Decimal::ZERO,
        }
    }
}

/// Durable record of an accepted withdrawal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalRecord {
    pub withdrawal_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub pot: String,
    pub amount: Decimal,
    pub actor: String,
    pub remaining_balance: Decimal,
    pub sequence: u64,
    pub recorded_at: DateTime<Utc>,
}

/// Withdrawal request from operator tooling
#[derive(Debug, Clone, PartialEq)]
pub struct WithdrawalRequest {
    pub pot: String,
    pub amount: Decimal,
    pub actor: String,
    /// Replays carrying the same key return the original result
    pub idempotency_key: Option<String>,
}

impl WithdrawalRequest {
    pub fn new(pot: impl Into<String>, amount: Decimal, actor: impl Into<String>) -> Self {
        Self {
            pot: pot.into(),
            amount,
            actor: actor.into(),
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Amount credited to one pot by an allocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PotCredit {
    pub pot: String,
    pub credited: Decimal,
    pub balance: Decimal,
}

/// Outcome of `allocate`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationResult {
    pub sequence: u64,
    pub source_reference: String,
    /// Credits in pot creation order
    pub credits: Vec<PotCredit>,
}

impl AllocationResult {
    /// Credited amount per pot name
    pub fn per_pot(&self) -> BTreeMap<String, Decimal> {
        self.credits
            .iter()
            .map(|c| (c.pot.clone(), c.credited))
            .collect()
    }

    pub fn credited(&self, pot: &str) -> Option<Decimal> {
        self.credits.iter().find(|c| c.pot == pot).map(|c| c.credited)
    }

    pub fn total(&self) -> Decimal {
        self.credits.iter().map(|c| c.credited).sum()
    }
}

/// Outcome of `transfer`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferResult {
    pub sequence: u64,
    pub from_balance: Decimal,
    pub to_balance: Decimal,
}

/// Outcome of `withdraw`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalResult {
    pub sequence: u64,
    pub withdrawal_id: String,
    pub remaining_balance: Decimal,
    /// True when an earlier withdrawal with the same idempotency key was returned
    pub replayed: bool,
}

/// Money that entered, left and remains in the ledger
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerTotals {
    pub deposited: Decimal,
    pub withdrawn: Decimal,
    pub held: Decimal,
}

impl LedgerTotals {
    /// `held == deposited - withdrawn`
    pub fn is_balanced(&self) -> bool {
        self.held == self.deposited - self.withdrawn
    }
}

/// Live balance that differs from the audit log replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceDiscrepancy {
    pub pot: String,
    pub live: Decimal,
    pub replayed: Decimal,
}

/// Result of comparing the audit log replay with the live registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub live: BTreeMap<String, Decimal>,
    pub replayed: BTreeMap<String, Decimal>,
    pub totals: LedgerTotals,
    pub discrepancies: Vec<BalanceDiscrepancy>,
    pub checked_at: DateTime<Utc>,
}

impl ReconciliationReport {
    pub fn is_consistent(&self) -> bool {
        self.discrepancies.is_empty() && self.totals.is_balanced()
    }

    /// Turn a failed self-check into an error
    pub fn ensure_consistent(&self) -> Result<()> {
        if self.is_consistent() {
            return Ok(());
        }
        let mut problems: Vec<String> = self
            .discrepancies
            .iter()
            .map(|d| format!("{}: live {} vs replayed {}", d.pot, d.live, d.replayed))
            .collect();
        if !self.totals.is_balanced() {
            problems.push(format!(
                "held {} != deposited {} - withdrawn {}",
                self.totals.held, self.totals.deposited, self.totals.withdrawn
            ));
        }
        Err(LedgerError::Reconciliation(problems.join("; ")))
    }
}
