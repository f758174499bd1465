//! Ledger audit log: append-only record and balance replay

use rust_decimal::Decimal;
use std::collections::BTreeMap;

use crate::common::errors::{LedgerError, Result};
use crate::common::types::{AuditEntry, AuditKind, LedgerTotals};

/// In-memory mirror of the durable audit log
///
/// Entries are only appended after the store has committed them. There is
/// no update or delete.
#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    entries: Vec<AuditEntry>,
    deposited: Decimal,
    withdrawn: Decimal,
}

impl AuditLog {
    /// Rebuild from persisted entries (must be in sequence order, gap-free)
    pub fn from_entries(entries: Vec<AuditEntry>) -> Result<Self> {
        let mut log = Self::default();
        for entry in entries {
            log.append(entry)?;
        }
        Ok(log)
    }

    /// Sequence number the next entry must carry
    pub fn next_sequence(&self) -> u64 {
        self.entries.last().map(|e| e.sequence + 1).unwrap_or(1)
    }

    /// Append a committed entry
    pub fn append(&mut self, entry: AuditEntry) -> Result<()> {
        let expected = self.next_sequence();
        if entry.sequence != expected {
            return Err(LedgerError::StorageUnavailable(format!(
                "audit sequence gap: expected {}, got {}",
                expected, entry.sequence
            )));
        }
        match entry.kind {
            AuditKind::Allocation => self.deposited += entry.amount(),
            AuditKind::Withdrawal => self.withdrawn += entry.amount(),
            AuditKind::Transfer | AuditKind::Reconfiguration => {}
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    /// Entries with a sequence greater than `sequence`
    pub fn since(&self, sequence: u64) -> &[AuditEntry] {
        let start = self.entries.partition_point(|e| e.sequence <= sequence);
        &self.entries[start..]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total deposited and withdrawn, with `held` supplied by the caller
    pub fn totals(&self, held: Decimal) -> LedgerTotals {
        LedgerTotals {
            deposited: self.deposited,
            withdrawn: self.withdrawn,
            held,
        }
    }
}

/// Replay entries from zero balances, in sequence order
///
/// `pot_names` seeds every known pot at zero so pots that never moved still
/// appear in the result.
pub fn replay_balances<'a>(
    entries: &[AuditEntry],
    pot_names: impl IntoIterator<Item = &'a str>,
) -> BTreeMap<String, Decimal> {
    let mut balances: BTreeMap<String, Decimal> = pot_names
        .into_iter()
        .map(|name| (name.to_string(), Decimal::ZERO))
        .collect();

    let mut ordered: Vec<&AuditEntry> = entries.iter().collect();
    ordered.sort_by_key(|e| e.sequence);

    for entry in ordered {
        for leg in &entry.legs {
            *balances.entry(leg.pot.clone()).or_insert(Decimal::ZERO) += leg.delta;
        }
    }
    balances
}

/// Deposited and withdrawn sums recomputed from raw entries
pub fn replay_flows(entries: &[AuditEntry]) -> (Decimal, Decimal) {
    entries.iter().fold((Decimal::ZERO, Decimal::ZERO), |(dep, wd), e| match e.kind {
        AuditKind::Allocation => (dep + e.amount(), wd),
        AuditKind::Withdrawal => (dep, wd + e.amount()),
        AuditKind::Transfer | AuditKind::Reconfiguration => (dep, wd),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::AuditLeg;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn entry(sequence: u64, kind: AuditKind, legs: Vec<(&str, Decimal)>) -> AuditEntry {
        AuditEntry {
            sequence,
            kind,
            legs: legs
                .into_iter()
                .map(|(pot, delta)| AuditLeg::balance_change(pot, delta, Decimal::ZERO))
                .collect(),
            reference: format!("ref-{}", sequence),
            actor: None,
            withdrawal_id: None,
            recorded_at: Utc::now(),
        }
    }

    fn sample_entries() -> Vec<AuditEntry> {
        vec![
            entry(
                1,
                AuditKind::Allocation,
                vec![("Premios", dec!(70)), ("Reserva", dec!(20)), ("Ganancias", dec!(10))],
            ),
            entry(
                2,
                AuditKind::Transfer,
                vec![("Premios", dec!(-50)), ("Ganancias", dec!(50))],
            ),
            entry(3, AuditKind::Withdrawal, vec![("Ganancias", dec!(-15))]),
        ]
    }

    #[test]
    fn test_append_tracks_flows() {
        let log = AuditLog::from_entries(sample_entries()).unwrap();
        assert_eq!(log.len(), 3);
        assert_eq!(log.next_sequence(), 4);

        let totals = log.totals(dec!(85));
        assert_eq!(totals.deposited, dec!(100));
        assert_eq!(totals.withdrawn, dec!(15));
        assert!(totals.is_balanced());
    }

    #[test]
    fn test_append_rejects_gaps() {
        let mut log = AuditLog::default();
        let err = log
            .append(entry(2, AuditKind::Withdrawal, vec![("Ganancias", dec!(-1))]))
            .unwrap_err();
        assert!(matches!(err, LedgerError::StorageUnavailable(_)));
        assert!(log.is_empty());
    }

    #[test]
    fn test_since_returns_tail() {
        let log = AuditLog::from_entries(sample_entries()).unwrap();
        let tail: Vec<u64> = log.since(1).iter().map(|e| e.sequence).collect();
        assert_eq!(tail, vec![2, 3]);
        assert!(log.since(3).is_empty());
        assert_eq!(log.since(0).len(), 3);
    }

    #[test]
    fn test_replay_balances_ignores_input_order() {
        let mut entries = sample_entries();
        entries.reverse();
        let balances = replay_balances(&entries, ["Premios", "Reserva", "Ganancias", "Bote"]);
        assert_eq!(balances["Premios"], dec!(20));
        assert_eq!(balances["Reserva"], dec!(20));
        assert_eq!(balances["Ganancias"], dec!(45));
        assert_eq!(balances["Bote"], Decimal::ZERO);

        assert_eq!(replay_flows(&entries), (dec!(100), dec!(15)));
    }
}
