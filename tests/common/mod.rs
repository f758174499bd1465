//! Common test utilities and fixtures

#![allow(dead_code)]

use pot_ledger::config::types::LedgerSettings;
use pot_ledger::{Ledger, LedgerStore, MemoryStore, PotSeed};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The 70/20/10 pot set used throughout the scenarios
pub fn standard_seed() -> Vec<PotSeed> {
    vec![
        PotSeed::new("Premios", dec!(70)),
        PotSeed::new("Reserva", dec!(20)),
        PotSeed::new("Ganancias", dec!(10)),
    ]
}

/// Open a ledger over a fresh in-memory store
pub async fn memory_ledger() -> (Arc<MemoryStore>, Ledger) {
    let store = Arc::new(MemoryStore::new());
    let ledger = open_over(store.clone()).await;
    (store, ledger)
}

/// Open a ledger over any store with the standard seed
pub async fn open_over(store: Arc<dyn LedgerStore>) -> Ledger {
    Ledger::open(store, &standard_seed(), &LedgerSettings::default())
        .await
        .expect("Failed to open ledger")
}

/// Live balances keyed by pot name
pub async fn balances(ledger: &Ledger) -> BTreeMap<String, Decimal> {
    ledger
        .list_pots()
        .await
        .into_iter()
        .map(|p| (p.name, p.balance))
        .collect()
}

/// Build an expected balance map
pub fn expected(pairs: &[(&str, Decimal)]) -> BTreeMap<String, Decimal> {
    pairs.iter().map(|(n, b)| (n.to_string(), *b)).collect()
}

/// Assert the global invariant and audit replay both hold
pub async fn assert_reconciled(ledger: &Ledger) {
    let report = ledger.reconcile().await.expect("Reconciliation query failed");
    assert!(
        report.is_consistent(),
        "Ledger out of balance: {:?}",
        report
    );
    let totals = ledger.totals().await;
    assert_eq!(totals.held, totals.deposited - totals.withdrawn);
    assert_eq!(report.totals, totals);
}
