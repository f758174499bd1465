//! End-to-end ledger scenarios over the in-memory store
//!
//! Covers the bet-intake path (allocate), operator tooling (transfer,
//! withdraw, reconfigure) and the reconciliation self-check.

mod common;

use common::{assert_reconciled, balances, expected, memory_ledger, open_over};
use pot_ledger::common::types::MAX_BALANCE;
use pot_ledger::{AuditKind, LedgerError, RetryPolicy, WithdrawalRequest};
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;

// ============================================================================
// Worked scenarios
// ============================================================================

#[test_log::test(tokio::test)]
async fn test_allocate_transfer_withdraw_scenario() {
    let (_, ledger) = memory_ledger().await;

    let allocation = ledger.allocate(dec!(100), "bet-1").await.unwrap();
    assert_eq!(
        allocation.per_pot(),
        expected(&[
            ("Premios", dec!(70.00)),
            ("Reserva", dec!(20.00)),
            ("Ganancias", dec!(10.00)),
        ])
    );
    assert_eq!(
        balances(&ledger).await,
        expected(&[
            ("Premios", dec!(70.00)),
            ("Reserva", dec!(20.00)),
            ("Ganancias", dec!(10.00)),
        ])
    );

    let transfer = ledger
        .transfer("Premios", "Ganancias", dec!(50), "op-1")
        .await
        .unwrap();
    assert_eq!(transfer.from_balance, dec!(20.00));
    assert_eq!(transfer.to_balance, dec!(60.00));
    assert_eq!(
        balances(&ledger).await,
        expected(&[
            ("Premios", dec!(20.00)),
            ("Reserva", dec!(20.00)),
            ("Ganancias", dec!(60.00)),
        ])
    );

    let err = ledger
        .withdraw("Ganancias", dec!(1000), "op-2")
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
    assert!(!err.is_retryable());
    assert_eq!(
        balances(&ledger).await,
        expected(&[
            ("Premios", dec!(20.00)),
            ("Reserva", dec!(20.00)),
            ("Ganancias", dec!(60.00)),
        ])
    );

    assert_reconciled(&ledger).await;
}

#[tokio::test]
async fn test_rounded_allocation_sums_exactly() {
    let (_, ledger) = memory_ledger().await;

    let allocation = ledger.allocate(dec!(99.99), "bet-2").await.unwrap();
    assert_eq!(allocation.credited("Premios"), Some(dec!(69.99)));
    assert_eq!(allocation.credited("Reserva"), Some(dec!(20.00)));
    assert_eq!(allocation.credited("Ganancias"), Some(dec!(10.00)));
    assert_eq!(allocation.total(), dec!(99.99));

    assert_reconciled(&ledger).await;
}

// ============================================================================
// Rejections are typed and leave no trace
// ============================================================================

#[tokio::test]
async fn test_invalid_requests_are_rejected_without_audit_entries() {
    let (_, ledger) = memory_ledger().await;
    ledger.allocate(dec!(100), "bet-1").await.unwrap();

    assert!(matches!(
        ledger.allocate(Decimal::ZERO, "bet-0").await,
        Err(LedgerError::InvalidAmount(_))
    ));
    assert!(matches!(
        ledger.allocate(dec!(-1), "bet-0").await,
        Err(LedgerError::InvalidAmount(_))
    ));
    assert!(matches!(
        ledger.allocate(dec!(0.001), "bet-0").await,
        Err(LedgerError::InvalidAmount(_))
    ));
    assert!(matches!(
        ledger.transfer("Premios", "Reserva", dec!(-5), "op").await,
        Err(LedgerError::InvalidAmount(_))
    ));
    assert!(matches!(
        ledger.transfer("Premios", "Premios", dec!(5), "op").await,
        Err(LedgerError::SamePot(_))
    ));
    assert!(matches!(
        ledger.transfer("Premios", "Bote", dec!(5), "op").await,
        Err(LedgerError::NotFound(_))
    ));
    assert!(matches!(
        ledger.transfer("Reserva", "Premios", dec!(20.01), "op").await,
        Err(LedgerError::InsufficientFunds { .. })
    ));
    assert!(matches!(
        ledger.withdraw("Bote", dec!(1), "op").await,
        Err(LedgerError::NotFound(_))
    ));
    assert!(matches!(
        ledger.get_pot("Bote").await,
        Err(LedgerError::NotFound(_))
    ));

    assert_eq!(ledger.entries().await.len(), 1);
    assert_eq!(
        balances(&ledger).await,
        expected(&[
            ("Premios", dec!(70)),
            ("Reserva", dec!(20)),
            ("Ganancias", dec!(10)),
        ])
    );
}

#[tokio::test]
async fn test_oversized_deposits_fail_with_typed_errors() {
    let (_, ledger) = memory_ledger().await;

    let err = ledger
        .allocate(dec!(2000000000000000000000000000), "bet-big")
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidAmount(_)));
    assert!(!err.is_retryable());

    ledger.allocate(MAX_BALANCE, "bet-max").await.unwrap();
    let before = balances(&ledger).await;

    let err = ledger.allocate(MAX_BALANCE, "bet-max-2").await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidAmount(_)));
    assert_eq!(balances(&ledger).await, before);
    assert_eq!(ledger.entries().await.len(), 1);
    assert_reconciled(&ledger).await;
}

#[tokio::test]
async fn test_every_accepted_request_writes_one_entry() {
    let (_, ledger) = memory_ledger().await;
    ledger.allocate(dec!(100), "bet-1").await.unwrap();
    ledger.transfer("Premios", "Reserva", dec!(10), "op-1").await.unwrap();
    ledger.withdraw("Reserva", dec!(5), "op-2").await.unwrap();

    let entries = ledger.entries().await;
    let kinds: Vec<AuditKind> = entries.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![AuditKind::Allocation, AuditKind::Transfer, AuditKind::Withdrawal]
    );
    let sequences: Vec<u64> = entries.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);

    assert_eq!(entries[0].legs.len(), 3);
    assert_eq!(entries[1].actor.as_deref(), Some("op-1"));
    assert!(entries[2].withdrawal_id.is_some());
    assert_eq!(ledger.entries_since(1).await.len(), 2);
}

// ============================================================================
// Withdrawals
// ============================================================================

#[tokio::test]
async fn test_idempotent_withdrawal_does_not_double_debit() {
    let (_, ledger) = memory_ledger().await;
    ledger.allocate(dec!(100), "bet-1").await.unwrap();

    let request =
        WithdrawalRequest::new("Premios", dec!(30), "op-2").with_idempotency_key("payout-7");
    let first = ledger.submit_withdrawal(request.clone()).await.unwrap();
    let replay = ledger.submit_withdrawal(request).await.unwrap();

    assert!(!first.replayed);
    assert!(replay.replayed);
    assert_eq!(first.withdrawal_id, replay.withdrawal_id);
    assert_eq!(replay.remaining_balance, dec!(40));
    assert_eq!(ledger.get_pot("Premios").await.unwrap().balance, dec!(40));
    assert_eq!(ledger.entries().await.len(), 2);

    let conflicting =
        WithdrawalRequest::new("Premios", dec!(31), "op-2").with_idempotency_key("payout-7");
    assert!(matches!(
        ledger.submit_withdrawal(conflicting).await,
        Err(LedgerError::IdempotencyConflict { .. })
    ));
    assert_reconciled(&ledger).await;
}

#[tokio::test]
async fn test_idempotency_keys_survive_reopen() {
    let (store, ledger) = memory_ledger().await;
    ledger.allocate(dec!(100), "bet-1").await.unwrap();
    let request = WithdrawalRequest::new("Reserva", dec!(5), "op-2").with_idempotency_key("k-1");
    let first = ledger.submit_withdrawal(request.clone()).await.unwrap();
    drop(ledger);

    let reopened = open_over(store).await;
    let replay = reopened.submit_withdrawal(request).await.unwrap();
    assert!(replay.replayed);
    assert_eq!(replay.withdrawal_id, first.withdrawal_id);
    assert_eq!(reopened.get_pot("Reserva").await.unwrap().balance, dec!(15));
}

// ============================================================================
// Storage failures
// ============================================================================

#[tokio::test]
async fn test_storage_failure_rolls_back_and_retry_succeeds() {
    let (store, ledger) = memory_ledger().await;
    ledger.allocate(dec!(100), "bet-1").await.unwrap();

    store.fail_next_commits(2);
    let policy = RetryPolicy::new(3, 1, 1, 0.0);
    let result = policy
        .retry(|_| ledger.transfer("Premios", "Ganancias", dec!(50), "op-1"))
        .await
        .unwrap();

    assert_eq!(result.from_balance, dec!(20));
    assert_eq!(ledger.entries().await.len(), 2);
    assert_reconciled(&ledger).await;
}

#[tokio::test]
async fn test_unavailable_store_fails_closed() {
    let (store, ledger) = memory_ledger().await;
    ledger.allocate(dec!(100), "bet-1").await.unwrap();

    store.set_available(false);
    let err = ledger.withdraw("Premios", dec!(10), "op-2").await.unwrap_err();
    assert!(matches!(err, LedgerError::StorageUnavailable(_)));
    assert!(ledger.reconcile().await.is_err());

    store.set_available(true);
    assert_eq!(ledger.get_pot("Premios").await.unwrap().balance, dec!(70));
    assert_reconciled(&ledger).await;
}

// ============================================================================
// Reconfiguration and persistence
// ============================================================================

#[tokio::test]
async fn test_reconfiguration_applies_to_later_deposits_only() {
    let (_, ledger) = memory_ledger().await;
    ledger.allocate(dec!(100), "bet-1").await.unwrap();

    let mapping: HashMap<String, Decimal> = [
        ("Premios".to_string(), dec!(40)),
        ("Reserva".to_string(), dec!(40)),
        ("Ganancias".to_string(), dec!(20)),
    ]
    .into_iter()
    .collect();
    ledger.set_percentages(&mapping).await.unwrap();
    ledger.allocate(dec!(100), "bet-2").await.unwrap();

    assert_eq!(
        balances(&ledger).await,
        expected(&[
            ("Premios", dec!(110)),
            ("Reserva", dec!(60)),
            ("Ganancias", dec!(30)),
        ])
    );
    assert_reconciled(&ledger).await;
}

#[tokio::test]
async fn test_reopen_restores_pots_and_log() {
    let (store, ledger) = memory_ledger().await;
    ledger.allocate(dec!(250), "bet-1").await.unwrap();
    ledger.transfer("Premios", "Reserva", dec!(25), "op-1").await.unwrap();
    let before = balances(&ledger).await;
    drop(ledger);

    let reopened = open_over(store).await;
    assert_eq!(balances(&reopened).await, before);
    assert_eq!(reopened.entries().await.len(), 2);

    let next = reopened.allocate(dec!(10), "bet-2").await.unwrap();
    assert_eq!(next.sequence, 3);
    assert_eq!(
        reopened.reconstruct_balances().await.unwrap(),
        balances(&reopened).await
    );
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_mutations_keep_invariants() {
    let (_, ledger) = memory_ledger().await;
    let ledger = Arc::new(ledger);
    ledger.allocate(dec!(1000), "seed").await.unwrap();

    let mut handles = Vec::new();
    for i in 0..50u32 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            match i % 3 {
                0 => {
                    let amount = Decimal::new(1_000 + i as i64 * 37, 2);
                    ledger.allocate(amount, &format!("bet-{}", i)).await.map(|_| ())
                }
                1 => ledger
                    .transfer("Premios", "Ganancias", dec!(40), &format!("op-{}", i))
                    .await
                    .map(|_| ()),
                _ => ledger
                    .withdraw("Ganancias", dec!(25), &format!("op-{}", i))
                    .await
                    .map(|_| ()),
            }
        }));
    }

    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) | Err(LedgerError::InsufficientFunds { .. }) => {}
            Err(other) => panic!("Unexpected error: {}", other),
        }
    }

    let pots = ledger.list_pots().await;
    assert!(pots.iter().all(|p| p.balance >= Decimal::ZERO));

    let sequences: Vec<u64> = ledger.entries().await.iter().map(|e| e.sequence).collect();
    let expected_sequences: Vec<u64> = (1..=sequences.len() as u64).collect();
    assert_eq!(sequences, expected_sequences);

    assert_reconciled(&ledger).await;
}
