//! Race contracts against the in-memory store.
//!
//! The memory twins of the env-gated Postgres scenarios: these run on every
//! `cargo test`, so the contract the doubles promise to the service and
//! worker tests is itself under test.

use std::collections::HashSet;
use std::sync::Arc;

use tally_domain::{EntryKind, OrderStatus};
use tally_store::{BalanceStore, OrderStore, StoreError};
use tally_testkit::MemoryStore;

#[tokio::test]
async fn concurrent_claims_return_disjoint_batches() {
    let store = Arc::new(MemoryStore::new());
    let mut seeded: HashSet<String> = HashSet::new();
    for n in 0..6 {
        let number = format!("10{n}");
        store.create_order(&number, 1).await.expect("create");
        seeded.insert(number);
    }

    let a = store.claim_pending_orders(3);
    let b = store.claim_pending_orders(3);
    let (a, b) = tokio::join!(a, b);
    let a = a.expect("first claim");
    let b = b.expect("second claim");

    let a_numbers: HashSet<String> = a.iter().map(|o| o.number.clone()).collect();
    let b_numbers: HashSet<String> = b.iter().map(|o| o.number.clone()).collect();
    assert!(
        a_numbers.is_disjoint(&b_numbers),
        "the same order was claimed by both batches: {:?}",
        a_numbers.intersection(&b_numbers).collect::<Vec<_>>()
    );

    for order in a.iter().chain(b.iter()) {
        assert_eq!(order.status, OrderStatus::Processing);
    }

    let claimed: HashSet<String> = a_numbers.union(&b_numbers).cloned().collect();
    assert_eq!(claimed, seeded, "the two batches did not drain every NEW order");
}

#[tokio::test]
async fn racing_withdrawals_exactly_one_succeeds() {
    let store = Arc::new(MemoryStore::new());
    store
        .record_ledger_entry("4561261212345467", 1, 50_000, EntryKind::Credit)
        .await
        .expect("seed credit");

    // Both ask for the full balance; the store can honor only one.
    let a = store.withdraw(1, "2377225624", 50_000);
    let b = store.withdraw(1, "3182649", 50_000);
    let (a, b) = tokio::join!(a, b);

    let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "expected exactly one winner: {a:?} / {b:?}");
    let denied = if a.is_err() { a } else { b };
    assert!(matches!(
        denied,
        Err(StoreError::InsufficientFunds {
            requested_centi: 50_000,
            current_centi: 0,
        })
    ));

    let totals = store.sum_by_kind(1).await.expect("sum");
    assert_eq!(totals.debit_centi, 50_000, "the balance went negative");
}
