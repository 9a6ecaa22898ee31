//! Scenario: a throttled authority delays settlement, never corrupts it.
//!
//! # Invariant under test
//!
//! A "try later" reply (HTTP 429/204 at the wire) must leave no trace: the
//! order returns to NEW, the ledger is untouched, and the balance still
//! reads zero. When the authority answers PROCESSED on a later pass, the
//! credit lands exactly once — and the settled order is never polled again.
//!
//! Two tests:
//!
//! 1. The throttled pass requeues with zero side effects.
//! 2. Across throttle → settle → idle passes the credit lands exactly once.
//!
//! All tests are pure in-process; no DB or network required.

use std::sync::Arc;

use tally_domain::{CustomerSummary, EntryKind, OrderStatus};
use tally_service::OrderIntake;
use tally_testkit::{MemoryStore, ScriptedAccrual};
use tally_worker::{BatchReport, Reconciler, ReconcilerConfig};

const CUSTOMER: i64 = 9;
const ORDER: &str = "79927398713";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn harness() -> (Arc<MemoryStore>, Arc<ScriptedAccrual>, OrderIntake, Reconciler) {
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(ScriptedAccrual::new());
    let intake = OrderIntake::new(store.clone());
    let reconciler = Reconciler::new(
        store.clone(),
        source.clone(),
        ReconcilerConfig::default(),
    );
    (store, source, intake, reconciler)
}

async fn order_status(store: &MemoryStore, number: &str) -> OrderStatus {
    use tally_store::OrderStore;
    store
        .find_order_by_number(number)
        .await
        .expect("find")
        .expect("order exists")
        .status
}

// ---------------------------------------------------------------------------
// 1. A throttled pass requeues with zero side effects
// ---------------------------------------------------------------------------

#[tokio::test]
async fn throttled_pass_leaves_no_trace() {
    let (store, source, intake, reconciler) = harness();
    intake.submit(ORDER, CUSTOMER).await.expect("submit");
    source.push_not_ready(ORDER);

    let report = reconciler.run_batch().await;
    assert_eq!(
        report,
        BatchReport {
            claimed: 1,
            requeued: 1,
            ..Default::default()
        }
    );

    assert_eq!(order_status(&store, ORDER).await, OrderStatus::New);
    assert!(store.entries().is_empty(), "a throttled poll wrote to the ledger");

    use tally_store::BalanceStore;
    let totals = store.sum_by_kind(CUSTOMER).await.expect("sum");
    assert_eq!(totals.credit_centi, 0);
}

// ---------------------------------------------------------------------------
// 2. Throttle → settle → idle: the credit lands exactly once
// ---------------------------------------------------------------------------

#[tokio::test]
async fn credit_lands_exactly_once_after_the_throttle_clears() {
    let (store, source, intake, reconciler) = harness();
    let balance = tally_service::BalanceService::new(store.clone(), store.clone());

    intake.submit(ORDER, CUSTOMER).await.expect("submit");
    source.push_not_ready(ORDER);
    source.push_processed(ORDER, 72_998);

    // Pass 1: throttled, requeued.
    let first = reconciler.run_batch().await;
    assert_eq!(first.requeued, 1);

    // Pass 2: reclaimed and settled for 729.98 points.
    let second = reconciler.run_batch().await;
    assert_eq!(second.claimed, 1);
    assert_eq!(second.credited, 1);
    assert_eq!(order_status(&store, ORDER).await, OrderStatus::Processed);

    // Pass 3: nothing NEW remains; the settled order is invisible.
    let third = reconciler.run_batch().await;
    assert!(third.is_idle());
    assert_eq!(source.calls(ORDER), 2, "a terminal order was polled again");

    let entries = store.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, EntryKind::Credit);
    assert_eq!(entries[0].amount_centi, 72_998);
    assert_eq!(
        balance.summary(CUSTOMER).await.expect("summary"),
        CustomerSummary {
            current_centi: 72_998,
            withdrawn_centi: 0,
        }
    );
}
