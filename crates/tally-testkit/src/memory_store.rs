//! In-memory twin of the Postgres store.
//!
//! One mutex over both tables plays the role the database's locking plays in
//! production: claims are conditional read-modify-writes, settlement is
//! guarded on PROCESSING, and a withdrawal recomputes the balance and appends
//! the debit in one critical section. Tests that pass against this store
//! exercise the same contract the Postgres scenarios verify.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tally_domain::{EntryKind, LedgerEntry, LedgerTotals, Order, OrderStatus, OrderWithAccrual};
use tally_store::{BalanceStore, OrderStore, StoreError};

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    orders: Vec<OrderRow>,
    entries: Vec<LedgerEntry>,
    next_order_id: i64,
    next_entry_id: i64,
}

/// The claim stamp lives beside the order, as in the `orders` table; it is a
/// store concern and never leaves through the domain types.
struct OrderRow {
    order: Order,
    claimed_at_utc: Option<DateTime<Utc>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Total number of order rows, across all customers.
    pub fn order_count(&self) -> usize {
        self.lock().orders.len()
    }

    /// Snapshot of the whole ledger, oldest entry first.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.lock().entries.clone()
    }

    /// Rewrite the claim stamp of a PROCESSING order, so staleness sweeps can
    /// be tested without waiting out a real lease. Returns `false` when no
    /// such claim exists.
    pub fn backdate_claim(&self, number: &str, claimed_at_utc: DateTime<Utc>) -> bool {
        let mut inner = self.lock();
        match inner
            .orders
            .iter_mut()
            .find(|row| row.order.number == number && row.claimed_at_utc.is_some())
        {
            Some(row) => {
                row.claimed_at_utc = Some(claimed_at_utc);
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory store mutex poisoned")
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// OrderStore
// ---------------------------------------------------------------------------

#[async_trait]
impl OrderStore for MemoryStore {
    async fn create_order(&self, number: &str, customer_id: i64) -> Result<Order, StoreError> {
        let mut inner = self.lock();
        if inner.orders.iter().any(|row| row.order.number == number) {
            return Err(StoreError::DuplicateOrder {
                number: number.to_string(),
            });
        }
        inner.next_order_id += 1;
        let order = Order {
            id: inner.next_order_id,
            number: number.to_string(),
            status: OrderStatus::New,
            customer_id,
            created_at_utc: Utc::now(),
        };
        inner.orders.push(OrderRow {
            order: order.clone(),
            claimed_at_utc: None,
        });
        Ok(order)
    }

    async fn find_order_by_number(&self, number: &str) -> Result<Option<Order>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .orders
            .iter()
            .find(|row| row.order.number == number)
            .map(|row| row.order.clone()))
    }

    async fn list_orders_for_customer(
        &self,
        customer_id: i64,
    ) -> Result<Vec<OrderWithAccrual>, StoreError> {
        let inner = self.lock();
        let mut mine: Vec<&OrderRow> = inner
            .orders
            .iter()
            .filter(|row| row.order.customer_id == customer_id)
            .collect();
        mine.sort_by(|a, b| {
            b.order
                .created_at_utc
                .cmp(&a.order.created_at_utc)
                .then(b.order.id.cmp(&a.order.id))
        });
        Ok(mine
            .into_iter()
            .map(|row| {
                let mut accrual_centi: Option<i64> = None;
                for entry in inner.entries.iter().filter(|e| {
                    e.order_number == row.order.number && e.kind == EntryKind::Credit
                }) {
                    *accrual_centi.get_or_insert(0) += entry.amount_centi;
                }
                OrderWithAccrual {
                    number: row.order.number.clone(),
                    status: row.order.status,
                    accrual_centi,
                    created_at_utc: row.order.created_at_utc,
                }
            })
            .collect())
    }

    async fn claim_pending_orders(&self, limit: i64) -> Result<Vec<Order>, StoreError> {
        let mut inner = self.lock();
        let now = Utc::now();
        let mut claimed = Vec::new();
        // Rows are append-only, so iteration order is id order.
        for row in inner.orders.iter_mut() {
            if claimed.len() as i64 >= limit {
                break;
            }
            if row.order.status == OrderStatus::New {
                row.order.status = OrderStatus::Processing;
                row.claimed_at_utc = Some(now);
                claimed.push(row.order.clone());
            }
        }
        Ok(claimed)
    }

    async fn finalize_order(
        &self,
        number: &str,
        new_status: OrderStatus,
    ) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        match inner.orders.iter_mut().find(|row| {
            row.order.number == number && row.order.status == OrderStatus::Processing
        }) {
            Some(row) => {
                row.order.status = new_status;
                row.claimed_at_utc = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn apply_accrual(
        &self,
        number: &str,
        customer_id: i64,
        amount_centi: i64,
    ) -> Result<bool, StoreError> {
        if amount_centi <= 0 {
            return Err(StoreError::Unavailable(format!(
                "credit amount must be positive, got {amount_centi}"
            )));
        }
        let mut guard = self.lock();
        let inner = &mut *guard;
        let Some(idx) = inner.orders.iter().position(|row| {
            row.order.number == number && row.order.status == OrderStatus::Processing
        }) else {
            return Ok(false);
        };
        inner.next_entry_id += 1;
        let entry = LedgerEntry {
            id: inner.next_entry_id,
            order_number: number.to_string(),
            customer_id,
            amount_centi,
            kind: EntryKind::Credit,
            created_at_utc: Utc::now(),
        };
        let row = &mut inner.orders[idx];
        row.order.status = OrderStatus::Processed;
        row.claimed_at_utc = None;
        inner.entries.push(entry);
        Ok(true)
    }

    async fn release_stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError> {
        let mut inner = self.lock();
        let mut released = Vec::new();
        for row in inner.orders.iter_mut() {
            if row.order.status != OrderStatus::Processing {
                continue;
            }
            if let Some(claimed_at) = row.claimed_at_utc {
                if claimed_at < claimed_before {
                    row.order.status = OrderStatus::New;
                    row.claimed_at_utc = None;
                    released.push(row.order.number.clone());
                }
            }
        }
        Ok(released)
    }
}

// ---------------------------------------------------------------------------
// BalanceStore
// ---------------------------------------------------------------------------

#[async_trait]
impl BalanceStore for MemoryStore {
    async fn record_ledger_entry(
        &self,
        order_number: &str,
        customer_id: i64,
        amount_centi: i64,
        kind: EntryKind,
    ) -> Result<LedgerEntry, StoreError> {
        if amount_centi <= 0 {
            return Err(StoreError::Unavailable(format!(
                "ledger amount must be positive, got {amount_centi}"
            )));
        }
        let mut inner = self.lock();
        inner.next_entry_id += 1;
        let entry = LedgerEntry {
            id: inner.next_entry_id,
            order_number: order_number.to_string(),
            customer_id,
            amount_centi,
            kind,
            created_at_utc: Utc::now(),
        };
        inner.entries.push(entry.clone());
        Ok(entry)
    }

    async fn sum_by_kind(&self, customer_id: i64) -> Result<LedgerTotals, StoreError> {
        let inner = self.lock();
        let mut totals = LedgerTotals::default();
        for entry in inner.entries.iter().filter(|e| e.customer_id == customer_id) {
            match entry.kind {
                EntryKind::Credit => totals.credit_centi += entry.amount_centi,
                EntryKind::Debit => totals.debit_centi += entry.amount_centi,
            }
        }
        Ok(totals)
    }

    async fn withdraw(
        &self,
        customer_id: i64,
        order_number: &str,
        amount_centi: i64,
    ) -> Result<LedgerEntry, StoreError> {
        if amount_centi <= 0 {
            return Err(StoreError::Unavailable(format!(
                "debit amount must be positive, got {amount_centi}"
            )));
        }
        let mut inner = self.lock();
        // Check-then-append under one lock: the in-memory equivalent of the
        // serializable withdrawal transaction.
        let mut current = 0;
        for entry in inner.entries.iter().filter(|e| e.customer_id == customer_id) {
            match entry.kind {
                EntryKind::Credit => current += entry.amount_centi,
                EntryKind::Debit => current -= entry.amount_centi,
            }
        }
        if amount_centi > current {
            return Err(StoreError::InsufficientFunds {
                requested_centi: amount_centi,
                current_centi: current,
            });
        }
        inner.next_entry_id += 1;
        let entry = LedgerEntry {
            id: inner.next_entry_id,
            order_number: order_number.to_string(),
            customer_id,
            amount_centi,
            kind: EntryKind::Debit,
            created_at_utc: Utc::now(),
        };
        inner.entries.push(entry.clone());
        Ok(entry)
    }

    async fn list_withdrawals(&self, customer_id: i64) -> Result<Vec<LedgerEntry>, StoreError> {
        let inner = self.lock();
        let mut debits: Vec<LedgerEntry> = inner
            .entries
            .iter()
            .filter(|e| e.customer_id == customer_id && e.kind == EntryKind::Debit)
            .cloned()
            .collect();
        debits.sort_by(|a, b| {
            b.created_at_utc
                .cmp(&a.created_at_utc)
                .then(b.id.cmp(&a.id))
        });
        Ok(debits)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // --- orders ---

    #[tokio::test]
    async fn create_rejects_duplicate_number_for_any_customer() {
        let store = MemoryStore::new();
        store.create_order("79927398713", 1).await.unwrap();

        let same_owner = store.create_order("79927398713", 1).await;
        let other_owner = store.create_order("79927398713", 2).await;
        for result in [same_owner, other_owner] {
            assert_eq!(
                result.unwrap_err(),
                StoreError::DuplicateOrder {
                    number: "79927398713".to_string()
                }
            );
        }
        assert_eq!(store.order_count(), 1);
    }

    #[tokio::test]
    async fn claim_flips_new_to_processing_once() {
        let store = MemoryStore::new();
        store.create_order("1001", 1).await.unwrap();
        store.create_order("1002", 1).await.unwrap();

        let first = store.claim_pending_orders(10).await.unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|o| o.status == OrderStatus::Processing));

        // Nothing NEW is left; a second claim comes back empty.
        assert!(store.claim_pending_orders(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn claim_respects_limit_in_id_order() {
        let store = MemoryStore::new();
        for n in ["1001", "1002", "1003"] {
            store.create_order(n, 1).await.unwrap();
        }
        let claimed = store.claim_pending_orders(2).await.unwrap();
        let numbers: Vec<&str> = claimed.iter().map(|o| o.number.as_str()).collect();
        assert_eq!(numbers, vec!["1001", "1002"]);
    }

    #[tokio::test]
    async fn finalize_only_touches_processing_orders() {
        let store = MemoryStore::new();
        store.create_order("1001", 1).await.unwrap();

        // Not claimed yet: no-op.
        assert!(!store
            .finalize_order("1001", OrderStatus::Invalid)
            .await
            .unwrap());

        store.claim_pending_orders(1).await.unwrap();
        assert!(store
            .finalize_order("1001", OrderStatus::Invalid)
            .await
            .unwrap());

        // Terminal now: a late finalize changes nothing.
        assert!(!store
            .finalize_order("1001", OrderStatus::Processed)
            .await
            .unwrap());
        let order = store.find_order_by_number("1001").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Invalid);
    }

    #[tokio::test]
    async fn apply_accrual_credits_exactly_once() {
        let store = MemoryStore::new();
        store.create_order("1001", 7).await.unwrap();
        store.claim_pending_orders(1).await.unwrap();

        assert!(store.apply_accrual("1001", 7, 50_000).await.unwrap());
        // The claim is resolved; a stale claimant gets a no-op, not a second
        // credit.
        assert!(!store.apply_accrual("1001", 7, 50_000).await.unwrap());

        let entries = store.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, EntryKind::Credit);
        assert_eq!(entries[0].amount_centi, 50_000);
        let order = store.find_order_by_number("1001").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Processed);
    }

    #[tokio::test]
    async fn stale_claims_are_released_fresh_ones_kept() {
        let store = MemoryStore::new();
        store.create_order("1001", 1).await.unwrap();
        store.create_order("1002", 1).await.unwrap();
        store.claim_pending_orders(2).await.unwrap();

        // Only 1001 has been stuck longer than the lease.
        assert!(store.backdate_claim("1001", Utc::now() - chrono::Duration::minutes(10)));

        let cutoff = Utc::now() - chrono::Duration::minutes(5);
        let released = store.release_stale_claims(cutoff).await.unwrap();
        assert_eq!(released, vec!["1001".to_string()]);

        let stale = store.find_order_by_number("1001").await.unwrap().unwrap();
        let fresh = store.find_order_by_number("1002").await.unwrap().unwrap();
        assert_eq!(stale.status, OrderStatus::New);
        assert_eq!(fresh.status, OrderStatus::Processing);
    }

    #[tokio::test]
    async fn listing_shows_accrual_only_after_credit_newest_first() {
        let store = MemoryStore::new();
        store.create_order("1001", 1).await.unwrap();
        store.create_order("1002", 1).await.unwrap();
        store.create_order("2001", 2).await.unwrap();

        store.claim_pending_orders(10).await.unwrap();
        store.apply_accrual("1001", 1, 12_550).await.unwrap();
        store.finalize_order("1002", OrderStatus::New).await.unwrap();

        let listed = store.list_orders_for_customer(1).await.unwrap();
        assert_eq!(listed.len(), 2);
        // Newest first: 1002 was created after 1001.
        assert_eq!(listed[0].number, "1002");
        assert_eq!(listed[0].status, OrderStatus::New);
        assert_eq!(listed[0].accrual_centi, None);
        assert_eq!(listed[1].number, "1001");
        assert_eq!(listed[1].status, OrderStatus::Processed);
        assert_eq!(listed[1].accrual_centi, Some(12_550));
    }

    // --- ledger ---

    #[tokio::test]
    async fn record_rejects_non_positive_amounts() {
        let store = MemoryStore::new();
        for amount in [0, -1] {
            let result = store
                .record_ledger_entry("1001", 1, amount, EntryKind::Credit)
                .await;
            assert!(matches!(result, Err(StoreError::Unavailable(_))));
        }
        assert!(store.entries().is_empty());
    }

    #[tokio::test]
    async fn sums_are_per_customer() {
        let store = MemoryStore::new();
        store
            .record_ledger_entry("1001", 1, 50_000, EntryKind::Credit)
            .await
            .unwrap();
        store
            .record_ledger_entry("1001", 1, 20_000, EntryKind::Debit)
            .await
            .unwrap();
        store
            .record_ledger_entry("2001", 2, 7_700, EntryKind::Credit)
            .await
            .unwrap();

        assert_eq!(
            store.sum_by_kind(1).await.unwrap(),
            LedgerTotals {
                credit_centi: 50_000,
                debit_centi: 20_000,
            }
        );
        assert_eq!(
            store.sum_by_kind(2).await.unwrap(),
            LedgerTotals {
                credit_centi: 7_700,
                debit_centi: 0,
            }
        );
    }

    #[tokio::test]
    async fn withdraw_never_overdraws() {
        let store = MemoryStore::new();
        store
            .record_ledger_entry("1001", 1, 50_000, EntryKind::Credit)
            .await
            .unwrap();

        store.withdraw(1, "2377225624", 20_000).await.unwrap();
        let denied = store.withdraw(1, "2377225624", 40_000).await.unwrap_err();
        assert_eq!(
            denied,
            StoreError::InsufficientFunds {
                requested_centi: 40_000,
                current_centi: 30_000,
            }
        );

        // The denied attempt wrote nothing.
        let totals = store.sum_by_kind(1).await.unwrap();
        assert_eq!(totals.debit_centi, 20_000);
    }

    #[tokio::test]
    async fn withdrawals_listed_newest_first() {
        let store = MemoryStore::new();
        store
            .record_ledger_entry("1001", 1, 90_000, EntryKind::Credit)
            .await
            .unwrap();
        store.withdraw(1, "2377225624", 10_000).await.unwrap();
        store.withdraw(1, "3182649", 20_000).await.unwrap();

        let listed = store.list_withdrawals(1).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].order_number, "3182649");
        assert_eq!(listed[1].order_number, "2377225624");
        assert!(listed.iter().all(|e| e.kind == EntryKind::Debit));
    }
}
