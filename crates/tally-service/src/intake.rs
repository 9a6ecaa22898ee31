//! Idempotent order intake.
//!
//! Submitting a number twice is part of normal operation (double-taps,
//! client retries), so a repeat by the owner is a distinct success, not an
//! error. The validator's pre-check routes the common cases; the store's
//! unique constraint is the authority when two submissions race, and intake
//! resolves a lost race by re-reading who actually won.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use tally_domain::{Order, OrderWithAccrual};
use tally_store::{OrderStore, StoreError};

use crate::validator::{OrderValidator, Ownership, ValidateError};

// ---------------------------------------------------------------------------
// Outcome and error types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A new order row was created with status NEW.
    Accepted(Order),
    /// The same customer already submitted this number. Nothing was written.
    AlreadyAccepted,
}

#[derive(Debug, PartialEq)]
pub enum IntakeError {
    /// Empty, non-digit, or checksum-failing order number.
    InvalidFormat { number: String },
    /// The number is registered to a different customer.
    Conflict { number: String },
    /// The store failed; nothing was written.
    Store(StoreError),
}

impl fmt::Display for IntakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntakeError::InvalidFormat { number } => {
                write!(f, "order number '{number}' is not a valid order number")
            }
            IntakeError::Conflict { number } => {
                write!(f, "order '{number}' is registered to another customer")
            }
            IntakeError::Store(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for IntakeError {}

// ---------------------------------------------------------------------------
// OrderIntake
// ---------------------------------------------------------------------------

pub struct OrderIntake {
    store: Arc<dyn OrderStore>,
    validator: OrderValidator,
}

impl OrderIntake {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        let validator = OrderValidator::new(store.clone());
        Self { store, validator }
    }

    /// Register `number` for `customer_id`.
    ///
    /// The checksum gate runs before anything touches the store. After that
    /// the validator routes the common cases, and a creation that loses a
    /// race to a concurrent submission falls back to re-reading the winner —
    /// the outcome is the same as if the loser had arrived a moment later.
    pub async fn submit(
        &self,
        number: &str,
        customer_id: i64,
    ) -> Result<SubmitOutcome, IntakeError> {
        match self.validator.validate(number, customer_id).await {
            Ok(Ownership::Available) => {}
            Ok(Ownership::AlreadyOwned) => return Ok(SubmitOutcome::AlreadyAccepted),
            Ok(Ownership::OwnedByOther) => {
                return Err(IntakeError::Conflict {
                    number: number.to_string(),
                })
            }
            Err(ValidateError::InvalidFormat { number }) => {
                return Err(IntakeError::InvalidFormat { number })
            }
            Err(ValidateError::Store(err)) => return Err(IntakeError::Store(err)),
        }

        match self.store.create_order(number, customer_id).await {
            Ok(order) => Ok(SubmitOutcome::Accepted(order)),
            Err(StoreError::DuplicateOrder { .. }) => {
                debug!(number, customer_id, "creation lost a race, re-resolving owner");
                match self
                    .store
                    .find_order_by_number(number)
                    .await
                    .map_err(IntakeError::Store)?
                {
                    Some(order) if order.customer_id == customer_id => {
                        Ok(SubmitOutcome::AlreadyAccepted)
                    }
                    Some(_) => Err(IntakeError::Conflict {
                        number: number.to_string(),
                    }),
                    // Orders are never deleted; a vanished winner means the
                    // store is lying to us.
                    None => Err(IntakeError::Store(StoreError::Unavailable(format!(
                        "order '{number}' hit the unique constraint but cannot be read back"
                    )))),
                }
            }
            Err(err) => Err(IntakeError::Store(err)),
        }
    }

    /// Every order of the customer with its credited total, newest first.
    pub async fn list_orders(
        &self,
        customer_id: i64,
    ) -> Result<Vec<OrderWithAccrual>, StoreError> {
        self.store.list_orders_for_customer(customer_id).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use tally_domain::OrderStatus;
    use tally_testkit::MemoryStore;

    const NUMBER: &str = "4561261212345467";

    fn intake() -> (Arc<MemoryStore>, OrderIntake) {
        let store = Arc::new(MemoryStore::new());
        let intake = OrderIntake::new(store.clone());
        (store, intake)
    }

    // --- submit ---

    #[tokio::test]
    async fn valid_new_number_is_accepted() {
        let (store, intake) = intake();
        let outcome = intake.submit(NUMBER, 1).await.unwrap();
        match outcome {
            SubmitOutcome::Accepted(order) => {
                assert_eq!(order.number, NUMBER);
                assert_eq!(order.customer_id, 1);
                assert_eq!(order.status, OrderStatus::New);
            }
            SubmitOutcome::AlreadyAccepted => panic!("expected a fresh acceptance"),
        }
        assert_eq!(store.order_count(), 1);
    }

    #[tokio::test]
    async fn repeat_by_owner_is_idempotent() {
        let (store, intake) = intake();
        intake.submit(NUMBER, 1).await.unwrap();

        let outcome = intake.submit(NUMBER, 1).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::AlreadyAccepted);
        assert_eq!(store.order_count(), 1, "idempotent repeat created a row");
    }

    #[tokio::test]
    async fn foreign_number_is_a_conflict() {
        let (store, intake) = intake();
        intake.submit(NUMBER, 1).await.unwrap();

        let err = intake.submit(NUMBER, 2).await.unwrap_err();
        assert_eq!(
            err,
            IntakeError::Conflict {
                number: NUMBER.to_string()
            }
        );
        assert_eq!(store.order_count(), 1);
    }

    #[tokio::test]
    async fn malformed_numbers_never_reach_the_store() {
        let (store, intake) = intake();
        for number in ["", "123a", "4561261212345464"] {
            let err = intake.submit(number, 1).await.unwrap_err();
            assert_eq!(
                err,
                IntakeError::InvalidFormat {
                    number: number.to_string()
                }
            );
        }
        assert_eq!(store.order_count(), 0);
    }

    // --- the creation race ---

    /// Store wrapper that makes the validator miss an existing order once,
    /// forcing `submit` down the lost-race path where only the unique
    /// constraint stands.
    struct RacingStore {
        inner: Arc<MemoryStore>,
        hide_first_lookup: AtomicBool,
    }

    #[async_trait]
    impl tally_store::OrderStore for RacingStore {
        async fn create_order(
            &self,
            number: &str,
            customer_id: i64,
        ) -> Result<Order, StoreError> {
            self.inner.create_order(number, customer_id).await
        }

        async fn find_order_by_number(&self, number: &str) -> Result<Option<Order>, StoreError> {
            if self.hide_first_lookup.swap(false, Ordering::SeqCst) {
                return Ok(None);
            }
            self.inner.find_order_by_number(number).await
        }

        async fn list_orders_for_customer(
            &self,
            customer_id: i64,
        ) -> Result<Vec<OrderWithAccrual>, StoreError> {
            self.inner.list_orders_for_customer(customer_id).await
        }

        async fn claim_pending_orders(&self, limit: i64) -> Result<Vec<Order>, StoreError> {
            self.inner.claim_pending_orders(limit).await
        }

        async fn finalize_order(
            &self,
            number: &str,
            new_status: OrderStatus,
        ) -> Result<bool, StoreError> {
            self.inner.finalize_order(number, new_status).await
        }

        async fn apply_accrual(
            &self,
            number: &str,
            customer_id: i64,
            amount_centi: i64,
        ) -> Result<bool, StoreError> {
            self.inner.apply_accrual(number, customer_id, amount_centi).await
        }

        async fn release_stale_claims(
            &self,
            claimed_before: DateTime<Utc>,
        ) -> Result<Vec<String>, StoreError> {
            self.inner.release_stale_claims(claimed_before).await
        }
    }

    #[tokio::test]
    async fn lost_race_against_self_is_idempotent() {
        let memory = Arc::new(MemoryStore::new());
        memory.create_order(NUMBER, 1).await.unwrap();
        let racing = Arc::new(RacingStore {
            inner: memory.clone(),
            hide_first_lookup: AtomicBool::new(true),
        });
        let intake = OrderIntake::new(racing);

        // The validator sees nothing, creation hits the constraint, and the
        // re-read finds our own earlier submission.
        let outcome = intake.submit(NUMBER, 1).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::AlreadyAccepted);
        assert_eq!(memory.order_count(), 1);
    }

    #[tokio::test]
    async fn lost_race_against_other_customer_is_a_conflict() {
        let memory = Arc::new(MemoryStore::new());
        memory.create_order(NUMBER, 2).await.unwrap();
        let racing = Arc::new(RacingStore {
            inner: memory.clone(),
            hide_first_lookup: AtomicBool::new(true),
        });
        let intake = OrderIntake::new(racing);

        let err = intake.submit(NUMBER, 1).await.unwrap_err();
        assert_eq!(
            err,
            IntakeError::Conflict {
                number: NUMBER.to_string()
            }
        );
        assert_eq!(memory.order_count(), 1);
    }

    // --- listing ---

    #[tokio::test]
    async fn listing_is_scoped_to_the_customer_newest_first() {
        let (store, intake) = intake();
        intake.submit("4561261212345467", 1).await.unwrap();
        intake.submit("79927398713", 1).await.unwrap();
        intake.submit("12345678903", 2).await.unwrap();

        // Settle the first order so the listing carries its accrual.
        store.claim_pending_orders(10).await.unwrap();
        store.apply_accrual("4561261212345467", 1, 50_000).await.unwrap();

        let listed = intake.list_orders(1).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].number, "79927398713");
        assert_eq!(listed[0].accrual_centi, None);
        assert_eq!(listed[1].number, "4561261212345467");
        assert_eq!(listed[1].status, OrderStatus::Processed);
        assert_eq!(listed[1].accrual_centi, Some(50_000));

        let other = intake.list_orders(2).await.unwrap();
        assert_eq!(other.len(), 1);
        assert_eq!(other[0].number, "12345678903");
    }

    #[tokio::test]
    async fn listing_for_unknown_customer_is_empty() {
        let (_, intake) = intake();
        assert!(intake.list_orders(42).await.unwrap().is_empty());
    }
}
