//! tally-store
//!
//! Persistence for the loyalty ledger: the `OrderStore` / `BalanceStore`
//! capability traits, the Postgres implementation, pool helpers and embedded
//! migrations.
//!
//! Exactly two tables back the whole system — `orders` and `ledger_entries`.
//! Ledger entries are append-only; every balance is recomputed from them at
//! read time. The store is the single source of truth: nothing above it
//! caches order or balance state.

pub mod postgres;

use std::fmt;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use tally_domain::points::format_centi;
use tally_domain::{EntryKind, LedgerEntry, LedgerTotals, Order, OrderStatus, OrderWithAccrual};

pub use postgres::PgStore;

pub const ENV_DB_URL: &str = "TALLY_DATABASE_URL";

/// Connect to Postgres at `url`.
pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Connect to Postgres using TALLY_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url =
        std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

/// Errors surfaced by store operations.
///
/// The first three are logical outcomes callers branch on; `Unavailable`
/// means the backing storage failed and the unit of work was rolled back —
/// nothing was partially written.
#[derive(Debug, PartialEq)]
pub enum StoreError {
    /// The order number is already registered (unique constraint).
    DuplicateOrder { number: String },
    /// The referenced order does not exist.
    OrderNotFound { number: String },
    /// A withdrawal asked for more than the current balance.
    InsufficientFunds {
        requested_centi: i64,
        current_centi: i64,
    },
    /// Storage failed; the operation was aborted with no partial writes.
    Unavailable(String),
}

impl StoreError {
    pub(crate) fn backend(context: &str, err: impl fmt::Display) -> StoreError {
        StoreError::Unavailable(format!("{context}: {err}"))
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::DuplicateOrder { number } => {
                write!(f, "order '{number}' is already registered")
            }
            StoreError::OrderNotFound { number } => {
                write!(f, "order '{number}' not found")
            }
            StoreError::InsufficientFunds {
                requested_centi,
                current_centi,
            } => write!(
                f,
                "insufficient funds: requested {} against a balance of {}",
                format_centi(*requested_centi),
                format_centi(*current_centi)
            ),
            StoreError::Unavailable(msg) => write!(f, "storage unavailable: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// Order persistence and the claim/settle primitives the reconciliation
/// worker dispatches through.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert a new order with status NEW. A second insert of the same
    /// number fails with [`StoreError::DuplicateOrder`] regardless of owner;
    /// the caller resolves who owns it.
    async fn create_order(&self, number: &str, customer_id: i64) -> Result<Order, StoreError>;

    async fn find_order_by_number(&self, number: &str) -> Result<Option<Order>, StoreError>;

    /// Every order of the customer paired with its CREDIT total, newest
    /// first.
    async fn list_orders_for_customer(
        &self,
        customer_id: i64,
    ) -> Result<Vec<OrderWithAccrual>, StoreError>;

    /// Atomically flip up to `limit` NEW orders to PROCESSING and return
    /// them, stamping the claim lease. Single conditional read-modify-write:
    /// two concurrent claims can never return the same order.
    async fn claim_pending_orders(&self, limit: i64) -> Result<Vec<Order>, StoreError>;

    /// Move a PROCESSING order to `new_status` (terminal, or back to NEW on
    /// requeue), clearing the claim lease. Returns `false` without touching
    /// anything when the order is not currently PROCESSING — some other
    /// actor already resolved the claim.
    async fn finalize_order(
        &self,
        number: &str,
        new_status: OrderStatus,
    ) -> Result<bool, StoreError>;

    /// One transaction: set the order PROCESSED *and* append the CREDIT
    /// entry — both or neither. Guarded like [`finalize_order`]; returns
    /// `false` (and writes no credit) when the order is no longer
    /// PROCESSING, so a stale claimant can never double-credit.
    /// `amount_centi` must be > 0.
    async fn apply_accrual(
        &self,
        number: &str,
        customer_id: i64,
        amount_centi: i64,
    ) -> Result<bool, StoreError>;

    /// Requeue to NEW every PROCESSING order claimed before
    /// `claimed_before`, returning the affected order numbers. The watchdog
    /// half of the claim lease: heals orders orphaned by a crash between
    /// claim and requeue.
    async fn release_stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError>;
}

/// Append-only ledger access and the transactional withdrawal.
#[async_trait]
pub trait BalanceStore: Send + Sync {
    /// Append one entry. `amount_centi` must be > 0.
    async fn record_ledger_entry(
        &self,
        order_number: &str,
        customer_id: i64,
        amount_centi: i64,
        kind: EntryKind,
    ) -> Result<LedgerEntry, StoreError>;

    /// Aggregate CREDIT and DEBIT totals for the customer.
    async fn sum_by_kind(&self, customer_id: i64) -> Result<LedgerTotals, StoreError>;

    /// Under serializable isolation: recompute current = credits − debits,
    /// fail with [`StoreError::InsufficientFunds`] if `amount_centi`
    /// exceeds it, otherwise append the DEBIT and commit. Concurrent
    /// withdrawals against the same customer serialize here; exactly one of
    /// two racing withdrawals that only one balance can honor succeeds.
    async fn withdraw(
        &self,
        customer_id: i64,
        order_number: &str,
        amount_centi: i64,
    ) -> Result<LedgerEntry, StoreError>;

    /// DEBIT entries for the customer, newest first.
    async fn list_withdrawals(&self, customer_id: i64) -> Result<Vec<LedgerEntry>, StoreError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_duplicate() {
        let e = StoreError::DuplicateOrder {
            number: "79927398713".to_string(),
        };
        assert_eq!(e.to_string(), "order '79927398713' is already registered");
    }

    #[test]
    fn error_display_insufficient_funds() {
        let e = StoreError::InsufficientFunds {
            requested_centi: 40_000,
            current_centi: 30_000,
        };
        assert_eq!(
            e.to_string(),
            "insufficient funds: requested 400 against a balance of 300"
        );
    }

    #[test]
    fn error_display_unavailable() {
        let e = StoreError::backend("claim batch", "connection reset");
        assert_eq!(
            e.to_string(),
            "storage unavailable: claim batch: connection reset"
        );
    }
}
