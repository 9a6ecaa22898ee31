//! Postgres implementation of the store traits.
//!
//! Conventions:
//! - runtime `sqlx::query` + `try_get`, no compile-time checked macros, so
//!   the crate builds without a live database;
//! - claim and settle writes are guarded on the current status so a stale
//!   worker's late write degrades to a counted no-op instead of a double
//!   credit;
//! - withdrawal runs under SERIALIZABLE isolation with a bounded retry on
//!   serialization conflicts (SQLSTATE 40001).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::warn;

use tally_domain::{EntryKind, LedgerEntry, LedgerTotals, Order, OrderStatus, OrderWithAccrual};

use crate::{BalanceStore, OrderStore, StoreError};

/// Number of times a withdrawal is attempted before a serialization
/// conflict is surfaced as a storage fault.
const WITHDRAW_ATTEMPTS: u32 = 3;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ---------------------------------------------------------------------------
// OrderStore
// ---------------------------------------------------------------------------

#[async_trait]
impl OrderStore for PgStore {
    async fn create_order(&self, number: &str, customer_id: i64) -> Result<Order, StoreError> {
        let res = sqlx::query(
            r#"
            insert into orders (number, customer_id)
            values ($1, $2)
            returning id, number, status, customer_id, created_at_utc
            "#,
        )
        .bind(number)
        .bind(customer_id)
        .fetch_one(&self.pool)
        .await;

        match res {
            Ok(row) => order_from_row(&row).map_err(decode_err("decode order row")),
            Err(e) => {
                if is_unique_constraint_violation(&e, "orders_number_key") {
                    return Err(StoreError::DuplicateOrder {
                        number: number.to_string(),
                    });
                }
                Err(StoreError::backend("create_order insert failed", e))
            }
        }
    }

    async fn find_order_by_number(&self, number: &str) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(
            r#"
            select id, number, status, customer_id, created_at_utc
            from orders
            where number = $1
            "#,
        )
        .bind(number)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::backend("find_order_by_number failed", e))?;

        match row {
            Some(row) => Ok(Some(
                order_from_row(&row).map_err(decode_err("decode order row"))?,
            )),
            None => Ok(None),
        }
    }

    async fn list_orders_for_customer(
        &self,
        customer_id: i64,
    ) -> Result<Vec<OrderWithAccrual>, StoreError> {
        let rows = sqlx::query(
            r#"
            select
              o.number,
              o.status,
              sum(e.amount_centi)::bigint as accrual_centi,
              o.created_at_utc
            from orders o
            left join ledger_entries e
              on e.order_number = o.number and e.kind = 'CREDIT'
            where o.customer_id = $1
            group by o.id, o.number, o.status, o.created_at_utc
            order by o.created_at_utc desc, o.id desc
            "#,
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::backend("list_orders_for_customer failed", e))?;

        rows.iter()
            .map(|row| {
                order_with_accrual_from_row(row).map_err(decode_err("decode order listing row"))
            })
            .collect()
    }

    async fn claim_pending_orders(&self, limit: i64) -> Result<Vec<Order>, StoreError> {
        // SKIP LOCKED makes concurrent claimants take disjoint batches
        // instead of queueing on each other's row locks.
        let rows = sqlx::query(
            r#"
            update orders
            set status = 'PROCESSING', claimed_at_utc = now()
            where id in (
                select id
                from orders
                where status = 'NEW'
                order by id
                limit $1
                for update skip locked
            )
            returning id, number, status, customer_id, created_at_utc
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::backend("claim_pending_orders failed", e))?;

        rows.iter()
            .map(|row| order_from_row(row).map_err(decode_err("decode claimed order row")))
            .collect()
    }

    async fn finalize_order(
        &self,
        number: &str,
        new_status: OrderStatus,
    ) -> Result<bool, StoreError> {
        let res = sqlx::query(
            r#"
            update orders
            set status = $2, claimed_at_utc = null
            where number = $1 and status = 'PROCESSING'
            "#,
        )
        .bind(number)
        .bind(new_status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::backend("finalize_order failed", e))?;

        Ok(res.rows_affected() > 0)
    }

    async fn apply_accrual(
        &self,
        number: &str,
        customer_id: i64,
        amount_centi: i64,
    ) -> Result<bool, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::backend("apply_accrual begin failed", e))?;

        let res = sqlx::query(
            r#"
            update orders
            set status = 'PROCESSED', claimed_at_utc = null
            where number = $1 and status = 'PROCESSING'
            "#,
        )
        .bind(number)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::backend("apply_accrual status update failed", e))?;

        if res.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| StoreError::backend("apply_accrual rollback failed", e))?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            insert into ledger_entries (order_number, customer_id, amount_centi, kind)
            values ($1, $2, $3, 'CREDIT')
            "#,
        )
        .bind(number)
        .bind(customer_id)
        .bind(amount_centi)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::backend("apply_accrual credit insert failed", e))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::backend("apply_accrual commit failed", e))?;

        Ok(true)
    }

    async fn release_stale_claims(
        &self,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            r#"
            update orders
            set status = 'NEW', claimed_at_utc = null
            where status = 'PROCESSING' and claimed_at_utc < $1
            returning number
            "#,
        )
        .bind(claimed_before)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::backend("release_stale_claims failed", e))?;

        rows.iter()
            .map(|row| {
                row.try_get("number")
                    .map_err(|e| StoreError::backend("decode released order number", e))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// BalanceStore
// ---------------------------------------------------------------------------

#[async_trait]
impl BalanceStore for PgStore {
    async fn record_ledger_entry(
        &self,
        order_number: &str,
        customer_id: i64,
        amount_centi: i64,
        kind: EntryKind,
    ) -> Result<LedgerEntry, StoreError> {
        let row = sqlx::query(
            r#"
            insert into ledger_entries (order_number, customer_id, amount_centi, kind)
            values ($1, $2, $3, $4)
            returning id, order_number, customer_id, amount_centi, kind, created_at_utc
            "#,
        )
        .bind(order_number)
        .bind(customer_id)
        .bind(amount_centi)
        .bind(kind.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::backend("record_ledger_entry insert failed", e))?;

        entry_from_row(&row).map_err(decode_err("decode ledger entry row"))
    }

    async fn sum_by_kind(&self, customer_id: i64) -> Result<LedgerTotals, StoreError> {
        let row = sqlx::query(
            r#"
            select
              coalesce(sum(amount_centi) filter (where kind = 'CREDIT'), 0)::bigint as credit_centi,
              coalesce(sum(amount_centi) filter (where kind = 'DEBIT'), 0)::bigint as debit_centi
            from ledger_entries
            where customer_id = $1
            "#,
        )
        .bind(customer_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::backend("sum_by_kind failed", e))?;

        Ok(LedgerTotals {
            credit_centi: row
                .try_get("credit_centi")
                .map_err(|e| StoreError::backend("decode credit total", e))?,
            debit_centi: row
                .try_get("debit_centi")
                .map_err(|e| StoreError::backend("decode debit total", e))?,
        })
    }

    async fn withdraw(
        &self,
        customer_id: i64,
        order_number: &str,
        amount_centi: i64,
    ) -> Result<LedgerEntry, StoreError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self
                .withdraw_once(customer_id, order_number, amount_centi)
                .await
            {
                Ok(entry) => return Ok(entry),
                Err(WithdrawAttempt::Halt(err)) => return Err(err),
                Err(WithdrawAttempt::Conflict(db_err)) => {
                    if attempt >= WITHDRAW_ATTEMPTS {
                        return Err(StoreError::backend(
                            "withdraw gave up after repeated serialization conflicts",
                            db_err,
                        ));
                    }
                    warn!(
                        customer_id,
                        order_number, attempt, "withdraw serialization conflict, retrying"
                    );
                }
            }
        }
    }

    async fn list_withdrawals(&self, customer_id: i64) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            select id, order_number, customer_id, amount_centi, kind, created_at_utc
            from ledger_entries
            where customer_id = $1 and kind = 'DEBIT'
            order by created_at_utc desc, id desc
            "#,
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::backend("list_withdrawals failed", e))?;

        rows.iter()
            .map(|row| entry_from_row(row).map_err(decode_err("decode ledger entry row")))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Withdrawal transaction
// ---------------------------------------------------------------------------

/// Outcome classification for a single withdrawal attempt. Serialization
/// conflicts are the only retryable failure.
enum WithdrawAttempt {
    Halt(StoreError),
    Conflict(sqlx::Error),
}

fn classify_tx_err(context: &'static str, err: sqlx::Error) -> WithdrawAttempt {
    if is_serialization_failure(&err) {
        WithdrawAttempt::Conflict(err)
    } else {
        WithdrawAttempt::Halt(StoreError::backend(context, err))
    }
}

impl PgStore {
    async fn withdraw_once(
        &self,
        customer_id: i64,
        order_number: &str,
        amount_centi: i64,
    ) -> Result<LedgerEntry, WithdrawAttempt> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| classify_tx_err("withdraw begin failed", e))?;

        sqlx::query("set transaction isolation level serializable")
            .execute(&mut *tx)
            .await
            .map_err(|e| classify_tx_err("withdraw set isolation failed", e))?;

        let row = sqlx::query(
            r#"
            select
              coalesce(sum(amount_centi) filter (where kind = 'CREDIT'), 0)::bigint as credit_centi,
              coalesce(sum(amount_centi) filter (where kind = 'DEBIT'), 0)::bigint as debit_centi
            from ledger_entries
            where customer_id = $1
            "#,
        )
        .bind(customer_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| classify_tx_err("withdraw balance read failed", e))?;

        let credit: i64 = row
            .try_get("credit_centi")
            .map_err(|e| WithdrawAttempt::Halt(StoreError::backend("decode credit total", e)))?;
        let debit: i64 = row
            .try_get("debit_centi")
            .map_err(|e| WithdrawAttempt::Halt(StoreError::backend("decode debit total", e)))?;
        let current = credit - debit;

        if amount_centi > current {
            let _ = tx.rollback().await;
            return Err(WithdrawAttempt::Halt(StoreError::InsufficientFunds {
                requested_centi: amount_centi,
                current_centi: current,
            }));
        }

        let row = sqlx::query(
            r#"
            insert into ledger_entries (order_number, customer_id, amount_centi, kind)
            values ($1, $2, $3, 'DEBIT')
            returning id, order_number, customer_id, amount_centi, kind, created_at_utc
            "#,
        )
        .bind(order_number)
        .bind(customer_id)
        .bind(amount_centi)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| classify_tx_err("withdraw debit insert failed", e))?;

        let entry = entry_from_row(&row)
            .map_err(|e| WithdrawAttempt::Halt(StoreError::backend("decode ledger entry row", e)))?;

        // Serialization conflicts most often surface at commit.
        tx.commit()
            .await
            .map_err(|e| classify_tx_err("withdraw commit failed", e))?;

        Ok(entry)
    }
}

// ---------------------------------------------------------------------------
// Row mapping and error classification
// ---------------------------------------------------------------------------

fn order_from_row(row: &PgRow) -> anyhow::Result<Order> {
    Ok(Order {
        id: row.try_get("id")?,
        number: row.try_get("number")?,
        status: OrderStatus::parse(&row.try_get::<String, _>("status")?)?,
        customer_id: row.try_get("customer_id")?,
        created_at_utc: row.try_get("created_at_utc")?,
    })
}

fn order_with_accrual_from_row(row: &PgRow) -> anyhow::Result<OrderWithAccrual> {
    Ok(OrderWithAccrual {
        number: row.try_get("number")?,
        status: OrderStatus::parse(&row.try_get::<String, _>("status")?)?,
        accrual_centi: row.try_get("accrual_centi")?,
        created_at_utc: row.try_get("created_at_utc")?,
    })
}

fn entry_from_row(row: &PgRow) -> anyhow::Result<LedgerEntry> {
    Ok(LedgerEntry {
        id: row.try_get("id")?,
        order_number: row.try_get("order_number")?,
        customer_id: row.try_get("customer_id")?,
        amount_centi: row.try_get("amount_centi")?,
        kind: EntryKind::parse(&row.try_get::<String, _>("kind")?)?,
        created_at_utc: row.try_get("created_at_utc")?,
    })
}

fn decode_err(what: &'static str) -> impl Fn(anyhow::Error) -> StoreError {
    move |e| StoreError::backend(what, e)
}

/// Detect a Postgres unique constraint violation by name.
fn is_unique_constraint_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint() == Some(constraint),
        _ => false,
    }
}

/// Detect a Postgres serialization failure (SQLSTATE 40001).
fn is_serialization_failure(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("40001"),
        _ => false,
    }
}
