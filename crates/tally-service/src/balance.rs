//! Balance reads and consistency-checked withdrawals.
//!
//! Balances are never stored: every read aggregates the ledger. The
//! withdrawal path validates format and order ownership here, then delegates
//! the no-overdraft decision to the store, whose transaction is the only
//! place a balance check and a debit can be made atomic.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::error;

use tally_domain::points::format_centi;
use tally_domain::{luhn, CustomerSummary};
use tally_store::{BalanceStore, OrderStore, StoreError};

// ---------------------------------------------------------------------------
// Outcome and error types
// ---------------------------------------------------------------------------

/// One completed withdrawal, as shown to the customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Withdrawal {
    pub order_number: String,
    pub amount_centi: i64,
    pub processed_at_utc: DateTime<Utc>,
}

#[derive(Debug, PartialEq)]
pub enum WithdrawError {
    /// Non-positive amount or a checksum-failing order number.
    InvalidFormat { reason: String },
    /// The customer has no order with this number. A number registered to
    /// someone else reads the same way — from the requester's side such an
    /// order does not exist.
    OrderNotFound { number: String },
    /// The ledger cannot honor the amount. Nothing was written.
    InsufficientFunds {
        requested_centi: i64,
        current_centi: i64,
    },
    /// The store failed; nothing was written.
    Store(StoreError),
}

impl fmt::Display for WithdrawError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WithdrawError::InvalidFormat { reason } => write!(f, "{reason}"),
            WithdrawError::OrderNotFound { number } => {
                write!(f, "no order '{number}' for this customer")
            }
            WithdrawError::InsufficientFunds {
                requested_centi,
                current_centi,
            } => write!(
                f,
                "insufficient funds: requested {} against a balance of {}",
                format_centi(*requested_centi),
                format_centi(*current_centi)
            ),
            WithdrawError::Store(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for WithdrawError {}

// ---------------------------------------------------------------------------
// BalanceService
// ---------------------------------------------------------------------------

pub struct BalanceService {
    orders: Arc<dyn OrderStore>,
    ledger: Arc<dyn BalanceStore>,
}

impl BalanceService {
    pub fn new(orders: Arc<dyn OrderStore>, ledger: Arc<dyn BalanceStore>) -> Self {
        Self { orders, ledger }
    }

    /// Current and withdrawn totals, recomputed from the ledger.
    ///
    /// Strictly `current = credits − debits`. A negative result means
    /// something wrote around the withdrawal guard; it is logged as a
    /// data-integrity fault and reported as zero, never as a negative
    /// balance.
    pub async fn summary(&self, customer_id: i64) -> Result<CustomerSummary, StoreError> {
        let totals = self.ledger.sum_by_kind(customer_id).await?;
        let current = totals.credit_centi - totals.debit_centi;
        if current < 0 {
            error!(
                customer_id,
                credit_centi = totals.credit_centi,
                debit_centi = totals.debit_centi,
                "ledger integrity fault: debits exceed credits"
            );
        }
        Ok(CustomerSummary {
            current_centi: current.max(0),
            withdrawn_centi: totals.debit_centi,
        })
    }

    /// Spend `amount_centi` against the balance, referencing `order_number`.
    ///
    /// The reference must be a checksum-valid number of an order this
    /// customer owns; it does not need to be settled. The balance check and
    /// the debit happen atomically inside the store.
    pub async fn withdraw(
        &self,
        customer_id: i64,
        order_number: &str,
        amount_centi: i64,
    ) -> Result<Withdrawal, WithdrawError> {
        if amount_centi <= 0 {
            return Err(WithdrawError::InvalidFormat {
                reason: format!(
                    "withdrawal amount must be positive, got {}",
                    format_centi(amount_centi)
                ),
            });
        }
        if !luhn::is_valid(order_number) {
            return Err(WithdrawError::InvalidFormat {
                reason: format!("order number '{order_number}' is not a valid order number"),
            });
        }

        let owned = match self
            .orders
            .find_order_by_number(order_number)
            .await
            .map_err(WithdrawError::Store)?
        {
            Some(order) => order.customer_id == customer_id,
            None => false,
        };
        if !owned {
            return Err(WithdrawError::OrderNotFound {
                number: order_number.to_string(),
            });
        }

        match self.ledger.withdraw(customer_id, order_number, amount_centi).await {
            Ok(entry) => Ok(Withdrawal {
                order_number: entry.order_number,
                amount_centi: entry.amount_centi,
                processed_at_utc: entry.created_at_utc,
            }),
            Err(StoreError::InsufficientFunds {
                requested_centi,
                current_centi,
            }) => Err(WithdrawError::InsufficientFunds {
                requested_centi,
                current_centi,
            }),
            Err(err) => Err(WithdrawError::Store(err)),
        }
    }

    /// The customer's withdrawals, newest first.
    pub async fn withdrawals(&self, customer_id: i64) -> Result<Vec<Withdrawal>, StoreError> {
        let entries = self.ledger.list_withdrawals(customer_id).await?;
        Ok(entries
            .into_iter()
            .map(|entry| Withdrawal {
                order_number: entry.order_number,
                amount_centi: entry.amount_centi,
                processed_at_utc: entry.created_at_utc,
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
