//! tally-domain
//!
//! Pure domain types for the loyalty-points ledger: orders, ledger entries,
//! derived balance views, plus the order-number checksum and the integer
//! amount representation.
//!
//! This crate does **not**:
//! - talk to the database (that is `tally-store`)
//! - call the accrual authority (that is `tally-accrual`)
//! - decide intake/withdrawal policy (that is `tally-service`)

pub mod luhn;
pub mod points;

use anyhow::anyhow;
use chrono::{DateTime, Utc};

// ---------------------------------------------------------------------------
// OrderStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a submitted order.
///
/// `New` orders are eligible for claiming by the reconciliation worker;
/// `Processing` marks an order claimed by a worker pass; `Invalid` and
/// `Processed` are terminal. A transient upstream failure moves a claimed
/// order back to `New`, never forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    New,
    Processing,
    Invalid,
    Processed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Invalid => "INVALID",
            OrderStatus::Processed => "PROCESSED",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "NEW" => Ok(OrderStatus::New),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "INVALID" => Ok(OrderStatus::Invalid),
            "PROCESSED" => Ok(OrderStatus::Processed),
            other => Err(anyhow!(
                "invalid order status '{}'. expected one of: NEW | PROCESSING | INVALID | PROCESSED",
                other
            )),
        }
    }

    /// Terminal statuses are never revisited by the worker.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Invalid | OrderStatus::Processed)
    }
}

// ---------------------------------------------------------------------------
// EntryKind
// ---------------------------------------------------------------------------

/// Sign tag of a ledger entry. Amounts are stored as unsigned magnitudes;
/// the kind carries the direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Credit,
    Debit,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Credit => "CREDIT",
            EntryKind::Debit => "DEBIT",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "CREDIT" => Ok(EntryKind::Credit),
            "DEBIT" => Ok(EntryKind::Debit),
            other => Err(anyhow!(
                "invalid ledger entry kind '{}'. expected CREDIT | DEBIT",
                other
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

/// A customer order registered for loyalty-point evaluation.
///
/// The order number is external input (digit string, globally unique across
/// customers); `id` is assigned by the store at creation. Orders are never
/// deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: i64,
    pub number: String,
    pub status: OrderStatus,
    pub customer_id: i64,
    pub created_at_utc: DateTime<Utc>,
}

/// An order paired with the CREDIT total the authority awarded it, if any.
/// This is the read model behind the customer's order listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderWithAccrual {
    pub number: String,
    pub status: OrderStatus,
    /// Sum of CREDIT entries referencing this order, in centipoints.
    /// `None` until the authority has settled the order.
    pub accrual_centi: Option<i64>,
    pub created_at_utc: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// LedgerEntry
// ---------------------------------------------------------------------------

/// One immutable row of the points ledger.
///
/// Entries are append-only: never updated, never deleted. Every balance is
/// derived by aggregating entries at read time; no running balance is stored
/// anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: i64,
    /// Order the entry refers to. A reference, not ownership: the entry
    /// belongs to the customer, the order number says why it exists.
    pub order_number: String,
    pub customer_id: i64,
    /// Unsigned magnitude in centipoints; always > 0.
    pub amount_centi: i64,
    pub kind: EntryKind,
    pub created_at_utc: DateTime<Utc>,
}

/// Aggregate CREDIT and DEBIT totals for one customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedgerTotals {
    pub credit_centi: i64,
    pub debit_centi: i64,
}

/// Derived balance view handed to the boundary. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CustomerSummary {
    pub current_centi: i64,
    pub withdrawn_centi: i64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
