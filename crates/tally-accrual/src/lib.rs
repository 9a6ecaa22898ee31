//! tally-accrual
//!
//! Client for the external accrual authority — the service that decides how
//! many points an order earns. This crate owns the source abstraction and
//! the HTTP implementation; it never touches storage. The reconciliation
//! worker treats every error here as transient and requeues the order.

pub mod client;

use std::fmt;

use async_trait::async_trait;

pub use client::AccrualClient;

// ---------------------------------------------------------------------------
// Reply types
// ---------------------------------------------------------------------------

/// Authority-side status of an order.
///
/// `Registered` and `Processing` are definitive answers but not terminal:
/// the order is known upstream and still being evaluated, so the caller
/// keeps polling. Only `Invalid` and `Processed` settle an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccrualStatus {
    Registered,
    Processing,
    Invalid,
    Processed,
}

impl AccrualStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccrualStatus::Registered => "REGISTERED",
            AccrualStatus::Processing => "PROCESSING",
            AccrualStatus::Invalid => "INVALID",
            AccrualStatus::Processed => "PROCESSED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, AccrualError> {
        match s {
            "REGISTERED" => Ok(AccrualStatus::Registered),
            "PROCESSING" => Ok(AccrualStatus::Processing),
            "INVALID" => Ok(AccrualStatus::Invalid),
            "PROCESSED" => Ok(AccrualStatus::Processed),
            other => Err(AccrualError::Decode(format!(
                "unknown accrual status '{other}'"
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AccrualStatus::Invalid | AccrualStatus::Processed)
    }
}

/// A definitive reply from the authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccrualReply {
    pub order: String,
    pub status: AccrualStatus,
    /// Awarded points in centipoints; present on PROCESSED replies.
    pub accrual_centi: Option<i64>,
}

/// Outcome of one poll. HTTP 429 and 204 mean "try later" and must never be
/// read as an answer about the order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccrualCheck {
    Ready(AccrualReply),
    NotReady,
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from the accrual source. All of them are transient from the
/// worker's point of view; the variants exist for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccrualError {
    /// The request never completed (connect, timeout, TLS, ...).
    Transport(String),
    /// The authority answered with a body we could not interpret.
    Decode(String),
    /// A status code outside the contract (not 2xx, not 429).
    UnexpectedStatus(u16),
    /// The client could not be constructed.
    Config(String),
}

impl fmt::Display for AccrualError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccrualError::Transport(msg) => write!(f, "accrual transport error: {msg}"),
            AccrualError::Decode(msg) => write!(f, "accrual reply decode error: {msg}"),
            AccrualError::UnexpectedStatus(code) => {
                write!(f, "accrual authority returned unexpected HTTP {code}")
            }
            AccrualError::Config(msg) => write!(f, "accrual client config error: {msg}"),
        }
    }
}

impl std::error::Error for AccrualError {}

// ---------------------------------------------------------------------------
// Source trait
// ---------------------------------------------------------------------------

/// Pluggable accrual authority interface.
#[async_trait]
pub trait AccrualSource: Send + Sync {
    /// Poll the authority once for `order_number`.
    async fn check(&self, order_number: &str) -> Result<AccrualCheck, AccrualError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for status in [
            AccrualStatus::Registered,
            AccrualStatus::Processing,
            AccrualStatus::Invalid,
            AccrualStatus::Processed,
        ] {
            assert_eq!(AccrualStatus::parse(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn status_rejects_unknown() {
        let err = AccrualStatus::parse("DONE").unwrap_err();
        assert_eq!(
            err,
            AccrualError::Decode("unknown accrual status 'DONE'".to_string())
        );
    }

    #[test]
    fn only_invalid_and_processed_are_terminal() {
        assert!(!AccrualStatus::Registered.is_terminal());
        assert!(!AccrualStatus::Processing.is_terminal());
        assert!(AccrualStatus::Invalid.is_terminal());
        assert!(AccrualStatus::Processed.is_terminal());
    }

    #[test]
    fn error_display_unexpected_status() {
        let e = AccrualError::UnexpectedStatus(502);
        assert_eq!(e.to_string(), "accrual authority returned unexpected HTTP 502");
    }
}
