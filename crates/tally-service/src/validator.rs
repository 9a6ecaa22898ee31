//! Order-number validation: checksum, then ownership.
//!
//! The validator only reads. Intake uses it to route a submission; the
//! withdrawal path re-checks the checksum itself and resolves ownership
//! through its own lookup, because over there a foreign order must read as
//! "not found", not as a conflict.

use std::fmt;
use std::sync::Arc;

use tally_domain::luhn;
use tally_store::{OrderStore, StoreError};

// ---------------------------------------------------------------------------
// Outcome and error types
// ---------------------------------------------------------------------------

/// Ownership resolution for a well-formed order number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// No order with this number exists yet; the caller may create it.
    Available,
    /// The order exists and belongs to the asking customer.
    AlreadyOwned,
    /// The order exists and belongs to a different customer.
    OwnedByOther,
}

#[derive(Debug, PartialEq)]
pub enum ValidateError {
    /// Empty, non-digit, or checksum-failing order number.
    InvalidFormat { number: String },
    /// The ownership lookup failed.
    Store(StoreError),
}

impl fmt::Display for ValidateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidateError::InvalidFormat { number } => {
                write!(f, "order number '{number}' is not a valid order number")
            }
            ValidateError::Store(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ValidateError {}

// ---------------------------------------------------------------------------
// OrderValidator
// ---------------------------------------------------------------------------

pub struct OrderValidator {
    store: Arc<dyn OrderStore>,
}

impl OrderValidator {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }

    /// Checksum the number, then resolve who owns it. No side effects; the
    /// answer can be stale by the time the caller acts on it, which is why
    /// intake still treats the unique constraint as the authority.
    pub async fn validate(
        &self,
        number: &str,
        customer_id: i64,
    ) -> Result<Ownership, ValidateError> {
        if !luhn::is_valid(number) {
            return Err(ValidateError::InvalidFormat {
                number: number.to_string(),
            });
        }
        let existing = self
            .store
            .find_order_by_number(number)
            .await
            .map_err(ValidateError::Store)?;
        Ok(match existing {
            None => Ownership::Available,
            Some(order) if order.customer_id == customer_id => Ownership::AlreadyOwned,
            Some(_) => Ownership::OwnedByOther,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tally_testkit::MemoryStore;

    fn validator() -> (Arc<MemoryStore>, OrderValidator) {
        let store = Arc::new(MemoryStore::new());
        let validator = OrderValidator::new(store.clone());
        (store, validator)
    }

    #[tokio::test]
    async fn malformed_numbers_rejected_before_any_lookup() {
        let (_, validator) = validator();
        for number in ["", "abc", "7992739871", "49927398717"] {
            let err = validator.validate(number, 1).await.unwrap_err();
            assert_eq!(
                err,
                ValidateError::InvalidFormat {
                    number: number.to_string()
                }
            );
        }
    }

    #[tokio::test]
    async fn unknown_number_is_available() {
        let (_, validator) = validator();
        let ownership = validator.validate("79927398713", 1).await.unwrap();
        assert_eq!(ownership, Ownership::Available);
    }

    #[tokio::test]
    async fn ownership_resolved_per_customer() {
        let (store, validator) = validator();
        store.create_order("79927398713", 1).await.unwrap();

        assert_eq!(
            validator.validate("79927398713", 1).await.unwrap(),
            Ownership::AlreadyOwned
        );
        assert_eq!(
            validator.validate("79927398713", 2).await.unwrap(),
            Ownership::OwnedByOther
        );
    }
}
