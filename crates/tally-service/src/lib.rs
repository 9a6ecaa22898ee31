//! tally-service
//!
//! Boundary policy for the loyalty ledger: order-number validation, the
//! idempotent intake path, and balance reads plus consistency-checked
//! withdrawals. Everything here is transport-agnostic — an HTTP layer (or a
//! test) drives these services and maps their outcomes onto its own codes.
//!
//! The services own no state. They hold `Arc`s to the store traits and every
//! decision is made against what the store says right now.

pub mod balance;
pub mod intake;
pub mod validator;

pub use balance::{BalanceService, WithdrawError, Withdrawal};
pub use intake::{IntakeError, OrderIntake, SubmitOutcome};
pub use validator::{OrderValidator, Ownership, ValidateError};
