//! tally-daemon
//!
//! Boot layer for `tallyd`: environment configuration and the wiring that
//! assembles store, accrual client, boundary services, and the reconciler.
//! The binary in `main.rs` stays thin; scenario tests drive the same wiring
//! against in-memory doubles.

pub mod config;
pub mod state;
