//! tally-testkit
//!
//! Deterministic test doubles for the loyalty ledger: an in-memory store that
//! honors the same contract as the Postgres implementation, and a scriptable
//! accrual source. No network, no database, no sleeps — scenario tests drive
//! intake, reconciliation, and withdrawal batch by batch.

pub mod memory_store;
pub mod scripted_accrual;

pub use memory_store::MemoryStore;
pub use scripted_accrual::ScriptedAccrual;
