//! Environment-driven daemon configuration.
//!
//! Read once at boot into an immutable value; nothing downstream consults
//! the environment again. The database URL shares its variable with the
//! store crate so the ignored store scenarios and the daemon agree on it.

use std::time::Duration;

use anyhow::{bail, Context, Result};

pub const ENV_ACCRUAL_URL: &str = "TALLY_ACCRUAL_URL";
pub const ENV_POLL_MS: &str = "TALLY_POLL_MS";
pub const ENV_BATCH_SIZE: &str = "TALLY_BATCH_SIZE";
pub const ENV_CLAIM_LEASE_SECS: &str = "TALLY_CLAIM_LEASE_SECS";

const DEFAULT_POLL_MS: u64 = 2_000;
const DEFAULT_BATCH_SIZE: i64 = 10;
const DEFAULT_CLAIM_LEASE_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub database_url: String,
    pub accrual_url: String,
    pub poll_interval: Duration,
    pub batch_size: i64,
    pub claim_lease: chrono::Duration,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var(tally_store::ENV_DB_URL)
            .with_context(|| format!("missing env var {}", tally_store::ENV_DB_URL))?;
        let accrual_url = std::env::var(ENV_ACCRUAL_URL)
            .with_context(|| format!("missing env var {ENV_ACCRUAL_URL}"))?;

        let poll_ms: u64 = parse_var(ENV_POLL_MS, DEFAULT_POLL_MS)?;
        if poll_ms == 0 {
            bail!("{ENV_POLL_MS} must be positive");
        }
        let batch_size: i64 = parse_var(ENV_BATCH_SIZE, DEFAULT_BATCH_SIZE)?;
        if batch_size <= 0 {
            bail!("{ENV_BATCH_SIZE} must be positive");
        }
        let lease_secs: i64 = parse_var(ENV_CLAIM_LEASE_SECS, DEFAULT_CLAIM_LEASE_SECS)?;
        if lease_secs <= 0 {
            bail!("{ENV_CLAIM_LEASE_SECS} must be positive");
        }

        Ok(Self {
            database_url,
            accrual_url,
            poll_interval: Duration::from_millis(poll_ms),
            batch_size,
            claim_lease: chrono::Duration::seconds(lease_secs),
        })
    }
}

/// Parse an optional env var, falling back to `default` when unset.
fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(value) => Ok(value),
            Err(_) => bail!("env var {name} holds an unusable value: '{raw}'"),
        },
        Err(_) => Ok(default),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
