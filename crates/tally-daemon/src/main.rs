//! tallyd — the loyalty-ledger reconciliation daemon.
//!
//! Boot order: env file, tracing, config, database (connect + migrate),
//! wiring, then the reconciler loop until ctrl-c. The in-flight pass drains
//! before exit.

use anyhow::Context;
use tracing::info;

use tally_daemon::config::DaemonConfig;
use tally_daemon::state;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist — production injects env vars
    // directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let config = DaemonConfig::from_env()?;
    let pool = tally_store::connect(&config.database_url).await?;
    tally_store::migrate(&pool).await?;

    let state::Core { reconciler, .. } = state::build_core(pool, &config)?;
    info!(
        accrual_url = %config.accrual_url,
        batch_size = config.batch_size,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        claim_lease_secs = config.claim_lease.num_seconds(),
        "tallyd up"
    );
    let worker = reconciler.spawn();

    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl-c failed")?;
    info!("shutdown signal received, draining the in-flight pass");
    worker.stop().await;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
