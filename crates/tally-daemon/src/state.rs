//! Component wiring.
//!
//! One `PgStore` serves both capability traits; everything above it shares
//! that instance through trait `Arc`s. The boundary services (`intake`,
//! `balance`) are where an HTTP transport would attach — the binary itself
//! only runs the reconciler.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::PgPool;

use tally_accrual::AccrualClient;
use tally_service::{BalanceService, OrderIntake};
use tally_store::PgStore;
use tally_worker::{Reconciler, ReconcilerConfig};

use crate::config::DaemonConfig;

/// The assembled core: inbound boundary services plus the background
/// reconciler, all over one store.
pub struct Core {
    pub intake: OrderIntake,
    pub balance: BalanceService,
    pub reconciler: Reconciler,
}

pub fn build_core(pool: PgPool, config: &DaemonConfig) -> Result<Core> {
    let store = Arc::new(PgStore::new(pool));
    let source = Arc::new(
        AccrualClient::new(config.accrual_url.clone())
            .context("building the accrual client failed")?,
    );

    let intake = OrderIntake::new(store.clone());
    let balance = BalanceService::new(store.clone(), store.clone());
    let reconciler = Reconciler::new(
        store,
        source,
        ReconcilerConfig {
            batch_size: config.batch_size,
            poll_interval: config.poll_interval,
            claim_lease: config.claim_lease,
        },
    );

    Ok(Core {
        intake,
        balance,
        reconciler,
    })
}
