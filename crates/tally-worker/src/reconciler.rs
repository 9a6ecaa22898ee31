//! Claim, poll, settle, requeue.
//!
//! One pass (`run_batch`) touches each claimed order exactly once. Transient
//! trouble — transport errors, "try later" replies, non-terminal authority
//! statuses — holds the order for requeue at the end of the pass; only a
//! definitive PROCESSED or INVALID reply settles it. Per-order store failures
//! are logged and the order left PROCESSING: the stale-claim sweep at the
//! head of a later pass picks it back up once the lease runs out.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use tally_accrual::{AccrualCheck, AccrualSource, AccrualStatus};
use tally_domain::points::format_centi;
use tally_domain::{Order, OrderStatus};
use tally_store::OrderStore;

use crate::{BatchReport, ReconcilerConfig};

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

pub struct Reconciler {
    store: Arc<dyn OrderStore>,
    source: Arc<dyn AccrualSource>,
    config: ReconcilerConfig,
}

/// Outcome of settling one claimed order.
enum Settled {
    /// PROCESSED with a credit written.
    Credited,
    /// INVALID, no points.
    Invalidated,
    /// Terminal without a counter: a zero-point settle, or a claim some
    /// other actor resolved first.
    Skipped,
    /// Transient; return the order to NEW at the end of the pass.
    Hold,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn OrderStore>,
        source: Arc<dyn AccrualSource>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            source,
            config,
        }
    }

    /// One reconciliation pass: sweep stale claims, claim a batch, settle or
    /// requeue every claimed order. Never fails — every store or authority
    /// problem is contained to the order it struck.
    pub async fn run_batch(&self) -> BatchReport {
        let mut report = BatchReport::default();

        // Heal claims orphaned by a crash between claim and requeue.
        let cutoff = Utc::now() - self.config.claim_lease;
        match self.store.release_stale_claims(cutoff).await {
            Ok(released) => {
                for number in &released {
                    warn!(number = %number, "requeued a stale claim past its lease");
                }
                report.swept = released.len();
            }
            Err(err) => error!(error = %err, "stale-claim sweep failed"),
        }

        let claimed = match self.store.claim_pending_orders(self.config.batch_size).await {
            Ok(orders) => orders,
            Err(err) => {
                error!(error = %err, "claiming a batch failed");
                return report;
            }
        };
        report.claimed = claimed.len();

        let mut held: Vec<Order> = Vec::new();
        for order in claimed {
            match self.settle_one(&order).await {
                Settled::Credited => report.credited += 1,
                Settled::Invalidated => report.invalidated += 1,
                Settled::Skipped => {}
                Settled::Hold => held.push(order),
            }
        }

        for order in held {
            match self.store.finalize_order(&order.number, OrderStatus::New).await {
                Ok(true) => report.requeued += 1,
                Ok(false) => {
                    debug!(number = %order.number, "requeue skipped, claim resolved elsewhere")
                }
                Err(err) => error!(
                    number = %order.number,
                    error = %err,
                    "requeue failed, the sweep reclaims this order after its lease"
                ),
            }
        }

        report
    }

    async fn settle_one(&self, order: &Order) -> Settled {
        let check = match self.source.check(&order.number).await {
            Ok(check) => check,
            Err(err) => {
                warn!(number = %order.number, error = %err, "accrual poll failed, holding");
                return Settled::Hold;
            }
        };

        let reply = match check {
            AccrualCheck::Ready(reply) => reply,
            AccrualCheck::NotReady => {
                debug!(number = %order.number, "authority not ready, holding");
                return Settled::Hold;
            }
        };

        match reply.status {
            // Known upstream but not settled yet; poll again on a later pass.
            AccrualStatus::Registered | AccrualStatus::Processing => {
                debug!(
                    number = %order.number,
                    authority_status = reply.status.as_str(),
                    "order still in flight upstream, holding"
                );
                Settled::Hold
            }
            AccrualStatus::Invalid => {
                match self.store.finalize_order(&order.number, OrderStatus::Invalid).await {
                    Ok(true) => {
                        info!(number = %order.number, "order settled INVALID, no points");
                        Settled::Invalidated
                    }
                    Ok(false) => {
                        warn!(number = %order.number, "claim resolved elsewhere, skipping");
                        Settled::Skipped
                    }
                    Err(err) => {
                        error!(number = %order.number, error = %err, "invalidate failed, holding");
                        Settled::Hold
                    }
                }
            }
            AccrualStatus::Processed => self.credit(order, reply.accrual_centi).await,
        }
    }

    async fn credit(&self, order: &Order, accrual_centi: Option<i64>) -> Settled {
        let amount = match accrual_centi {
            Some(amount) => amount,
            None => {
                // Never credit an amount the authority did not state.
                warn!(
                    number = %order.number,
                    "PROCESSED reply without an accrual amount, holding"
                );
                return Settled::Hold;
            }
        };

        if amount == 0 {
            // Settled for zero points: terminal, but the ledger holds no
            // zero-amount entries.
            return match self.store.finalize_order(&order.number, OrderStatus::Processed).await {
                Ok(true) => {
                    info!(number = %order.number, "order settled PROCESSED with zero points");
                    Settled::Skipped
                }
                Ok(false) => {
                    warn!(number = %order.number, "claim resolved elsewhere, skipping");
                    Settled::Skipped
                }
                Err(err) => {
                    error!(number = %order.number, error = %err, "settle failed, holding");
                    Settled::Hold
                }
            };
        }

        match self
            .store
            .apply_accrual(&order.number, order.customer_id, amount)
            .await
        {
            Ok(true) => {
                info!(
                    number = %order.number,
                    customer_id = order.customer_id,
                    points = %format_centi(amount),
                    "order settled PROCESSED, points credited"
                );
                Settled::Credited
            }
            Ok(false) => {
                warn!(number = %order.number, "claim resolved elsewhere, credit skipped");
                Settled::Skipped
            }
            Err(err) => {
                error!(number = %order.number, error = %err, "credit failed, holding");
                Settled::Hold
            }
        }
    }

    /// Run passes on the configured interval until told to stop. The stop
    /// signal is observed between passes, never inside one: the pass running
    /// when `stop` is called completes before the task exits.
    pub fn spawn(self) -> ReconcilerHandle {
        let (shutdown, mut stop_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                batch_size = self.config.batch_size,
                poll_interval_ms = self.config.poll_interval.as_millis() as u64,
                claim_lease_secs = self.config.claim_lease.num_seconds(),
                "reconciler started"
            );
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = self.run_batch().await;
                        if report.is_idle() {
                            debug!("reconcile pass idle");
                        } else {
                            info!(
                                swept = report.swept,
                                claimed = report.claimed,
                                credited = report.credited,
                                invalidated = report.invalidated,
                                requeued = report.requeued,
                                "reconcile pass finished"
                            );
                        }
                    }
                    changed = stop_rx.changed() => {
                        // A closed channel means the handle is gone; stop too.
                        if changed.is_err() || *stop_rx.borrow() {
                            info!("reconciler stopped");
                            break;
                        }
                    }
                }
            }
        });
        ReconcilerHandle { shutdown, task }
    }
}

// ---------------------------------------------------------------------------
// ReconcilerHandle
// ---------------------------------------------------------------------------

/// Handle to a running reconciler task.
pub struct ReconcilerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Signal the loop to stop and wait for it to finish its current pass.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
