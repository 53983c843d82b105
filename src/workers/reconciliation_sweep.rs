use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::services::reconciliation::LedgerReconciler;

pub struct ReconciliationSweepWorker {
    reconciler: Arc<LedgerReconciler>,
    interval: Duration,
}

impl ReconciliationSweepWorker {
    pub fn new(reconciler: Arc<LedgerReconciler>, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_secs = self.interval.as_secs(),
            "Ledger reconciliation sweep started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.reconciler.sweep().await {
                        Ok(report) => {
                            if report.scanned > 0 {
                                info!(
                                    scanned = report.scanned,
                                    applied = report.applied,
                                    failed = report.failed,
                                    "Reconciled ledger entries"
                                );
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to scan for unreconciled ledger entries");
                        }
                    }
                }
            }
        }

        info!("Ledger reconciliation sweep stopped");
    }
}
