use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::database::error::DatabaseError;
use crate::database::repository::CreditLedger;
use crate::services::notification::{AlertKind, OperatorAlerts};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub applied: usize,
    pub failed: usize,
}

/// Applies balance increments for ledger entries that were written without
/// one. Postgres writes both in one transaction, so in practice this only
/// finds rows left behind by manual repairs or partial restores.
pub struct LedgerReconciler {
    ledger: Arc<dyn CreditLedger>,
    alerts: Arc<OperatorAlerts>,
    batch_size: i64,
}

impl LedgerReconciler {
    pub fn new(ledger: Arc<dyn CreditLedger>, alerts: Arc<OperatorAlerts>, batch_size: i64) -> Self {
        Self {
            ledger,
            alerts,
            batch_size,
        }
    }

    pub async fn sweep(&self) -> Result<SweepReport, DatabaseError> {
        let pending = self.ledger.find_unreconciled(self.batch_size).await?;
        let mut report = SweepReport {
            scanned: pending.len(),
            ..Default::default()
        };

        for entry in pending {
            // `None` means another sweeper got there first.
            match self.ledger.reconcile_entry(entry.id).await {
                Ok(Some(balance)) => {
                    report.applied += 1;
                    self.alerts.raise(
                        AlertKind::LedgerReconciled,
                        Some(&entry.external_order_id),
                        "Applied a missing balance increment for a ledger entry",
                        json!({
                            "entry_id": entry.id,
                            "user_id": entry.user_id,
                            "credits": entry.credits_granted,
                            "balance": balance,
                        }),
                    );
                }
                Ok(None) => {
                    debug!(entry_id = %entry.id, "Ledger entry already reconciled");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        entry_id = %entry.id,
                        order_id = %entry.external_order_id,
                        error = %e,
                        "Failed to reconcile ledger entry"
                    );
                }
            }
        }

        Ok(report)
    }
}
