use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{error, warn};

const RECENT_ALERTS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// A paid order arrived without a customer external reference.
    MissingExternalReference,
    /// A paid order references a user the platform does not know.
    UnknownUser,
    /// A paid order references a product missing from the catalog.
    UnknownProduct,
    /// A queued event exhausted its delivery attempts.
    DeadLettered,
    /// The reconciliation sweep had to apply a missing balance increment.
    LedgerReconciled,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::MissingExternalReference => "missing_external_reference",
            AlertKind::UnknownUser => "unknown_user",
            AlertKind::UnknownProduct => "unknown_product",
            AlertKind::DeadLettered => "dead_lettered",
            AlertKind::LedgerReconciled => "ledger_reconciled",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub kind: AlertKind,
    pub order_id: Option<String>,
    pub message: String,
    pub context: serde_json::Value,
    pub raised_at: DateTime<Utc>,
}

/// Operator-facing escalation channel.
///
/// Alerts are emitted as `error`-level structured logs carrying `alert = true`
/// for log-based alerting, and the most recent ones are kept in memory for
/// the admin failures view.
#[derive(Default)]
pub struct OperatorAlerts {
    recent: Mutex<VecDeque<Alert>>,
}

impl OperatorAlerts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(
        &self,
        kind: AlertKind,
        order_id: Option<&str>,
        message: &str,
        context: serde_json::Value,
    ) {
        match kind {
            AlertKind::LedgerReconciled => warn!(
                alert = true,
                alert_kind = kind.as_str(),
                order_id = order_id.unwrap_or("-"),
                context = %context,
                "🔔 OPERATOR ALERT: {}", message
            ),
            _ => error!(
                alert = true,
                alert_kind = kind.as_str(),
                order_id = order_id.unwrap_or("-"),
                context = %context,
                "🔔 OPERATOR ALERT: {}", message
            ),
        }

        let alert = Alert {
            kind,
            order_id: order_id.map(str::to_string),
            message: message.to_string(),
            context,
            raised_at: Utc::now(),
        };

        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        if recent.len() == RECENT_ALERTS {
            recent.pop_front();
        }
        recent.push_back(alert);
    }

    /// Most recent first.
    pub fn recent(&self, limit: usize) -> Vec<Alert> {
        let recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        recent.iter().rev().take(limit).cloned().collect()
    }

    pub fn count(&self, kind: AlertKind) -> usize {
        let recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        recent.iter().filter(|a| a.kind == kind).count()
    }
}
