use std::sync::Arc;

use tracing::{debug, info, warn};

use super::types::{Check, Evaluation};
use crate::history::HistoryLog;
use crate::notify::Notifier;
use crate::store::{CHECKS, RecordStore, StoreError};

/// What happened to the alert for one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertStatus {
    NotWanted,
    Sent,
    Failed,
    /// The state change could not be stored, so it was not announced
    Suppressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkReport {
    pub history_appended: bool,
    pub stored: bool,
    pub alert: AlertStatus,
}

/// Alert text for a check that changed state
pub fn alert_message(check: &Check) -> String {
    format!("{} {} is currently {}", check.method, check.target(), check.state)
}

/// Writes evaluation results back and announces state changes
pub struct ResultSink {
    store: Arc<dyn RecordStore>,
    history: HistoryLog,
    notifier: Arc<dyn Notifier>,
}

impl ResultSink {
    pub fn new(store: Arc<dyn RecordStore>, history: HistoryLog, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, history, notifier }
    }

    /// Record an evaluation made at `now_ms`.
    ///
    /// Every step is best effort: failures are logged and the remaining steps
    /// still run, except that an alert is only sent once the new state is
    /// stored.
    pub async fn record(&self, prior: &Check, evaluation: Evaluation, now_ms: i64) -> SinkReport {
        let mut updated = prior.clone();
        updated.state = evaluation.state;
        updated.last_checked = Some(prior.last_checked.map_or(now_ms, |last| last.max(now_ms)));

        let history_appended = match self.history.append(&updated.id, &updated).await {
            Ok(()) => true,
            Err(e) => {
                warn!(check_id = %updated.id, "Failed to append check history: {}", e);
                false
            }
        };

        let stored = match self.store_check(&updated).await {
            Ok(()) => true,
            Err(e) => {
                warn!(check_id = %updated.id, "Failed to update check: {}", e);
                false
            }
        };

        let alert = match (evaluation.should_alert, stored) {
            (false, _) => {
                debug!(check_id = %updated.id, state = %updated.state, "Check state unchanged, no alert");
                AlertStatus::NotWanted
            }
            (true, false) => AlertStatus::Suppressed,
            (true, true) => self.alert(&updated).await,
        };

        SinkReport { history_appended, stored, alert }
    }

    async fn store_check(&self, check: &Check) -> Result<(), StoreError> {
        let payload = serde_json::to_value(check).map_err(StoreError::Serialize)?;
        self.store.update(CHECKS, &check.id, &payload).await
    }

    async fn alert(&self, check: &Check) -> AlertStatus {
        let message = alert_message(check);

        match self.notifier.send(&check.phone, &message).await {
            Ok(()) => {
                info!(check_id = %check.id, state = %check.state, "Alert sent: {}", message);
                AlertStatus::Sent
            }
            Err(e) => {
                warn!(check_id = %check.id, "Failed to send alert to {}: {}", check.phone, e);
                AlertStatus::Failed
            }
        }
    }
}
