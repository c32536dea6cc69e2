use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use super::checker::Checker;
use super::types::{Check, Outcome};

/// Single-resolution slot for a probe outcome.
///
/// Every event source of a probe (response, transport error, deadline) reports
/// into the same latch. Only the first report is delivered; later ones are
/// dropped and `resolve` returns `false` for them.
pub struct OutcomeLatch {
    resolved: AtomicBool,
    sender: Mutex<Option<oneshot::Sender<Outcome>>>,
}

impl OutcomeLatch {
    pub fn new() -> (Arc<Self>, oneshot::Receiver<Outcome>) {
        let (sender, receiver) = oneshot::channel();
        let latch = Self { resolved: AtomicBool::new(false), sender: Mutex::new(Some(sender)) };
        (Arc::new(latch), receiver)
    }

    /// Deliver `outcome` if nothing was delivered yet.
    pub fn resolve(&self, outcome: Outcome) -> bool {
        if self.resolved.swap(true, Ordering::AcqRel) {
            return false;
        }

        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(sender) = sender {
            // The receiver may already be gone if the probe itself was dropped
            let _ = sender.send(outcome);
        }
        true
    }

    #[allow(dead_code)] // Public API method
    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }
}

/// Probe executor - runs one request per check against its deadline
pub struct ProbeExecutor {
    checker: Arc<dyn Checker>,
}

impl ProbeExecutor {
    pub fn new(checker: Arc<dyn Checker>) -> Self {
        Self { checker }
    }

    /// Probe a check and return exactly one outcome.
    ///
    /// Never fails: transport errors and the deadline are reported through
    /// the outcome's `network_error`.
    pub async fn probe(&self, check: &Check) -> Outcome {
        let (latch, receiver) = OutcomeLatch::new();

        let request = {
            let latch = Arc::clone(&latch);
            let checker = Arc::clone(&self.checker);
            let check = check.clone();
            tokio::spawn(async move {
                let outcome = match checker.check(&check).await {
                    Ok(code) => Outcome::response(code),
                    Err(e) => e.into(),
                };
                if !latch.resolve(outcome) {
                    debug!(check_id = %check.id, "Discarding probe result reported after the deadline");
                }
            })
        };

        let deadline = {
            let latch = Arc::clone(&latch);
            let timeout = Duration::from_secs(check.timeout_seconds);
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                latch.resolve(Outcome::timeout());
            })
        };

        let outcome = receiver
            .await
            .unwrap_or_else(|_| Outcome::network_error("probe aborted before reporting"));

        request.abort();
        deadline.abort();

        outcome
    }
}
