//! Asynchronous delivery of admitted actions and reports.

use super::{FireContext, HookDelivery, JobSubmitter, ReportContext, RetryPolicy};
use crate::claim::status::{action_delivered, report_delivered};
use crate::claim::{ActionTarget, ConditionStatus};
use crate::error::DeliveryError;
use crate::monitor::StatusWriter;
use log::{debug, info, warn};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// How one delivery ended.
#[derive(Debug)]
enum Outcome {
    Delivered { attempts: u32 },
    Exhausted { attempts: u32, error: DeliveryError },
    Rejected { error: DeliveryError },
    Cancelled,
}

/// Runs each delivery on its own task.
///
/// Actions of one fire are spawned in declared order; completion order is
/// whatever the backends make it. Cancelling the dispatcher aborts pending
/// backoffs; an attempt already on the wire finishes, but its outcome is
/// dropped.
pub struct ActionDispatcher {
    hooks: Arc<dyn HookDelivery>,
    jobs: Arc<dyn JobSubmitter>,
    retry: RetryPolicy,
    status: StatusWriter,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl ActionDispatcher {
    pub fn new(
        hooks: Arc<dyn HookDelivery>,
        jobs: Arc<dyn JobSubmitter>,
        retry: RetryPolicy,
        status: StatusWriter,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            hooks,
            jobs,
            retry,
            status,
            cancel,
            tracker: TaskTracker::new(),
        }
    }

    pub fn dispatch_action(&self, target: &ActionTarget, context: FireContext) {
        if self.cancel.is_cancelled() {
            return;
        }
        let condition = action_delivered(context.trigger, context.action);
        let label = format!(
            "{} trigger {} action {}",
            context.claim, context.trigger, context.action
        );

        match target.clone() {
            ActionTarget::Hook(url) => {
                let hooks = self.hooks.clone();
                let payload = match serde_json::to_value(&context) {
                    Ok(payload) => payload,
                    Err(e) => {
                        self.record(&condition, &label, Outcome::Rejected {
                            error: DeliveryError::Permanent(e.to_string()),
                        });
                        return;
                    }
                };
                self.spawn(condition, label, move || {
                    let hooks = hooks.clone();
                    let url = url.clone();
                    let payload = payload.clone();
                    async move { hooks.send(&url, &payload).await.map_err(DeliveryError::from) }
                });
            }
            ActionTarget::Job(template) => {
                let jobs = self.jobs.clone();
                self.spawn(condition, label, move || {
                    let jobs = jobs.clone();
                    let template = template.clone();
                    let context = context.clone();
                    async move {
                        let name = jobs
                            .submit(&template, &context)
                            .await
                            .map_err(DeliveryError::from)?;
                        info!("[Dispatch] Submitted job {}", name);
                        Ok::<(), DeliveryError>(())
                    }
                });
            }
        }
    }

    pub fn dispatch_report(&self, url: &str, context: ReportContext) {
        if self.cancel.is_cancelled() {
            return;
        }
        let condition = report_delivered(context.report);
        let label = format!("{} report {}", context.claim, context.report);
        let payload = match serde_json::to_value(&context) {
            Ok(payload) => payload,
            Err(e) => {
                self.record(&condition, &label, Outcome::Rejected {
                    error: DeliveryError::Permanent(e.to_string()),
                });
                return;
            }
        };
        let hooks = self.hooks.clone();
        let url = url.to_string();
        self.spawn(condition, label, move || {
            let hooks = hooks.clone();
            let url = url.clone();
            let payload = payload.clone();
            async move { hooks.send(&url, &payload).await.map_err(DeliveryError::from) }
        });
    }

    /// Stop accepting work and cancel pending retries.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
    }

    /// Wait for every spawned delivery to finish. Only returns after
    /// [`shutdown`](Self::shutdown).
    pub async fn drained(&self) {
        self.tracker.wait().await;
    }

    fn spawn<F, Fut>(&self, condition: String, label: String, attempt: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), DeliveryError>> + Send + 'static,
    {
        let retry = self.retry.clone();
        let cancel = self.cancel.clone();
        let status = self.status.clone();
        self.tracker.spawn(async move {
            let outcome = deliver(&retry, &cancel, attempt).await;
            if cancel.is_cancelled() {
                debug!("[Dispatch] {} finished after stop; outcome dropped", label);
                return;
            }
            record_outcome(&status, &condition, &label, outcome);
        });
    }

    fn record(&self, condition: &str, label: &str, outcome: Outcome) {
        record_outcome(&self.status, condition, label, outcome);
    }
}

async fn deliver<F, Fut>(retry: &RetryPolicy, cancel: &CancellationToken, mut attempt: F) -> Outcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), DeliveryError>>,
{
    let mut attempts = 0;
    loop {
        if cancel.is_cancelled() {
            return Outcome::Cancelled;
        }
        attempts += 1;
        match attempt().await {
            Ok(()) => return Outcome::Delivered { attempts },
            Err(error) if !error.is_transient() => return Outcome::Rejected { error },
            Err(error) if !retry.allows_retry_after(attempts) => {
                return Outcome::Exhausted { attempts, error };
            }
            Err(error) => {
                let delay = retry.delay(attempts);
                debug!(
                    "[Dispatch] Attempt {} failed ({}), retrying in {:?}",
                    attempts, error, delay
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Outcome::Cancelled,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

fn record_outcome(status: &StatusWriter, condition: &str, label: &str, outcome: Outcome) {
    match outcome {
        Outcome::Delivered { attempts } => {
            debug!("[Dispatch] {} delivered after {} attempt(s)", label, attempts);
            status.set(
                condition,
                ConditionStatus::True,
                "Delivered",
                format!("delivered after {attempts} attempt(s)"),
            );
        }
        Outcome::Exhausted { attempts, error } => {
            warn!("[Dispatch] {} gave up after {} attempts: {}", label, attempts, error);
            status.set(
                condition,
                ConditionStatus::False,
                "RetriesExhausted",
                format!("{error} (after {attempts} attempts)"),
            );
        }
        Outcome::Rejected { error } => {
            warn!("[Dispatch] {} rejected: {}", label, error);
            status.set(condition, ConditionStatus::False, "DeliveryRejected", error.to_string());
        }
        Outcome::Cancelled => debug!("[Dispatch] {} cancelled", label),
    }
}
