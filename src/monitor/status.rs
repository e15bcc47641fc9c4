//! Single-writer status path for one claim.
//!
//! Every condition update for a claim goes through its [`StatusWriter`]. The
//! writer mutates an in-memory copy under a lock and hands each new snapshot to
//! a watch channel; one publisher task per claim drains that channel into the
//! [`ClaimRepository`]. Intermediate snapshots may be skipped, the last one
//! always lands.

use crate::claim::{ClaimId, Condition, ConditionStatus, PinClaimStatus};
use crate::repository::ClaimRepository;
use log::{debug, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct StatusWriter {
    inner: Arc<StatusInner>,
}

struct StatusInner {
    claim: ClaimId,
    status: Mutex<PinClaimStatus>,
    publish: watch::Sender<PinClaimStatus>,
    retired: AtomicBool,
}

impl StatusWriter {
    pub fn new(claim: ClaimId, initial: PinClaimStatus) -> (Self, watch::Receiver<PinClaimStatus>) {
        let (publish, receiver) = watch::channel(initial.clone());
        let writer = Self {
            inner: Arc::new(StatusInner {
                claim,
                status: Mutex::new(initial),
                publish,
                retired: AtomicBool::new(false),
            }),
        };
        (writer, receiver)
    }

    pub fn claim(&self) -> &ClaimId {
        &self.inner.claim
    }

    pub fn set(
        &self,
        condition_type: impl Into<String>,
        status: ConditionStatus,
        reason: &str,
        message: impl Into<String>,
    ) {
        self.update(|s| s.set_condition(Condition::new(condition_type, status, reason, message)));
    }

    /// Drop every condition whose type `keep` rejects.
    pub fn retain(&self, keep: impl Fn(&str) -> bool) {
        self.update(|s| {
            let before = s.conditions.len();
            s.conditions.retain(|c| keep(&c.condition_type));
            before != s.conditions.len()
        });
    }

    pub fn snapshot(&self) -> PinClaimStatus {
        self.inner.status.lock().clone()
    }

    /// Stop accepting updates; later writes are dropped.
    pub fn retire(&self) {
        self.inner.retired.store(true, Ordering::SeqCst);
    }

    pub fn is_retired(&self) -> bool {
        self.inner.retired.load(Ordering::SeqCst)
    }

    fn update(&self, apply: impl FnOnce(&mut PinClaimStatus) -> bool) {
        if self.is_retired() {
            debug!(
                "[Status] {} dropped update after monitor stopped",
                self.inner.claim
            );
            return;
        }
        let mut status = self.inner.status.lock();
        if apply(&mut status) {
            // Sent under the lock so snapshots leave in mutation order
            self.inner.publish.send_replace(status.clone());
        }
    }
}

/// Spawn the task that persists a claim's snapshots.
///
/// Runs until `shutdown` fires (flushing anything unseen first) or every
/// writer is gone.
pub fn spawn_publisher(
    claim: ClaimId,
    mut receiver: watch::Receiver<PinClaimStatus>,
    repository: Arc<dyn ClaimRepository>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = receiver.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = receiver.borrow_and_update().clone();
                    publish(&claim, &snapshot, repository.as_ref()).await;
                }
                _ = shutdown.cancelled() => {
                    if receiver.has_changed().unwrap_or(false) {
                        let snapshot = receiver.borrow_and_update().clone();
                        publish(&claim, &snapshot, repository.as_ref()).await;
                    }
                    break;
                }
            }
        }
    })
}

async fn publish(claim: &ClaimId, snapshot: &PinClaimStatus, repository: &dyn ClaimRepository) {
    if let Err(e) = repository.update_status(claim, snapshot).await {
        warn!("[Status] Failed to persist status for {}: {}", claim, e);
    }
}
