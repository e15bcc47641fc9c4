//! The set of live monitors, keyed by claim identity.

use super::{MonitorDeps, MonitorHandle, PinMonitor};
use crate::claim::status::AVAILABLE;
use crate::claim::{ClaimId, ClaimSpec, Condition, ConditionStatus, PinClaim};
use crate::error::{AgentError, Result};
use crate::pin::PinProvider;
use futures_util::future::join_all;
use log::{error, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

struct Entry {
    spec: ClaimSpec,
    handle: MonitorHandle,
}

/// What a [`MonitorRegistry::sync`] call changed.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub started: Vec<ClaimId>,
    pub restarted: Vec<ClaimId>,
    pub stopped: Vec<ClaimId>,
    pub unchanged: Vec<ClaimId>,
    pub failed: Vec<(ClaimId, String)>,
}

pub struct MonitorRegistry {
    provider: Arc<dyn PinProvider>,
    deps: MonitorDeps,
    monitors: HashMap<ClaimId, Entry>,
    /// Every claim this registry has written status for.
    known: HashSet<ClaimId>,
}

impl MonitorRegistry {
    pub fn new(provider: Arc<dyn PinProvider>, deps: MonitorDeps) -> Self {
        Self {
            provider,
            deps,
            monitors: HashMap::new(),
            known: HashSet::new(),
        }
    }

    /// Start a monitor for `claim`, replacing any monitor with the same
    /// identity. A pin can only be held by one claim at a time.
    pub async fn start(&mut self, claim: PinClaim) -> Result<ClaimId> {
        let id = claim.id();
        if let Some(other) = self
            .monitors
            .keys()
            .find(|other| other.pin == id.pin && **other != id)
        {
            return Err(AgentError::PinConflict {
                pin: id.pin.clone(),
                existing: other.to_string(),
            });
        }
        self.stop(&id).await;
        self.known.insert(id.clone());

        let pin = match self.provider.acquire(&id.pin, id.mode).await {
            Ok(pin) => pin,
            Err(e) => {
                error!("[Monitor] {} could not acquire pin: {}", id, e);
                self.record_unavailable(&id, &e.to_string()).await;
                return Err(e.into());
            }
        };

        let spec = claim.spec.clone();
        let handle = PinMonitor::start(claim, pin, self.deps.clone()).await;
        self.monitors.insert(id.clone(), Entry { spec, handle });
        Ok(id)
    }

    /// Stop and forget the monitor for `id`. Returns whether one existed.
    pub async fn stop(&mut self, id: &ClaimId) -> bool {
        match self.monitors.remove(id) {
            Some(entry) => {
                entry.handle.stop().await;
                true
            }
            None => false,
        }
    }

    /// Reconcile the running monitors with the declared `claims`.
    ///
    /// Claims no longer declared are stopped first so their pins are free,
    /// and their stored status is dropped. Then new claims are started and
    /// claims whose spec changed are restarted, in declaration order, so when
    /// two declared claims collide the earlier one wins.
    pub async fn sync(&mut self, claims: Vec<PinClaim>) -> SyncReport {
        let mut report = SyncReport::default();
        let mut declared: HashSet<ClaimId> = HashSet::new();
        let mut desired: Vec<PinClaim> = Vec::with_capacity(claims.len());
        for claim in claims {
            let id = claim.id();
            if !declared.insert(id.clone()) {
                warn!("[Monitor] Ignoring duplicate claim {}", id);
                report
                    .failed
                    .push((id, "duplicate claim for the same pin and mode".to_string()));
                continue;
            }
            desired.push(claim);
        }

        let mut removed: Vec<ClaimId> = self
            .known
            .iter()
            .filter(|id| !declared.contains(*id))
            .cloned()
            .collect();
        removed.sort();
        for id in removed {
            if self.stop(&id).await {
                info!("[Monitor] {} removed", id);
                report.stopped.push(id.clone());
            }
            self.forget(&id).await;
        }

        for claim in desired {
            let id = claim.id();
            let existing = self.monitors.get(&id).map(|e| e.spec == claim.spec);
            if existing == Some(true) {
                report.unchanged.push(id);
                continue;
            }
            match self.start(claim).await {
                Ok(id) if existing.is_some() => report.restarted.push(id),
                Ok(id) => report.started.push(id),
                Err(e) => {
                    warn!("[Monitor] {} not started: {}", id, e);
                    report.failed.push((id, e.to_string()));
                }
            }
        }

        info!(
            "[Monitor] Sync: {} started, {} restarted, {} stopped, {} unchanged, {} failed",
            report.started.len(),
            report.restarted.len(),
            report.stopped.len(),
            report.unchanged.len(),
            report.failed.len()
        );
        report
    }

    pub fn get(&self, id: &ClaimId) -> Option<&MonitorHandle> {
        self.monitors.get(id).map(|e| &e.handle)
    }

    pub fn ids(&self) -> Vec<ClaimId> {
        let mut ids: Vec<ClaimId> = self.monitors.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }

    /// Stop every monitor concurrently.
    pub async fn stop_all(&mut self) {
        let entries: Vec<Entry> = self.monitors.drain().map(|(_, entry)| entry).collect();
        join_all(entries.iter().map(|entry| entry.handle.stop())).await;
        info!("[Monitor] Stopped {} monitor(s)", entries.len());
    }

    async fn forget(&mut self, id: &ClaimId) {
        self.known.remove(id);
        if let Err(e) = self.deps.repository.remove_status(id).await {
            warn!("[Monitor] {} could not drop stored status: {}", id, e);
        }
    }

    async fn record_unavailable(&self, id: &ClaimId, message: &str) {
        let repository = &self.deps.repository;
        let mut status = match repository.load_status(id).await {
            Ok(status) => status.unwrap_or_default(),
            Err(e) => {
                warn!("[Monitor] {} could not load stored status: {}", id, e);
                Default::default()
            }
        };
        status.set_condition(Condition::new(
            AVAILABLE,
            ConditionStatus::False,
            "PinUnavailable",
            message,
        ));
        if let Err(e) = repository.update_status(id, &status).await {
            warn!("[Monitor] {} could not persist status: {}", id, e);
        }
    }
}
