//! One claim's lifecycle.
//!
//! `Starting` validates the spec and builds runtime state. Input claims then
//! run a sampling loop that feeds every sample to each trigger's debouncer
//! and each report's scheduler; output claims drive the pin once and hold it
//! until stopped. All evaluation for a claim happens on its own task, one
//! sample at a time.

use super::{MonitorDeps, MonitorSettings, StatusWriter, spawn_publisher};
use crate::claim::status::{
    AVAILABLE, DEGRADED, OUTPUT_APPLIED, PROGRESSING, action_ambiguous, action_delivered,
    report_delivered, trigger_enabled,
};
use crate::claim::{
    ActionTarget, ClaimId, ConditionStatus, InputSpec, PinBehavior, PinClaim, PinClaimStatus,
    validate,
};
use crate::delivery::{ActionDispatcher, FireContext, ReportContext, RetryPolicy};
use crate::engine::{CooldownGate, Debouncer, Emission, Fire, ReportScheduler};
use crate::error::PinError;
use crate::pin::{PinSource, Sample};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use strum::Display;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep, sleep_until};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum MonitorState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

struct ActionRuntime {
    index: usize,
    target: ActionTarget,
    gate: CooldownGate,
}

struct TriggerRuntime {
    index: usize,
    debouncer: Debouncer,
    actions: Vec<ActionRuntime>,
}

impl TriggerRuntime {
    fn fire(&self, claim: &ClaimId, dispatcher: &ActionDispatcher, fire: Fire, at: DateTime<Utc>) {
        info!(
            "[Monitor] {} trigger {} fired at {:.3} V",
            claim, self.index, fire.voltage
        );
        for action in &self.actions {
            if !action.gate.try_admit(fire.at) {
                debug!(
                    "[Monitor] {} trigger {} action {} held back by cooldown",
                    claim, self.index, action.index
                );
                continue;
            }
            let context = FireContext::new(claim, self.index, action.index, fire.voltage, at);
            dispatcher.dispatch_action(&action.target, context);
        }
    }
}

struct ReportRuntime {
    index: usize,
    kind: String,
    url: String,
    scheduler: ReportScheduler,
}

impl ReportRuntime {
    fn emit(&self, claim: &ClaimId, dispatcher: &ActionDispatcher, emission: Emission, at: DateTime<Utc>) {
        debug!(
            "[Monitor] {} report {} ({}) emitting",
            claim, self.index, emission.reason
        );
        let context = ReportContext {
            claim: claim.to_string(),
            report: self.index,
            kind: self.kind.clone(),
            reason: emission.reason,
            voltage: emission.voltage,
            timestamp: at,
        };
        dispatcher.dispatch_report(&self.url, context);
    }
}

/// Runtime state of one input claim. Owned by its sampling task.
pub struct PinMonitor {
    id: ClaimId,
    pin: Arc<dyn PinSource>,
    status: StatusWriter,
    settings: MonitorSettings,
    dispatcher: Arc<ActionDispatcher>,
    triggers: Vec<TriggerRuntime>,
    reports: Vec<ReportRuntime>,
}

impl PinMonitor {
    /// Validate `claim` and start monitoring it on `pin`.
    ///
    /// Never fails: a spec that cannot run yields a handle already in
    /// `Stopped` with `Available=False/InvalidSpec`.
    pub async fn start(claim: PinClaim, pin: Arc<dyn PinSource>, deps: MonitorDeps) -> MonitorHandle {
        let id = claim.id();
        let seed = match deps.repository.load_status(&id).await {
            Ok(Some(status)) => status,
            Ok(None) => claim.status.clone(),
            Err(e) => {
                warn!("[Monitor] {} could not load stored status: {}", id, e);
                claim.status.clone()
            }
        };

        let (status, receiver) = StatusWriter::new(id.clone(), seed);
        let publisher_shutdown = CancellationToken::new();
        let publisher = spawn_publisher(
            id.clone(),
            receiver,
            deps.repository.clone(),
            publisher_shutdown.clone(),
        );
        let mut handle = MonitorHandle {
            id: id.clone(),
            state: Mutex::new(MonitorState::Starting),
            status: status.clone(),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
            dispatcher: None,
            publisher_shutdown,
            publisher: Mutex::new(Some(publisher)),
            stopped: OnceCell::new(),
        };
        status.set(
            PROGRESSING,
            ConditionStatus::True,
            "Starting",
            format!("binding pin {}", id.pin),
        );

        let settings = deps.settings.clone();
        let fatal: Vec<String> = validate(&claim.spec, settings.logic_high)
            .iter()
            .filter(|p| p.is_fatal())
            .map(ToString::to_string)
            .collect();
        if !fatal.is_empty() {
            handle.refuse(fatal.join("; "));
            return handle;
        }

        let task = match claim.spec.behavior {
            PinBehavior::Input(input) => {
                let dispatcher = Arc::new(ActionDispatcher::new(
                    deps.hooks,
                    deps.jobs,
                    settings.dispatch_retry.clone(),
                    status.clone(),
                    handle.cancel.child_token(),
                ));
                handle.dispatcher = Some(dispatcher.clone());
                status.set(DEGRADED, ConditionStatus::False, "PinHealthy", "");
                let monitor = PinMonitor::new(id.clone(), pin, status.clone(), settings, dispatcher, &input);
                tokio::spawn(monitor.run(handle.cancel.clone()))
            }
            PinBehavior::Output(output) => {
                let voltage = match output.resolve(settings.logic_high) {
                    Ok(voltage) => voltage,
                    Err(e) => {
                        handle.refuse(e.to_string());
                        return handle;
                    }
                };
                status.retain(|t| !is_item_condition(t) || t == OUTPUT_APPLIED);
                tokio::spawn(drive_output(
                    pin,
                    voltage,
                    status.clone(),
                    settings.pin_retry,
                    handle.cancel.clone(),
                ))
            }
        };

        *handle.task.lock() = Some(task);
        status.set(AVAILABLE, ConditionStatus::True, "Running", "");
        status.set(PROGRESSING, ConditionStatus::False, "Running", "");
        *handle.state.lock() = MonitorState::Running;
        info!("[Monitor] {} running", id);
        handle
    }

    fn new(
        id: ClaimId,
        pin: Arc<dyn PinSource>,
        status: StatusWriter,
        settings: MonitorSettings,
        dispatcher: Arc<ActionDispatcher>,
        input: &InputSpec,
    ) -> Self {
        let now = Instant::now();
        let mut expected = HashSet::new();

        let mut triggers = Vec::with_capacity(input.triggers.len());
        for (i, trigger) in input.triggers.iter().enumerate() {
            let debouncer = match Debouncer::from_trigger(trigger, input.edge) {
                Ok(debouncer) => {
                    status.set(trigger_enabled(i), ConditionStatus::True, "Valid", "");
                    debouncer
                }
                Err(reason) => {
                    warn!(
                        "[Monitor] {} trigger {} disabled: invalid continuousInterval {:?}: {}",
                        id, i, trigger.continuous_interval, reason
                    );
                    status.set(
                        trigger_enabled(i),
                        ConditionStatus::False,
                        "InvalidContinuousInterval",
                        format!("{:?}: {}", trigger.continuous_interval, reason),
                    );
                    Debouncer::disabled(trigger, input.edge)
                }
            };
            expected.insert(trigger_enabled(i));

            let mut actions = Vec::with_capacity(trigger.actions.len());
            for (j, action) in trigger.actions.iter().enumerate() {
                expected.insert(action_delivered(i, j));
                if action.is_ambiguous() {
                    warn!(
                        "[Monitor] {} trigger {} action {} sets both hookUrl and jobTemplate; using hookUrl",
                        id, i, j
                    );
                    status.set(
                        action_ambiguous(i, j),
                        ConditionStatus::True,
                        "HookUrlPreferred",
                        "both hookUrl and jobTemplate are set; delivering to hookUrl",
                    );
                    expected.insert(action_ambiguous(i, j));
                }
                if let Some(target) = action.target() {
                    actions.push(ActionRuntime {
                        index: j,
                        target,
                        gate: CooldownGate::new(action.cooldown()),
                    });
                }
            }
            triggers.push(TriggerRuntime {
                index: i,
                debouncer,
                actions,
            });
        }

        let mut reports = Vec::with_capacity(input.reports.len());
        for (r, report) in input.reports.iter().enumerate() {
            expected.insert(report_delivered(r));
            let period = report.period().unwrap_or(None);
            reports.push(ReportRuntime {
                index: r,
                kind: report.kind.clone(),
                url: report.hook_url.trim().to_string(),
                scheduler: ReportScheduler::new(period, report.on_change, now),
            });
        }

        status.retain(|t| !is_item_condition(t) || expected.contains(t));

        Self {
            id,
            pin,
            status,
            settings,
            dispatcher,
            triggers,
            reports,
        }
    }

    async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = interval(self.settings.sample_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures: u32 = 0;

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = wait_until(deadline) => self.poll_due(Instant::now()),
                _ = ticker.tick() => match self.read_pin(&cancel).await {
                    None => break,
                    Some(Ok(sample)) => {
                        if failures > 0 {
                            info!("[Monitor] {} pin read recovered after {} failure(s)", self.id, failures);
                            self.status.set(
                                DEGRADED,
                                ConditionStatus::False,
                                "PinReadRecovered",
                                format!("recovered after {failures} failed read(s)"),
                            );
                            failures = 0;
                        }
                        self.on_sample(sample, Instant::now());
                    }
                    Some(Err(e)) => {
                        failures = failures.saturating_add(1);
                        if failures == 1 {
                            warn!("[Monitor] {} {}", self.id, e);
                        } else {
                            debug!("[Monitor] {} read failure #{}: {}", self.id, failures, e);
                        }
                        self.status.set(DEGRADED, ConditionStatus::True, "PinReadFailed", e.to_string());
                        let delay = self.settings.pin_retry.delay(failures);
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = sleep(delay) => {}
                        }
                    }
                },
            }
        }
        debug!("[Monitor] {} sampling loop exited", self.id);
    }

    /// Read the pin while still serving due timers. `None` if cancelled
    /// before the read finished.
    async fn read_pin(&mut self, cancel: &CancellationToken) -> Option<Result<Sample, PinError>> {
        let pin = self.pin.clone();
        let mut read = pin.read();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = wait_until(self.next_deadline()) => self.poll_due(Instant::now()),
                result = &mut read => return Some(result),
            }
        }
    }

    fn on_sample(&mut self, sample: Sample, now: Instant) {
        for trigger in &mut self.triggers {
            if let Some(fire) = trigger.debouncer.observe(sample.voltage, now) {
                trigger.fire(&self.id, &self.dispatcher, fire, sample.timestamp);
            }
        }
        for report in &mut self.reports {
            if let Some(emission) = report.scheduler.on_sample(sample.voltage) {
                report.emit(&self.id, &self.dispatcher, emission, sample.timestamp);
            }
        }
    }

    fn poll_due(&mut self, now: Instant) {
        for trigger in &mut self.triggers {
            if let Some(fire) = trigger.debouncer.poll_due(now) {
                trigger.fire(&self.id, &self.dispatcher, fire, Utc::now());
            }
        }
        for report in &mut self.reports {
            if let Some(emission) = report.scheduler.poll_due(now) {
                report.emit(&self.id, &self.dispatcher, emission, Utc::now());
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        let triggers = self.triggers.iter().filter_map(|t| t.debouncer.next_deadline());
        let reports = self.reports.iter().filter_map(|r| r.scheduler.next_deadline());
        triggers.chain(reports).min()
    }
}

/// Conditions describing one trigger, action, report or the output level.
fn is_item_condition(condition_type: &str) -> bool {
    condition_type.starts_with("Trigger")
        || condition_type.starts_with("Report")
        || condition_type == OUTPUT_APPLIED
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Drive an output pin to `voltage`, hold it until cancelled, then drive it low.
async fn drive_output(
    pin: Arc<dyn PinSource>,
    voltage: f64,
    status: StatusWriter,
    retry: RetryPolicy,
    cancel: CancellationToken,
) {
    let claim = status.claim().clone();
    let mut failures: u32 = 0;
    loop {
        match pin.write(voltage).await {
            Ok(()) => {
                info!("[Monitor] {} driven to {:.3} V", claim, voltage);
                status.set(
                    OUTPUT_APPLIED,
                    ConditionStatus::True,
                    "Applied",
                    format!("driven to {voltage:.3} V"),
                );
                let reason = if failures > 0 { "PinWriteRecovered" } else { "PinHealthy" };
                status.set(DEGRADED, ConditionStatus::False, reason, "");
                break;
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                warn!("[Monitor] {} {}", claim, e);
                status.set(OUTPUT_APPLIED, ConditionStatus::False, "PinWriteFailed", e.to_string());
                status.set(DEGRADED, ConditionStatus::True, "PinWriteFailed", e.to_string());
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(retry.delay(failures)) => {}
                }
            }
        }
    }

    cancel.cancelled().await;
    match pin.write(0.0).await {
        Ok(()) => {
            info!("[Monitor] {} driven low on stop", claim);
            status.set(OUTPUT_APPLIED, ConditionStatus::False, "Released", "driven low on stop");
        }
        Err(e) => warn!("[Monitor] {} could not drive low on stop: {}", claim, e),
    }
}

/// Control surface for a running monitor.
pub struct MonitorHandle {
    id: ClaimId,
    state: Mutex<MonitorState>,
    status: StatusWriter,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    dispatcher: Option<Arc<ActionDispatcher>>,
    publisher_shutdown: CancellationToken,
    publisher: Mutex<Option<JoinHandle<()>>>,
    stopped: OnceCell<()>,
}

impl MonitorHandle {
    pub fn id(&self) -> &ClaimId {
        &self.id
    }

    pub fn state(&self) -> MonitorState {
        *self.state.lock()
    }

    pub fn current_status(&self) -> PinClaimStatus {
        self.status.snapshot()
    }

    /// Stop the monitor and wait for its tasks. Safe to call more than once;
    /// every caller returns only after the first stop has completed.
    ///
    /// Pending interval timers and retry backoffs are cancelled. A delivery
    /// already in flight finishes, but its outcome is not recorded.
    pub async fn stop(&self) {
        self.stopped.get_or_init(|| self.shutdown()).await;
    }

    async fn shutdown(&self) {
        let previous = {
            let mut state = self.state.lock();
            let previous = *state;
            if matches!(previous, MonitorState::Starting | MonitorState::Running) {
                *state = MonitorState::Stopping;
            }
            previous
        };
        if previous == MonitorState::Running {
            info!("[Monitor] {} stopping", self.id);
        }

        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            error!("[Monitor] {} task failed: {}", self.id, e);
        }
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.shutdown();
            dispatcher.drained().await;
        }

        if previous == MonitorState::Running {
            self.status
                .set(AVAILABLE, ConditionStatus::False, "Stopped", "monitor stopped");
        }
        self.status.retire();
        self.publisher_shutdown.cancel();
        let publisher = self.publisher.lock().take();
        if let Some(publisher) = publisher
            && let Err(e) = publisher.await
        {
            error!("[Monitor] {} status publisher failed: {}", self.id, e);
        }
        *self.state.lock() = MonitorState::Stopped;
    }

    fn refuse(&self, message: String) {
        error!("[Monitor] {} has an invalid spec: {}", self.id, message);
        self.status
            .set(AVAILABLE, ConditionStatus::False, "InvalidSpec", message.clone());
        self.status
            .set(PROGRESSING, ConditionStatus::False, "InvalidSpec", message);
        *self.state.lock() = MonitorState::Stopped;
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.publisher_shutdown.cancel();
    }
}
