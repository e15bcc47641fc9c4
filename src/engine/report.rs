//! Per-report emission schedule.
//!
//! Two independent sources: a fixed interval, and a change in the sampled
//! value. Coincident emissions from both are both kept.

use serde::Serialize;
use strum::Display;
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReportReason {
    Interval,
    Change,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Emission {
    pub reason: ReportReason,
    /// Latest sampled voltage; `None` before the first sample arrives.
    pub voltage: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ReportScheduler {
    period: Option<Duration>,
    on_change: bool,
    next_due: Option<Instant>,
    latest: Option<f64>,
    last_change_report: Option<f64>,
}

impl ReportScheduler {
    /// First interval emission is one `period` after `start`.
    pub fn new(period: Option<Duration>, on_change: bool, start: Instant) -> Self {
        Self {
            period,
            on_change,
            next_due: period.map(|p| start + p),
            latest: None,
            last_change_report: None,
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.next_due
    }

    /// Feed an accepted sample; emits when on-change reporting is enabled
    /// and the value differs from the last one reported on change.
    pub fn on_sample(&mut self, voltage: f64) -> Option<Emission> {
        self.latest = Some(voltage);
        if !self.on_change || self.last_change_report == Some(voltage) {
            return None;
        }
        self.last_change_report = Some(voltage);
        Some(Emission {
            reason: ReportReason::Change,
            voltage: Some(voltage),
        })
    }

    /// Emit the interval report if it is due. Missed ticks are skipped
    /// rather than replayed.
    pub fn poll_due(&mut self, now: Instant) -> Option<Emission> {
        let (Some(due), Some(period)) = (self.next_due, self.period) else {
            return None;
        };
        if now < due {
            return None;
        }
        let mut next = due + period;
        if next <= now {
            next = now + period;
        }
        self.next_due = Some(next);
        Some(Emission {
            reason: ReportReason::Interval,
            voltage: self.latest,
        })
    }
}
