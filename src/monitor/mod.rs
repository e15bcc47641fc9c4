//! Per-claim orchestration.
//!
//! A [`PinMonitor`] owns one claim's runtime state and drives it from pin
//! samples. The [`MonitorRegistry`] keeps one monitor per claim identity and
//! reconciles the set against the declared claims.

pub mod pin_monitor;
pub mod registry;
pub mod status;

use crate::delivery::{HookDelivery, JobSubmitter, RetryPolicy};
use crate::repository::ClaimRepository;
use std::sync::Arc;
use std::time::Duration;

pub use pin_monitor::{MonitorHandle, MonitorState, PinMonitor};
pub use registry::{MonitorRegistry, SyncReport};
pub use status::{StatusWriter, spawn_publisher};

/// Knobs shared by every monitor.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Polling cadence for input pins.
    pub sample_interval: Duration,
    /// Voltage a logic-high output source resolves to.
    pub logic_high: f64,
    /// Backoff for webhook and job deliveries.
    pub dispatch_retry: RetryPolicy,
    /// Backoff between failed pin reads or writes. Only the delay schedule is
    /// used; pin I/O is retried until the monitor stops.
    pub pin_retry: RetryPolicy,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_millis(50),
            logic_high: 3.3,
            dispatch_retry: RetryPolicy::default(),
            pin_retry: RetryPolicy {
                max_attempts: u32::MAX,
                initial_backoff: Duration::from_millis(100),
                max_backoff: Duration::from_secs(5),
                jitter: 0.0,
            },
        }
    }
}

/// Collaborators handed to each monitor.
#[derive(Clone)]
pub struct MonitorDeps {
    pub hooks: Arc<dyn HookDelivery>,
    pub jobs: Arc<dyn JobSubmitter>,
    pub repository: Arc<dyn ClaimRepository>,
    pub settings: MonitorSettings,
}
