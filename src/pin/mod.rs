//! Hardware access seam.
//!
//! The engine only ever sees a [`PinSource`]: something it can sample and,
//! for outputs, drive. Where the value comes from (sysfs, an ADC, a test
//! double) is decided by the [`PinProvider`] handed to the registry.

pub mod simulated;
pub mod sysfs;

use crate::claim::Mode;
use crate::error::PinError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub use simulated::{SimulatedPin, SimulatedPinProvider, run_square_wave};
pub use sysfs::SysfsPinProvider;

/// One reading of a pin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub voltage: f64,
    pub timestamp: DateTime<Utc>,
}

impl Sample {
    pub fn now(voltage: f64) -> Self {
        Self {
            voltage,
            timestamp: Utc::now(),
        }
    }
}

/// A live handle on one pin.
#[async_trait]
pub trait PinSource: Send + Sync {
    /// Pin identifier this handle was acquired for.
    fn pin(&self) -> &str;

    async fn read(&self) -> Result<Sample, PinError>;

    async fn write(&self, voltage: f64) -> Result<(), PinError>;
}

/// Hands out [`PinSource`] handles configured for a claim's mode.
#[async_trait]
pub trait PinProvider: Send + Sync {
    async fn acquire(&self, pin: &str, mode: Mode) -> Result<Arc<dyn PinSource>, PinError>;
}
