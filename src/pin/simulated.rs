//! In-memory pins for development runs and tests.
//!
//! A [`SimulatedPin`] can be driven from any thread. Tests use it to script
//! voltages and inject read/write faults; the agent binary drives it with a
//! square wave when no hardware is present.

use super::{PinProvider, PinSource, Sample};
use crate::claim::Mode;
use crate::error::PinError;
use async_trait::async_trait;
use log::info;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tokio::task::JoinHandle;
use tokio::time::{Duration, interval};

pub struct SimulatedPin {
    pin: String,
    /// f64 bits of the current voltage.
    voltage: AtomicU64,
    failing_reads: AtomicU32,
    failing_writes: AtomicU32,
    reads: AtomicU32,
    writes: Mutex<Vec<f64>>,
}

impl SimulatedPin {
    pub fn new(pin: impl Into<String>, initial: f64) -> Self {
        Self {
            pin: pin.into(),
            voltage: AtomicU64::new(initial.to_bits()),
            failing_reads: AtomicU32::new(0),
            failing_writes: AtomicU32::new(0),
            reads: AtomicU32::new(0),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.voltage.load(Ordering::SeqCst))
    }

    pub fn set(&self, voltage: f64) {
        self.voltage.store(voltage.to_bits(), Ordering::SeqCst);
    }

    /// Make the next `count` reads fail.
    pub fn fail_next_reads(&self, count: u32) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` writes fail.
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    pub fn read_count(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Every voltage successfully written, oldest first.
    pub fn writes(&self) -> Vec<f64> {
        self.writes.lock().clone()
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl PinSource for SimulatedPin {
    fn pin(&self) -> &str {
        &self.pin
    }

    async fn read(&self) -> Result<Sample, PinError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_reads) {
            return Err(PinError::Read {
                pin: self.pin.clone(),
                reason: "simulated fault".to_string(),
            });
        }
        Ok(Sample::now(self.get()))
    }

    async fn write(&self, voltage: f64) -> Result<(), PinError> {
        if Self::take_failure(&self.failing_writes) {
            return Err(PinError::Write {
                pin: self.pin.clone(),
                reason: "simulated fault".to_string(),
            });
        }
        self.set(voltage);
        self.writes.lock().push(voltage);
        Ok(())
    }
}

/// Provider that creates simulated pins on demand and keeps them addressable.
#[derive(Default)]
pub struct SimulatedPinProvider {
    pins: Mutex<HashMap<String, Arc<SimulatedPin>>>,
}

impl SimulatedPinProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// The pin with this name, created at 0 V if it does not exist yet.
    pub fn pin(&self, name: &str) -> Arc<SimulatedPin> {
        self.pins
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(SimulatedPin::new(name, 0.0)))
            .clone()
    }
}

#[async_trait]
impl PinProvider for SimulatedPinProvider {
    async fn acquire(&self, pin: &str, _mode: Mode) -> Result<Arc<dyn PinSource>, PinError> {
        Ok(self.pin(pin))
    }
}

/// Spawn a task that flips `pin` between 0 V and `high` every `period`.
///
/// Returns a `JoinHandle` that can be used to abort the simulation.
pub fn run_square_wave(pin: Arc<SimulatedPin>, high: f64, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        loop {
            ticker.tick().await;
            let next = if pin.get() > high / 2.0 { 0.0 } else { high };
            pin.set(next);
            info!("[Sim] Pin {} set to {:.2} V", pin.pin(), next);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_read_failures() {
        let pin = SimulatedPin::new("17", 1.2);
        pin.fail_next_reads(2);

        assert!(pin.read().await.is_err());
        assert!(pin.read().await.is_err());
        let sample = pin.read().await.unwrap();
        assert_eq!(sample.voltage, 1.2);
        assert_eq!(pin.read_count(), 3);
    }

    #[tokio::test]
    async fn test_writes_are_recorded() {
        let pin = SimulatedPin::new("4", 0.0);
        pin.fail_next_writes(1);

        assert!(pin.write(3.3).await.is_err());
        pin.write(3.3).await.unwrap();
        pin.write(0.0).await.unwrap();
        assert_eq!(pin.writes(), vec![3.3, 0.0]);
    }

    #[tokio::test]
    async fn test_provider_hands_out_the_same_pin() {
        let provider = SimulatedPinProvider::new();
        let handle = provider.acquire("22", Mode::InputLow).await.unwrap();
        provider.pin("22").set(2.5);
        assert_eq!(handle.read().await.unwrap().voltage, 2.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_square_wave_toggles() {
        let pin = Arc::new(SimulatedPin::new("5", 0.0));
        let task = run_square_wave(pin.clone(), 3.3, Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pin.get(), 3.3);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(pin.get(), 0.0);

        task.abort();
    }
}
