//! Linux sysfs pins.
//!
//! Digital pins are addressed by GPIO number (`"17"`) through
//! `/sys/class/gpio`; analog pins by IIO channel (`"iio:device0/in_voltage1"`)
//! through `/sys/bus/iio/devices`, where the reading is `raw * scale`
//! millivolts.

use super::{PinProvider, PinSource, Sample};
use crate::claim::Mode;
use crate::error::PinError;
use async_trait::async_trait;
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

const GPIO_ROOT: &str = "/sys/class/gpio";
const IIO_ROOT: &str = "/sys/bus/iio/devices";

pub struct SysfsPinProvider {
    gpio_root: PathBuf,
    iio_root: PathBuf,
    logic_high: f64,
}

impl SysfsPinProvider {
    pub fn new(logic_high: f64) -> Self {
        Self::with_roots(GPIO_ROOT, IIO_ROOT, logic_high)
    }

    /// Use alternative sysfs roots (tests point these at a scratch directory).
    pub fn with_roots(
        gpio_root: impl Into<PathBuf>,
        iio_root: impl Into<PathBuf>,
        logic_high: f64,
    ) -> Self {
        Self {
            gpio_root: gpio_root.into(),
            iio_root: iio_root.into(),
            logic_high,
        }
    }

    async fn acquire_gpio(&self, pin: &str, mode: Mode) -> Result<GpioPin, PinError> {
        let number: u32 = pin.parse().map_err(|_| PinError::Unsupported {
            pin: pin.to_string(),
            operation: "sysfs gpio addressing".to_string(),
        })?;
        let dir = self.gpio_root.join(format!("gpio{number}"));
        if !fs::try_exists(&dir).await? {
            info!("[Pin] Exporting gpio{}", number);
            fs::write(self.gpio_root.join("export"), number.to_string()).await?;
        }

        // "low" sets the direction to out and drives 0 in one step
        let direction = if mode.is_input() { "in" } else { "low" };
        fs::write(dir.join("direction"), direction).await?;
        if mode.is_input() {
            debug!(
                "[Pin] gpio{} bias for {} must be set in the device tree",
                number, mode
            );
        }

        Ok(GpioPin {
            pin: pin.to_string(),
            value_path: dir.join("value"),
            logic_high: self.logic_high,
        })
    }

    async fn acquire_iio(&self, pin: &str, mode: Mode) -> Result<IioPin, PinError> {
        if !mode.is_input() {
            return Err(PinError::Unsupported {
                pin: pin.to_string(),
                operation: "output".to_string(),
            });
        }
        let (device, channel) = pin.split_once('/').ok_or_else(|| PinError::Unsupported {
            pin: pin.to_string(),
            operation: "iio addressing without a channel".to_string(),
        })?;
        let device_dir = self.iio_root.join(device);
        let raw_path = device_dir.join(format!("{channel}_raw"));
        if !fs::try_exists(&raw_path).await? {
            return Err(PinError::Read {
                pin: pin.to_string(),
                reason: format!("{} not found", raw_path.display()),
            });
        }

        // Per-channel scale wins over the shared one; 1.0 when neither exists
        let channel_scale = device_dir.join(format!("{channel}_scale"));
        let shared_scale = device_dir.join("in_voltage_scale");
        let scale = match read_number(&channel_scale).await {
            Ok(scale) => scale,
            Err(_) => read_number(&shared_scale).await.unwrap_or(1.0),
        };

        Ok(IioPin {
            pin: pin.to_string(),
            raw_path,
            millivolts_per_count: scale,
        })
    }
}

#[async_trait]
impl PinProvider for SysfsPinProvider {
    async fn acquire(&self, pin: &str, mode: Mode) -> Result<Arc<dyn PinSource>, PinError> {
        if pin.starts_with("iio:") {
            Ok(Arc::new(self.acquire_iio(pin, mode).await?))
        } else {
            Ok(Arc::new(self.acquire_gpio(pin, mode).await?))
        }
    }
}

async fn read_number(path: &Path) -> Result<f64, PinError> {
    let text = fs::read_to_string(path).await?;
    text.trim().parse::<f64>().map_err(|e| PinError::Read {
        pin: path.display().to_string(),
        reason: e.to_string(),
    })
}

struct GpioPin {
    pin: String,
    value_path: PathBuf,
    logic_high: f64,
}

#[async_trait]
impl PinSource for GpioPin {
    fn pin(&self) -> &str {
        &self.pin
    }

    async fn read(&self) -> Result<Sample, PinError> {
        let text = fs::read_to_string(&self.value_path)
            .await
            .map_err(|e| PinError::Read {
                pin: self.pin.clone(),
                reason: e.to_string(),
            })?;
        match text.trim() {
            "0" => Ok(Sample::now(0.0)),
            "1" => Ok(Sample::now(self.logic_high)),
            other => Err(PinError::Read {
                pin: self.pin.clone(),
                reason: format!("unexpected value {other:?}"),
            }),
        }
    }

    async fn write(&self, voltage: f64) -> Result<(), PinError> {
        let level = if voltage >= self.logic_high / 2.0 { "1" } else { "0" };
        fs::write(&self.value_path, level)
            .await
            .map_err(|e| PinError::Write {
                pin: self.pin.clone(),
                reason: e.to_string(),
            })
    }
}

struct IioPin {
    pin: String,
    raw_path: PathBuf,
    millivolts_per_count: f64,
}

#[async_trait]
impl PinSource for IioPin {
    fn pin(&self) -> &str {
        &self.pin
    }

    async fn read(&self) -> Result<Sample, PinError> {
        let raw = read_number(&self.raw_path)
            .await
            .map_err(|e| PinError::Read {
                pin: self.pin.clone(),
                reason: e.to_string(),
            })?;
        Ok(Sample::now(raw * self.millivolts_per_count / 1000.0))
    }

    async fn write(&self, _voltage: f64) -> Result<(), PinError> {
        Err(PinError::Unsupported {
            pin: self.pin.clone(),
            operation: "write".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn scratch_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("gpio")).unwrap();
        std::fs::create_dir_all(dir.path().join("iio/iio:device0")).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_gpio_input_reads_logic_levels() {
        let scratch = scratch_dir();
        let root = scratch.path();
        let gpio_dir = root.join("gpio/gpio17");
        std::fs::create_dir_all(&gpio_dir).unwrap();
        std::fs::write(gpio_dir.join("value"), "1\n").unwrap();

        let provider = SysfsPinProvider::with_roots(root.join("gpio"), root.join("iio"), 3.3);
        let pin = provider.acquire("17", Mode::InputLow).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(gpio_dir.join("direction")).unwrap(),
            "in"
        );
        assert_eq!(pin.read().await.unwrap().voltage, 3.3);

        std::fs::write(gpio_dir.join("value"), "0\n").unwrap();
        assert_eq!(pin.read().await.unwrap().voltage, 0.0);
    }

    #[tokio::test]
    async fn test_gpio_output_writes_levels() {
        let scratch = scratch_dir();
        let root = scratch.path();
        let gpio_dir = root.join("gpio/gpio4");
        std::fs::create_dir_all(&gpio_dir).unwrap();

        let provider = SysfsPinProvider::with_roots(root.join("gpio"), root.join("iio"), 3.3);
        let pin = provider.acquire("4", Mode::Output).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(gpio_dir.join("direction")).unwrap(),
            "low"
        );

        pin.write(3.3).await.unwrap();
        assert_eq!(std::fs::read_to_string(gpio_dir.join("value")).unwrap(), "1");
        pin.write(0.2).await.unwrap();
        assert_eq!(std::fs::read_to_string(gpio_dir.join("value")).unwrap(), "0");
    }

    #[tokio::test]
    async fn test_iio_reading_is_scaled_to_volts() {
        let scratch = scratch_dir();
        let root = scratch.path();
        let device = root.join("iio/iio:device0");
        std::fs::write(device.join("in_voltage1_raw"), "2048\n").unwrap();
        std::fs::write(device.join("in_voltage_scale"), "0.805664062\n").unwrap();

        let provider = SysfsPinProvider::with_roots(root.join("gpio"), root.join("iio"), 3.3);
        let pin = provider
            .acquire("iio:device0/in_voltage1", Mode::InputLow)
            .await
            .unwrap();

        let volts = pin.read().await.unwrap().voltage;
        assert!((volts - 1.65).abs() < 0.001, "got {volts}");
        assert!(pin.write(1.0).await.is_err());
    }

    #[tokio::test]
    async fn test_non_numeric_gpio_is_unsupported() {
        let scratch = scratch_dir();
        let root = scratch.path();
        let provider = SysfsPinProvider::with_roots(root.join("gpio"), root.join("iio"), 3.3);
        let result = provider.acquire("led0", Mode::Output).await;
        assert!(matches!(result, Err(PinError::Unsupported { .. })));
    }
}
