//! Trigger evaluation primitives owned by a single monitor.

pub mod cooldown;
pub mod debouncer;
pub mod report;

pub use cooldown::CooldownGate;
pub use debouncer::{DebounceState, Debouncer, Fire};
pub use report::{Emission, ReportReason, ReportScheduler};
