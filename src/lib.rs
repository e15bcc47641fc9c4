//! Pin claim agent library.
//!
//! Evaluates declarative pin claims: input pins are sampled against trigger
//! bands that fire webhooks or Kubernetes jobs under per-action cooldowns,
//! reports go out on change or on a schedule, and output pins are driven
//! from a configured source.

pub mod claim;
pub mod config;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod pin;
pub mod repository;
pub mod shutdown;
