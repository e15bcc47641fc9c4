//! In-process backends that record instead of delivering.
//!
//! Used by `--dry-run` and by tests.

use super::{FireContext, HookDelivery, JobSubmitter, build_job};
use crate::error::{HookError, JobError};
use async_trait::async_trait;
use log::info;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;

#[derive(Default)]
pub struct RecordingHookDelivery {
    failures: Mutex<VecDeque<HookError>>,
    attempts: Mutex<u32>,
    deliveries: Mutex<Vec<(String, Value)>>,
}

impl RecordingHookDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error to return instead of the next delivery.
    pub fn fail_next(&self, error: HookError) {
        self.failures.lock().push_back(error);
    }

    pub fn attempts(&self) -> u32 {
        *self.attempts.lock()
    }

    /// Successful deliveries as `(url, payload)`, in arrival order.
    pub fn deliveries(&self) -> Vec<(String, Value)> {
        self.deliveries.lock().clone()
    }
}

#[async_trait]
impl HookDelivery for RecordingHookDelivery {
    async fn send(&self, url: &str, payload: &Value) -> Result<(), HookError> {
        *self.attempts.lock() += 1;
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }
        info!("[Dispatch] (dry run) POST {} {}", url, payload);
        self.deliveries
            .lock()
            .push((url.to_string(), payload.clone()));
        Ok(())
    }
}

pub struct RecordingJobSubmitter {
    namespace: String,
    submitted: Mutex<Vec<Value>>,
}

impl RecordingJobSubmitter {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            submitted: Mutex::new(Vec::new()),
        }
    }

    /// Fully built Job objects, in submission order.
    pub fn submitted(&self) -> Vec<Value> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl JobSubmitter for RecordingJobSubmitter {
    async fn submit(&self, template: &Value, context: &FireContext) -> Result<String, JobError> {
        let job = build_job(template, context, &self.namespace)?;
        let name = job["metadata"]["name"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        info!("[Dispatch] (dry run) create job {}/{}", self.namespace, name);
        self.submitted.lock().push(job);
        Ok(name)
    }
}
