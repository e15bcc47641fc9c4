//! Getting fired actions and reports out of the agent.
//!
//! Two backends sit behind traits: webhooks ([`HookDelivery`]) and job
//! submission ([`JobSubmitter`]). The [`ActionDispatcher`] runs every delivery
//! on its own task with bounded retries, so sampling never waits on them.

pub mod dispatcher;
pub mod job;
pub mod recording;
pub mod retry;
pub mod webhook;

use crate::claim::ClaimId;
use crate::engine::ReportReason;
use crate::error::{HookError, JobError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub use dispatcher::ActionDispatcher;
pub use job::{KubernetesJobSubmitter, build_job};
pub use recording::{RecordingHookDelivery, RecordingJobSubmitter};
pub use retry::RetryPolicy;
pub use webhook::ReqwestHookDelivery;

/// What happened when a trigger fired; sent with every action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FireContext {
    pub claim: String,
    pub trigger: usize,
    pub action: usize,
    pub voltage: f64,
    pub timestamp: DateTime<Utc>,
}

impl FireContext {
    pub fn new(
        claim: &ClaimId,
        trigger: usize,
        action: usize,
        voltage: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            claim: claim.to_string(),
            trigger,
            action,
            voltage,
            timestamp,
        }
    }
}

/// Body of a report delivery.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportContext {
    pub claim: String,
    pub report: usize,
    #[serde(rename = "type")]
    pub kind: String,
    pub reason: ReportReason,
    pub voltage: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait HookDelivery: Send + Sync {
    async fn send(&self, url: &str, payload: &serde_json::Value) -> Result<(), HookError>;
}

#[async_trait]
pub trait JobSubmitter: Send + Sync {
    /// Submit one job built from `template`; returns the created job's name.
    async fn submit(
        &self,
        template: &serde_json::Value,
        context: &FireContext,
    ) -> Result<String, JobError>;
}

/// Canned HTTP responder for exercising the real backends.
#[cfg(test)]
pub(crate) mod test_server {
    use axum::Router;
    use axum::body::Bytes;
    use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    /// A request as the server received it.
    #[derive(Debug)]
    pub struct Captured {
        pub method: Method,
        pub path: String,
        pub headers: HeaderMap,
        pub body: String,
    }

    pub struct TestServer {
        pub base: String,
        requests: mpsc::UnboundedReceiver<Captured>,
    }

    impl TestServer {
        pub async fn next_request(&mut self) -> Captured {
            self.requests.recv().await.expect("server stopped")
        }
    }

    /// Answer every request with `status` and a JSON `body`.
    pub async fn serve(status: u16, body: &'static str) -> TestServer {
        serve_after(Duration::ZERO, status, body).await
    }

    /// Like [`serve`], but hold each response back for `delay`.
    pub async fn serve_after(delay: Duration, status: u16, body: &'static str) -> TestServer {
        let status = StatusCode::from_u16(status).unwrap();
        let (tx, requests) = mpsc::unbounded_channel();
        let app = Router::new().fallback(
            move |method: Method, uri: Uri, headers: HeaderMap, payload: Bytes| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(Captured {
                        method,
                        path: uri.path().to_string(),
                        headers,
                        body: String::from_utf8_lossy(&payload).into_owned(),
                    });
                    tokio::time::sleep(delay).await;
                    (status, [(header::CONTENT_TYPE, "application/json")], body)
                }
            },
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        TestServer { base, requests }
    }
}
