use super::HookDelivery;
use crate::error::{AgentError, HookError};
use async_trait::async_trait;
use log::debug;
use serde_json::Value;
use std::time::Duration;

/// Posts JSON payloads to webhook URLs.
#[derive(Clone)]
pub struct ReqwestHookDelivery {
    client: reqwest::Client,
}

impl ReqwestHookDelivery {
    pub fn new(timeout: Duration) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pinclaim-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AgentError::Http(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HookDelivery for ReqwestHookDelivery {
    async fn send(&self, url: &str, payload: &Value) -> Result<(), HookError> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        debug!("[Dispatch] POST {} -> {}", url, status);
        if status.is_success() {
            Ok(())
        } else {
            Err(HookError::Rejected {
                status: status.as_u16(),
            })
        }
    }
}

fn classify(err: reqwest::Error) -> HookError {
    if err.is_timeout() {
        HookError::Timeout
    } else if err.is_builder() {
        HookError::Encode(err.to_string())
    } else {
        HookError::Unreachable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::test_server::{serve, serve_after};
    use axum::http::Method;
    use serde_json::json;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_success_posts_json_body() {
        let mut server = serve(200, "").await;
        let hooks = ReqwestHookDelivery::new(Duration::from_secs(5)).unwrap();

        hooks
            .send(&format!("{}/hook", server.base), &json!({"claim": "17/input_low"}))
            .await
            .unwrap();

        let request = server.next_request().await;
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.path, "/hook");
        let body: Value = serde_json::from_str(&request.body).unwrap();
        assert_eq!(body["claim"], "17/input_low");
    }

    #[tokio::test]
    async fn test_non_success_status_is_rejected() {
        let server = serve(503, "").await;
        let hooks = ReqwestHookDelivery::new(Duration::from_secs(5)).unwrap();

        let err = hooks.send(&server.base, &json!({})).await.unwrap_err();
        assert!(matches!(err, HookError::Rejected { status: 503 }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_refused_connection_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        drop(listener);

        let hooks = ReqwestHookDelivery::new(Duration::from_secs(5)).unwrap();
        let err = hooks.send(&url, &json!({})).await.unwrap_err();
        assert!(matches!(err, HookError::Unreachable(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let server = serve_after(Duration::from_secs(10), 200, "").await;

        let hooks = ReqwestHookDelivery::new(Duration::from_millis(200)).unwrap();
        let err = hooks.send(&server.base, &json!({})).await.unwrap_err();
        assert!(matches!(err, HookError::Timeout), "{err:?}");
    }
}
