//! Kubernetes `batch/v1` job submission.

use super::{FireContext, JobSubmitter};
use crate::error::{AgentError, JobError};
use async_trait::async_trait;
use log::{debug, info};
use serde_json::{Map, Value, json};
use std::path::Path;
use std::time::Duration;

pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

const DEFAULT_PREFIX: &str = "pinclaim-job";
/// Leaves room for `-` plus the suffix inside the 63 character name limit.
const MAX_PREFIX_LEN: usize = 54;
const ANNOTATION_PREFIX: &str = "pinclaim.io/";

/// Build a Job object from an action's template.
///
/// `template` is either a `JobTemplateSpec` (`metadata` + `spec`) or a full
/// Job. The pod template must declare at least one container.
pub fn build_job(template: &Value, context: &FireContext, namespace: &str) -> Result<Value, JobError> {
    let Value::Object(template) = template else {
        return Err(JobError::InvalidTemplate("template must be an object".to_string()));
    };

    let mut metadata = match template.get("metadata") {
        Some(Value::Object(m)) => m.clone(),
        None | Some(Value::Null) => Map::new(),
        Some(_) => return Err(JobError::InvalidTemplate("metadata must be an object".to_string())),
    };
    let mut spec = match template.get("spec") {
        Some(Value::Object(s)) => s.clone(),
        _ => return Err(JobError::InvalidTemplate("spec must be an object".to_string())),
    };

    let containers = spec
        .get_mut("template")
        .and_then(|t| t.get_mut("spec"))
        .and_then(|s| s.get_mut("containers"))
        .and_then(Value::as_array_mut)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| {
            JobError::InvalidTemplate("spec.template.spec.containers must be a non-empty list".to_string())
        })?;
    for container in containers.iter_mut() {
        inject_env(container, context)?;
    }

    let prefix = job_prefix(&metadata);
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    metadata.remove("generateName");
    metadata.insert("name".into(), json!(format!("{}-{}", prefix, &suffix[..8])));
    metadata.insert("namespace".into(), json!(namespace));

    let labels = object_entry(&mut metadata, "labels")?;
    labels.insert("app.kubernetes.io/managed-by".into(), json!("pinclaim-agent"));

    let annotations = object_entry(&mut metadata, "annotations")?;
    for (key, value) in context_pairs(context) {
        annotations.insert(format!("{ANNOTATION_PREFIX}{key}"), json!(value));
    }

    // Status and server-set fields have no business in a create request
    spec.remove("selector");
    for field in ["uid", "resourceVersion", "creationTimestamp", "managedFields"] {
        metadata.remove(field);
    }

    Ok(json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": metadata,
        "spec": spec,
    }))
}

fn job_prefix(metadata: &Map<String, Value>) -> String {
    let raw = metadata
        .get("name")
        .or_else(|| metadata.get("generateName"))
        .and_then(Value::as_str)
        .map(|s| s.trim().trim_end_matches('-'))
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_PREFIX);
    let prefix: String = raw.chars().take(MAX_PREFIX_LEN).collect();
    prefix.trim_end_matches('-').to_string()
}

fn object_entry<'a>(map: &'a mut Map<String, Value>, key: &str) -> Result<&'a mut Map<String, Value>, JobError> {
    map.entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| JobError::InvalidTemplate(format!("metadata.{key} must be an object")))
}

fn context_pairs(context: &FireContext) -> [(&'static str, String); 5] {
    [
        ("claim", context.claim.clone()),
        ("trigger", context.trigger.to_string()),
        ("action", context.action.to_string()),
        ("voltage", context.voltage.to_string()),
        ("fired-at", context.timestamp.to_rfc3339()),
    ]
}

fn inject_env(container: &mut Value, context: &FireContext) -> Result<(), JobError> {
    let Value::Object(container) = container else {
        return Err(JobError::InvalidTemplate("container must be an object".to_string()));
    };
    let env = container
        .entry("env")
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .ok_or_else(|| JobError::InvalidTemplate("container env must be a list".to_string()))?;

    for (key, value) in context_pairs(context) {
        let name = format!("PINCLAIM_{}", key.replace('-', "_").to_ascii_uppercase());
        env.retain(|e| e.get("name").and_then(Value::as_str) != Some(name.as_str()));
        env.push(json!({"name": name, "value": value}));
    }
    Ok(())
}

/// Map an API server response to a [`JobError`].
fn classify_response(status: u16, body: &str) -> JobError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());
    let detail = format!("HTTP {status}: {message}");

    match status {
        429 => JobError::QuotaExceeded(detail),
        403 if message.contains("exceeded quota") => JobError::QuotaExceeded(detail),
        400..=499 => JobError::Rejected(detail),
        _ => JobError::Unavailable(detail),
    }
}

/// Submits Jobs straight to the Kubernetes API server.
pub struct KubernetesJobSubmitter {
    client: reqwest::Client,
    api_base: String,
    namespace: String,
    token: Option<String>,
}

impl KubernetesJobSubmitter {
    /// Submitter using the pod's mounted service account, when there is one.
    pub fn in_cluster(api_base: &str, namespace: &str, timeout: Duration) -> Result<Self, AgentError> {
        let dir = Path::new(SERVICE_ACCOUNT_DIR);
        let token = std::fs::read_to_string(dir.join("token"))
            .ok()
            .map(|t| t.trim().to_string());
        let ca = std::fs::read(dir.join("ca.crt")).ok();
        if token.is_none() {
            info!("[Dispatch] No service account token found; job submission is unauthenticated");
        }
        Self::from_parts(api_base, namespace, token, ca, timeout)
    }

    pub fn from_parts(
        api_base: &str,
        namespace: &str,
        token: Option<String>,
        ca_pem: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Result<Self, AgentError> {
        let mut builder = reqwest::Client::builder().timeout(timeout);
        if let Some(pem) = ca_pem {
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| AgentError::Http(e.to_string()))?;
            builder = builder.add_root_certificate(cert);
        }
        let client = builder.build().map_err(|e| AgentError::Http(e.to_string()))?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            namespace: namespace.to_string(),
            token,
        })
    }

    fn jobs_url(&self) -> String {
        format!("{}/apis/batch/v1/namespaces/{}/jobs", self.api_base, self.namespace)
    }
}

#[async_trait]
impl JobSubmitter for KubernetesJobSubmitter {
    async fn submit(&self, template: &Value, context: &FireContext) -> Result<String, JobError> {
        let job = build_job(template, context, &self.namespace)?;
        let fallback = job["metadata"]["name"].as_str().unwrap_or_default().to_string();

        let mut request = self.client.post(self.jobs_url()).json(&job);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| JobError::Unavailable(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(classify_response(status.as_u16(), &body));
        }

        let name = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v["metadata"]["name"].as_str().map(str::to_string))
            .unwrap_or(fallback);
        debug!("[Dispatch] API server accepted job {}/{}", self.namespace, name);
        Ok(name)
    }
}
