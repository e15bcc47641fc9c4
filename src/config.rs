use crate::delivery::RetryPolicy;
use crate::monitor::MonitorSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Load environment variables from a `.env` file in the working directory.
/// Values may contain spaces without quotes; real env vars take precedence.
pub fn load_dotenv() {
    let env_path = Path::new(".env");
    let Ok(content) = fs::read_to_string(env_path) else {
        return;
    };

    for (key, value) in parse_dotenv(&content) {
        if std::env::var(&key).is_err() {
            // SAFETY: called from main before the runtime starts any threads
            unsafe { std::env::set_var(key, value) };
        }
    }
}

fn parse_dotenv(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let key = key.trim().trim_start_matches("export ").trim();
            let mut value = value.trim();
            if value.len() >= 2
                && ((value.starts_with('"') && value.ends_with('"'))
                    || (value.starts_with('\'') && value.ends_with('\'')))
            {
                value = &value[1..value.len() - 1];
            }
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub sampling: SamplingConfig,
    pub dispatch: DispatchConfig,
    pub jobs: JobConfig,
    pub status_file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub interval_ms: u64,
    pub logic_high_volts: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub hook_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub namespace: String,
    pub api_base: String,
}

const IN_CLUSTER_API: &str = "https://kubernetes.default.svc";

fn default_status_file() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .map(|dir| dir.join("pinclaim-agent").join("status.json"))
        .unwrap_or_else(|| PathBuf::from("pinclaim-status.json"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sampling: SamplingConfig {
                interval_ms: 50,
                logic_high_volts: 3.3,
            },
            dispatch: DispatchConfig {
                max_attempts: 5,
                initial_backoff_ms: 500,
                max_backoff_ms: 30_000,
                hook_timeout_ms: 5_000,
            },
            jobs: JobConfig {
                namespace: "default".to_string(),
                api_base: IN_CLUSTER_API.to_string(),
            },
            status_file: default_status_file(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from defaults overlaid with whatever `lookup` returns. Values
    /// that fail to parse are ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse().ok());

        if let Some(ms) = parsed("PINCLAIM_SAMPLE_INTERVAL_MS")
            && ms > 0
        {
            config.sampling.interval_ms = ms;
        }
        if let Some(volts) = lookup("PINCLAIM_LOGIC_HIGH_VOLTS").and_then(|v| v.trim().parse::<f64>().ok())
            && volts.is_finite()
            && volts > 0.0
        {
            config.sampling.logic_high_volts = volts;
        }

        if let Some(attempts) = lookup("PINCLAIM_DISPATCH_MAX_ATTEMPTS").and_then(|v| v.trim().parse::<u32>().ok())
            && attempts > 0
        {
            config.dispatch.max_attempts = attempts;
        }
        if let Some(ms) = parsed("PINCLAIM_DISPATCH_INITIAL_BACKOFF_MS") {
            config.dispatch.initial_backoff_ms = ms;
        }
        if let Some(ms) = parsed("PINCLAIM_DISPATCH_MAX_BACKOFF_MS") {
            config.dispatch.max_backoff_ms = ms;
        }
        if let Some(ms) = parsed("PINCLAIM_HOOK_TIMEOUT_MS")
            && ms > 0
        {
            config.dispatch.hook_timeout_ms = ms;
        }

        if let Some(namespace) = lookup("PINCLAIM_JOB_NAMESPACE").filter(|v| !v.trim().is_empty()) {
            config.jobs.namespace = namespace.trim().to_string();
        }
        if let Some(api) = lookup("PINCLAIM_KUBE_API").filter(|v| !v.trim().is_empty()) {
            config.jobs.api_base = api.trim().to_string();
        } else if let (Some(host), Some(port)) = (
            lookup("KUBERNETES_SERVICE_HOST"),
            lookup("KUBERNETES_SERVICE_PORT"),
        ) {
            config.jobs.api_base = if host.contains(':') {
                format!("https://[{host}]:{port}")
            } else {
                format!("https://{host}:{port}")
            };
        }

        if let Some(path) = lookup("PINCLAIM_STATUS_FILE").filter(|v| !v.trim().is_empty()) {
            config.status_file = PathBuf::from(path.trim());
        }

        config
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sampling.interval_ms)
    }

    pub fn hook_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch.hook_timeout_ms)
    }

    pub fn dispatch_retry(&self) -> RetryPolicy {
        let initial = Duration::from_millis(self.dispatch.initial_backoff_ms);
        RetryPolicy {
            max_attempts: self.dispatch.max_attempts,
            initial_backoff: initial,
            max_backoff: Duration::from_millis(self.dispatch.max_backoff_ms).max(initial),
            ..RetryPolicy::default()
        }
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            sample_interval: self.sample_interval(),
            logic_high: self.sampling.logic_high_volts,
            dispatch_retry: self.dispatch_retry(),
            ..MonitorSettings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config.sampling.interval_ms, 50);
        assert_eq!(config.dispatch.max_attempts, 5);
        assert_eq!(config.jobs.namespace, "default");
        assert_eq!(config.jobs.api_base, IN_CLUSTER_API);
        assert_eq!(config.dispatch_retry(), RetryPolicy::default());
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("PINCLAIM_SAMPLE_INTERVAL_MS", "20"),
            ("PINCLAIM_LOGIC_HIGH_VOLTS", "5.0"),
            ("PINCLAIM_DISPATCH_MAX_ATTEMPTS", "3"),
            ("PINCLAIM_HOOK_TIMEOUT_MS", "1500"),
            ("PINCLAIM_JOB_NAMESPACE", "gpio"),
            ("PINCLAIM_STATUS_FILE", "/tmp/status.json"),
        ]));
        assert_eq!(config.sample_interval(), Duration::from_millis(20));
        assert_eq!(config.monitor_settings().logic_high, 5.0);
        assert_eq!(config.dispatch_retry().max_attempts, 3);
        assert_eq!(config.hook_timeout(), Duration::from_millis(1500));
        assert_eq!(config.jobs.namespace, "gpio");
        assert_eq!(config.status_file, PathBuf::from("/tmp/status.json"));
    }

    #[test]
    fn test_bad_values_fall_back_to_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("PINCLAIM_SAMPLE_INTERVAL_MS", "0"),
            ("PINCLAIM_LOGIC_HIGH_VOLTS", "lots"),
            ("PINCLAIM_DISPATCH_MAX_ATTEMPTS", "-1"),
        ]));
        assert_eq!(config.sampling.interval_ms, 50);
        assert_eq!(config.sampling.logic_high_volts, 3.3);
        assert_eq!(config.dispatch.max_attempts, 5);
    }

    #[test]
    fn test_in_cluster_api_from_service_env() {
        let config = Config::from_lookup(lookup(&[
            ("KUBERNETES_SERVICE_HOST", "10.96.0.1"),
            ("KUBERNETES_SERVICE_PORT", "443"),
        ]));
        assert_eq!(config.jobs.api_base, "https://10.96.0.1:443");

        let config = Config::from_lookup(lookup(&[
            ("KUBERNETES_SERVICE_HOST", "10.96.0.1"),
            ("PINCLAIM_KUBE_API", "http://127.0.0.1:8001"),
        ]));
        assert_eq!(config.jobs.api_base, "http://127.0.0.1:8001");
    }

    #[test]
    fn test_parse_dotenv() {
        let pairs = parse_dotenv(
            "# comment\n\nPINCLAIM_JOB_NAMESPACE = gpio jobs\nexport PINCLAIM_KUBE_API=\"http://x\"\nnot a pair\n",
        );
        assert_eq!(
            pairs,
            vec![
                ("PINCLAIM_JOB_NAMESPACE".to_string(), "gpio jobs".to_string()),
                ("PINCLAIM_KUBE_API".to_string(), "http://x".to_string()),
            ]
        );
    }
}
