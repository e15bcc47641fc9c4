use thiserror::Error as ThisError;

/// A malformed field in a claim spec.
///
/// Found while a monitor is `Starting`; terminal for that monitor until the
/// spec changes, except where noted on the variant.
#[derive(ThisError, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("mode {mode} does not match the supplied spec: {reason}")]
    ModeMismatch { mode: String, reason: String },

    #[error("trigger {trigger}: tolerance must be >= 0, got {tolerance}")]
    NegativeTolerance { trigger: usize, tolerance: f64 },

    /// Only disables the owning trigger; the monitor keeps running.
    #[error("trigger {trigger}: invalid continuousInterval {value:?}: {reason}")]
    InvalidContinuousInterval {
        trigger: usize,
        value: String,
        reason: String,
    },

    #[error("trigger {trigger} action {action}: neither hookUrl nor jobTemplate is set")]
    ActionWithoutDelivery { trigger: usize, action: usize },

    #[error("report {report}: invalid interval {value:?}: {reason}")]
    InvalidReportInterval {
        report: usize,
        value: String,
        reason: String,
    },

    #[error("report {report}: hookURL is required when the report emits")]
    ReportWithoutHook { report: usize },

    #[error("output source {value:?} cannot be resolved to a pin value")]
    InvalidOutputSource { value: String },

    #[error("invalid duration {0:?}")]
    InvalidDuration(String),
}

/// Failure talking to the hardware-access layer.
#[derive(ThisError, Debug)]
pub enum PinError {
    #[error("failed to read pin {pin}: {reason}")]
    Read { pin: String, reason: String },

    #[error("failed to write pin {pin}: {reason}")]
    Write { pin: String, reason: String },

    #[error("pin {pin} does not support {operation}")]
    Unsupported { pin: String, operation: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failure delivering a payload to a webhook.
#[derive(ThisError, Debug)]
pub enum HookError {
    #[error("webhook timed out")]
    Timeout,

    #[error("webhook unreachable: {0}")]
    Unreachable(String),

    #[error("webhook rejected the call with status {status}")]
    Rejected { status: u16 },

    #[error("failed to encode payload: {0}")]
    Encode(String),
}

impl HookError {
    /// Network faults, 5xx and 429 are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            HookError::Timeout | HookError::Unreachable(_) => true,
            HookError::Rejected { status } => *status >= 500 || *status == 429,
            HookError::Encode(_) => false,
        }
    }
}

/// Failure submitting a job.
#[derive(ThisError, Debug)]
pub enum JobError {
    #[error("job rejected: {0}")]
    Rejected(String),

    #[error("job quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("invalid job template: {0}")]
    InvalidTemplate(String),

    #[error("job backend unavailable: {0}")]
    Unavailable(String),
}

impl JobError {
    pub fn is_transient(&self) -> bool {
        matches!(self, JobError::QuotaExceeded(_) | JobError::Unavailable(_))
    }
}

/// Delivery outcome as seen by the retry loop.
#[derive(ThisError, Debug)]
pub enum DeliveryError {
    #[error("transient delivery failure: {0}")]
    Transient(String),

    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }
}

impl From<HookError> for DeliveryError {
    fn from(err: HookError) -> Self {
        if err.is_transient() {
            DeliveryError::Transient(err.to_string())
        } else {
            DeliveryError::Permanent(err.to_string())
        }
    }
}

impl From<JobError> for DeliveryError {
    fn from(err: JobError) -> Self {
        if err.is_transient() {
            DeliveryError::Transient(err.to_string())
        } else {
            DeliveryError::Permanent(err.to_string())
        }
    }
}

#[derive(ThisError, Debug)]
pub enum RepositoryError {
    #[error("claim store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("claim store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(ThisError, Debug)]
pub enum AgentError {
    #[error("invalid claim: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pin(#[from] PinError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("pin {pin} is already claimed by {existing}")]
    PinConflict { pin: String, existing: String },

    #[error("failed to build HTTP client: {0}")]
    Http(String),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;
