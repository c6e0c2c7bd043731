use thiserror::Error;

use crate::http::HttpStep;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("hardware i/o failed: {0}")]
pub struct HwError(pub String);

impl HwError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AtError {
    #[error("`{command}` answered with ERROR")]
    ErrorReply { command: String },
    #[error("`{command}` got no `{expected}` within {timeout_ms} ms")]
    Timeout {
        command: String,
        expected: String,
        timeout_ms: u64,
    },
    #[error(transparent)]
    Transport(#[from] HwError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttachError {
    #[error("modem did not answer AT within {budget_ms} ms of power-on")]
    ModemNotResponding { budget_ms: u64 },
    #[error("network registration not reached within {budget_ms} ms")]
    RegistrationTimeout { budget_ms: u64 },
    #[error("PDP context activation failed")]
    PdpActivation(#[source] AtError),
    #[error("modem power key: {0}")]
    PowerKey(#[from] HwError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error("http step {step} failed")]
    Step {
        step: HttpStep,
        #[source]
        source: AtError,
    },
    #[error("payload encoding failed: {0}")]
    Payload(String),
}

impl UploadError {
    pub fn step(&self) -> Option<HttpStep> {
        match self {
            Self::Step { step, .. } => Some(*step),
            Self::Payload(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DrainError {
    #[error("attach failed: {0}")]
    Attach(#[from] AttachError),
    #[error("upload failed: {0}")]
    Upload(#[from] UploadError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TelemetryError {
    #[error("fuel gauge unavailable: {0}")]
    Gauge(#[from] HwError),
    #[error("signal quality reply unreadable")]
    SignalUnreadable,
}
