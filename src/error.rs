use std::time::Duration;
use thiserror::Error;

/// How an error should be treated by the retrier and the candidate loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rate limit or exhausted quota. Retried with a floor delay.
    Quota,
    /// 5xx or transport failure. Retried with normal backoff.
    Transient,
    /// 4xx other than 429, bad config. Never retried.
    Permanent,
    /// Response arrived but could not be used.
    Malformed,
    Timeout,
    Cancelled,
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Quota exceeded{}: {message}", status_suffix(.status))]
    Quota { status: Option<u16>, message: String },
    #[error("Server error{}: {message}", status_suffix(.status))]
    Server { status: Option<u16>, message: String },
    #[error("Client error (HTTP {status}): {message}")]
    Client { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    #[error("Model {model} returned no image data")]
    NoImageData { model: String, text: Option<String> },
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Generation cancelled")]
    Cancelled,
    #[error("Storage quota exceeded: {0}")]
    StorageQuota(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

const QUOTA_MARKERS: [&str; 5] = [
    "quota",
    "rate limit",
    "rate-limit",
    "resource_exhausted",
    "too many requests",
];

impl GenerationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GenerationError::Quota { .. } => ErrorKind::Quota,
            GenerationError::Server { .. } | GenerationError::Transport(_) => ErrorKind::Transient,
            GenerationError::Client { .. }
            | GenerationError::Config(_)
            | GenerationError::StorageQuota(_)
            | GenerationError::Storage(_) => ErrorKind::Permanent,
            GenerationError::MalformedResponse(_)
            | GenerationError::NoImageData { .. }
            | GenerationError::Serialization(_) => ErrorKind::Malformed,
            GenerationError::Timeout(_) => ErrorKind::Timeout,
            GenerationError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Quota | ErrorKind::Transient | ErrorKind::Timeout
        )
    }

    pub fn is_quota(&self) -> bool {
        self.kind() == ErrorKind::Quota
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, GenerationError::Cancelled)
    }

    /// Maps an HTTP status plus the remote error text onto a variant.
    ///
    /// Some backends answer 400/403 with a RESOURCE_EXHAUSTED body, so the
    /// message markers win over the status class for quota detection.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if status == 429 || has_marker(&message, &QUOTA_MARKERS) {
            return GenerationError::Quota {
                status: Some(status),
                message,
            };
        }
        match status {
            500..=599 => GenerationError::Server {
                status: Some(status),
                message,
            },
            400..=499 => GenerationError::Client { status, message },
            _ => GenerationError::MalformedResponse(format!(
                "unexpected HTTP {}: {}",
                status, message
            )),
        }
    }

    /// Classifies a failure that carries no status code, only text. Proxies
    /// sometimes report rate limits this way; everything else is transport.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if has_marker(&message, &QUOTA_MARKERS) || message.contains("429") {
            GenerationError::Quota {
                status: None,
                message,
            }
        } else {
            GenerationError::Transport(message)
        }
    }
}

fn has_marker(message: &str, markers: &[&str]) -> bool {
    let lower = message.to_ascii_lowercase();
    markers.iter().any(|m| lower.contains(m))
}

impl From<serde_json::Error> for GenerationError {
    fn from(e: serde_json::Error) -> Self {
        GenerationError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for GenerationError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            GenerationError::from_status(status.as_u16(), e.to_string())
        } else if e.is_decode() {
            GenerationError::MalformedResponse(e.to_string())
        } else {
            GenerationError::from_message(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, GenerationError>;
