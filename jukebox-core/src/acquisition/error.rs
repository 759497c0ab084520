/// Phrases the upstream uses when it refuses to serve a client.
const BLOCK_MARKERS: &[&str] = &[
    "sign in to confirm",
    "not a bot",
    "http error 403",
    "http error 429",
    "too many requests",
];

#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    /// The egress path was refused; another egress may succeed.
    #[error("Blocked on egress '{egress}': {message}")]
    Blocked { egress: String, message: String },

    #[error("All {attempts} egress paths blocked, last: {last}")]
    Exhausted { attempts: usize, last: String },

    #[error("{0}")]
    Failed(String),

    #[error("Unexpected source metadata: {0}")]
    Metadata(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AcquisitionError {
    /// Build an error from upstream error text, recognising block signals.
    pub fn from_message(egress: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        if is_block_signal(&message) {
            Self::Blocked {
                egress: egress.to_string(),
                message,
            }
        } else {
            Self::Failed(message)
        }
    }

    pub fn from_status(egress: &str, status: reqwest::StatusCode) -> Self {
        let message = format!("HTTP status {status}");
        if is_block_status(status) {
            Self::Blocked {
                egress: egress.to_string(),
                message,
            }
        } else {
            Self::Failed(message)
        }
    }

    #[must_use]
    pub const fn is_block(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }

    /// Metric label
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Blocked { .. } => "blocked",
            Self::Exhausted { .. } => "exhausted",
            Self::Failed(_) | Self::Metadata(_) | Self::Json(_) => "failed",
            Self::Http(_) => "http",
            Self::Io(_) => "io",
        }
    }
}

#[must_use]
pub fn is_block_signal(text: &str) -> bool {
    let lower = text.to_lowercase();
    BLOCK_MARKERS.iter().any(|marker| lower.contains(marker))
}

#[must_use]
pub fn is_block_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::FORBIDDEN || status == reqwest::StatusCode::TOO_MANY_REQUESTS
}
