use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConvergeError {
    #[error("Invalid configuration: {0}")]
    Validation(String),

    #[error("{method} {path} failed with status {status}: {message}")]
    Remote {
        method: String,
        path: String,
        status: u16,
        message: String,
    },

    #[error("Cannot resolve {kind} '{target}': {reason}")]
    HierarchyResolution {
        kind: String,
        target: String,
        reason: String,
    },

    #[error("Invalid invocation: {0}")]
    Policy(String),

    #[error("Unexpected API response: {0}")]
    Api(String),

    #[error("{failed} of {total} entities failed to converge")]
    BatchFailed { failed: usize, total: usize },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConvergeError {
    /// HTTP status of a failed remote call, if this is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConvergeError>;
