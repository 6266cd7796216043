use thiserror::Error;

/// Failure talking to a worker agent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Network failure or timeout. Retried with bounded backoff.
    #[error("transport error: {0}")]
    Transport(String),

    /// The worker explicitly rejected the request. Never retried.
    #[error("worker rejected request{}: {message}", code.map(|c| format!(" ({})", c)).unwrap_or_default())]
    Worker { code: Option<i64>, message: String },

    /// The worker answered with something we could not understand.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl DispatchError {
    pub fn worker(message: impl Into<String>) -> Self {
        DispatchError::Worker {
            code: None,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::Transport(_))
    }
}

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return DispatchError::Protocol(err.to_string());
        }
        match err.status() {
            Some(status) if status.is_client_error() => DispatchError::Worker {
                code: Some(i64::from(status.as_u16())),
                message: err.to_string(),
            },
            _ => DispatchError::Transport(err.to_string()),
        }
    }
}
