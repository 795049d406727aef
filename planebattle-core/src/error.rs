use std::time::Duration;

/// Why `connect` failed. The backend is left disconnected and does not retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("no initial synchronization within {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Failed(String),
}

impl ConnectionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ConnectionError::Timeout(_))
    }
}
