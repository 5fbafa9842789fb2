use skycast_core::UserMessage;
use thiserror::Error;

/// Failures surfaced by [`crate::ResilienceManager::execute`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
    /// Short-circuited by an open breaker; no request was sent.
    #[error("Circuit open for {endpoint}, retry in {retry_after_ms} ms")]
    CircuitOpen { endpoint: String, retry_after_ms: u64 },

    #[error("Request to {endpoint} timed out after {timeout_ms} ms")]
    Timeout { endpoint: String, timeout_ms: u64 },

    #[error("Server error {status} from {endpoint}")]
    Server { endpoint: String, status: u16 },

    #[error("Client error {status} from {endpoint}")]
    Client { endpoint: String, status: u16 },

    #[error("Connection to {endpoint} failed: {message}")]
    Connection { endpoint: String, message: String },

    #[error("Network is offline")]
    Offline,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl NetworkError {
    /// Timeouts, 5xx, transport failures, open circuits and offline mode
    /// clear up on their own; 4xx and malformed requests do not.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Client { .. } | Self::InvalidRequest(_))
    }

    /// Whether an immediate in-call retry can help. Every 4xx propagates
    /// on the first attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Server { .. } | Self::Connection { .. }
        )
    }

    /// Only signs of an unhealthy endpoint trip the circuit breaker.
    pub fn counts_against_breaker(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Server { .. } | Self::Connection { .. }
        )
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Server { status, .. } | Self::Client { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl UserMessage for NetworkError {
    fn user_message(&self) -> &'static str {
        match self {
            NetworkError::CircuitOpen { .. } => {
                "The weather service is having trouble. Showing saved data."
            }
            NetworkError::Timeout { .. } => "The request timed out. Please try again.",
            NetworkError::Server { .. } => {
                "The server is experiencing issues. Please try again later."
            }
            NetworkError::Client { status: 429, .. } => {
                "Too many requests. Please wait a moment."
            }
            NetworkError::Client { .. } => "The request failed. Please try again.",
            NetworkError::Connection { .. } => {
                "Unable to connect. Check your internet connection."
            }
            NetworkError::Offline => "You are offline. Showing saved data.",
            NetworkError::InvalidRequest(_) => "The request was invalid.",
        }
    }
}
