use thiserror::Error;

#[derive(Error, Debug)]
pub enum AiError {
    #[error("rate limited by backend")]
    RateLimited,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("circuit open for backend {0}")]
    CircuitOpen(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl AiError {
    /// Retry policy: rate limits, connection failures and 5xx are transient.
    /// Other 4xx and malformed responses are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            AiError::RateLimited => true,
            AiError::Connection(_) => true,
            AiError::Api { status, .. } => *status >= 500,
            AiError::CircuitOpen(_) => false,
            AiError::InvalidResponse(_) => false,
        }
    }
}

impl From<reqwest::Error> for AiError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            if status.as_u16() == 429 {
                return AiError::RateLimited;
            }
            return AiError::Api {
                status: status.as_u16(),
                message: e.to_string(),
            };
        }
        AiError::Connection(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(AiError::RateLimited.is_retryable());
        assert!(AiError::Connection("reset".into()).is_retryable());
        assert!(AiError::Api { status: 502, message: String::new() }.is_retryable());
        assert!(!AiError::Api { status: 400, message: String::new() }.is_retryable());
        assert!(!AiError::InvalidResponse("bad json".into()).is_retryable());
        assert!(!AiError::CircuitOpen("llm".into()).is_retryable());
    }
}
