pub mod breaker;
pub mod cost;
pub mod error;
pub mod http;
pub mod retry;
pub mod traits;

pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use cost::CostModel;
pub use error::AiError;
pub use http::{HttpChatClient, HttpEmbedder, HttpSocialAnalyst, HttpWebResearcher};
pub use retry::retry_with_backoff;
pub use traits::*;
