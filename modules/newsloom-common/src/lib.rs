pub mod config;
pub mod error;
pub mod events;
pub mod robots;
pub mod types;

pub use config::Config;
pub use error::NewsloomError;
pub use events::*;
pub use types::*;

/// Extract the domain from a URL (e.g., "https://www.example.com/path" -> "www.example.com").
pub fn extract_domain(url: &str) -> String {
    url.split("://")
        .nth(1)
        .unwrap_or(url)
        .split('/')
        .next()
        .unwrap_or("")
        .to_lowercase()
}

/// Canonical form used for URL-set comparisons: lowercase, trailing slash stripped.
pub fn normalize_url(url: &str) -> String {
    url.trim().to_lowercase().trim_end_matches('/').to_string()
}

/// Word count approximated by whitespace splitting. Used for length budgets
/// and reading time.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Reading time in minutes at ~200 words per minute, minimum 1.
pub fn reading_time_minutes(text: &str) -> u32 {
    (word_count(text) as u32).div_ceil(200).max(1)
}
