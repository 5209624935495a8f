use thiserror::Error;

#[derive(Error, Debug)]
pub enum NewsloomError {
    #[error("pipeline busy: another run is in progress")]
    PipelineBusy,

    #[error("pipeline run cancelled")]
    Cancelled,

    #[error("scrape error: {0}")]
    Scrape(String),

    #[error("source {domain} blocked: {ratio:.0}% of fetches returned a hard-block status")]
    SourceBlocked { domain: String, ratio: f64 },

    #[error("source {domain} timed out after {secs}s")]
    SourceTimeout { domain: String, secs: u64 },

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("llm error: {0}")]
    Llm(String),

    #[error("circuit open for backend {0}")]
    CircuitOpen(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
