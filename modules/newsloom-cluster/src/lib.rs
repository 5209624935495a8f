pub mod dedup;
pub mod embedder;
pub mod engine;
pub mod persistence;

pub use dedup::{dedup_articles, fingerprint, DedupOutcome};
pub use embedder::EmbeddingBatcher;
pub use engine::{cluster_hybrid, RawCluster};
pub use persistence::PersistenceSelector;
