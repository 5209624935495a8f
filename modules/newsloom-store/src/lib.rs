//! Storage contracts consumed by the pipeline: a vector store for articles,
//! syntheses, entities and topics, and a fast key-value store for the run
//! lock and source health. The real backends live outside this workspace;
//! the in-memory implementations here back every test.

pub mod memory;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use memory::{MemoryKvStore, MemoryVectorStore};

// --- Collections ---

pub const ARTICLES: &str = "articles";
pub const SYNTHESES: &str = "syntheses";
pub const ENTITIES: &str = "entities";
pub const TOPICS: &str = "topics";

// --- Vector store ---

/// One stored point: id, dense vector, JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Point {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub point: Point,
    pub score: f32,
}

/// Payload conditions supported by `scroll` and `query`.
#[derive(Debug, Clone)]
pub enum Condition {
    /// payload[key] == value
    Eq(String, serde_json::Value),
    /// payload[key] is an RFC 3339 timestamp >= value
    DateGte(String, DateTime<Utc>),
    /// payload[key] is absent, null, or the empty string
    Empty(String),
}

#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub must: Vec<Condition>,
}

impl Filter {
    pub fn eq(key: &str, value: impl Into<serde_json::Value>) -> Self {
        Self {
            must: vec![Condition::Eq(key.to_string(), value.into())],
        }
    }

    pub fn and(mut self, condition: Condition) -> Self {
        self.must.push(condition);
        self
    }

    pub fn matches(&self, payload: &serde_json::Value) -> bool {
        self.must.iter().all(|c| match c {
            Condition::Eq(key, value) => payload.get(key) == Some(value),
            Condition::DateGte(key, cutoff) => payload
                .get(key)
                .and_then(|v| v.as_str())
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc) >= *cutoff)
                .unwrap_or(false),
            Condition::Empty(key) => match payload.get(key) {
                None => true,
                Some(serde_json::Value::Null) => true,
                Some(serde_json::Value::String(s)) => s.is_empty(),
                Some(_) => false,
            },
        })
    }
}

#[async_trait::async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, collection: &str, point: Point) -> Result<()>;

    async fn retrieve(&self, collection: &str, ids: &[Uuid]) -> Result<Vec<Point>>;

    /// Filtered scan without vector search. `with_vector = false` returns
    /// empty vectors to keep payloads cheap.
    async fn scroll(
        &self,
        collection: &str,
        filter: Option<&Filter>,
        limit: usize,
        with_vector: bool,
    ) -> Result<Vec<Point>>;

    /// Nearest-neighbour search by cosine similarity, best first.
    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        filter: Option<&Filter>,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>>;

    /// Shallow-merge `partial` into the existing payload.
    async fn set_payload(
        &self,
        collection: &str,
        id: Uuid,
        partial: serde_json::Value,
    ) -> Result<()>;
}

// --- Key-value store ---

#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    /// SET-IF-ABSENT with expiry. Returns true when the key was acquired.
    async fn set_nx_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool>;
    async fn del(&self, key: &str) -> Result<()>;
    /// Delete only if the stored value matches. Returns true when deleted.
    async fn compare_and_del(&self, key: &str, expected: &str) -> Result<bool>;
    async fn set_add(&self, set: &str, member: &str) -> Result<()>;
    async fn set_remove(&self, set: &str, member: &str) -> Result<()>;
    async fn set_members(&self, set: &str) -> Result<Vec<String>>;
}

/// Cosine similarity over f32 slices. Zero vectors compare as 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
