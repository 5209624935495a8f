use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AiError;

// --- Chat completion ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the backend for a JSON object response where supported.
    pub json_mode: bool,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: 0.7,
            max_tokens: 2000,
            json_mode: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub usage: TokenUsage,
}

/// Chat-style completion backend. The core never depends on streaming.
#[async_trait]
pub trait ChatCompleter: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, AiError>;
}

// --- Web research ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub url: String,
    pub title: String,
}

#[derive(Debug, Clone, Default)]
pub struct ResearchResult {
    pub content: String,
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone)]
pub struct FactCheck {
    pub claim: String,
    pub result: String,
}

#[async_trait]
pub trait WebResearcher: Send + Sync {
    async fn search(&self, query: &str, max_tokens: u32) -> Result<ResearchResult, AiError>;
    async fn fact_check(&self, claim: &str) -> Result<FactCheck, AiError>;
}

// --- Social sentiment ---

#[derive(Debug, Clone, Default)]
pub struct SocialPulse {
    pub summary: String,
    pub sentiment: String,
    pub key_reactions: Vec<String>,
    pub trending_hashtags: Vec<String>,
}

#[async_trait]
pub trait SocialAnalyst: Send + Sync {
    async fn analyze(&self, topic: &str, max_tokens: u32) -> Result<SocialPulse, AiError>;
}

// --- Embeddings ---

/// Dense text encoder. Dimension must be identical across all inputs.
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
    async fn embed_batch(&self, texts: Vec<String>) -> anyhow::Result<Vec<Vec<f32>>>;
}
