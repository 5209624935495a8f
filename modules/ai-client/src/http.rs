//! Reqwest-backed implementations of the AI contracts, all speaking the
//! OpenAI-compatible chat completions wire shape.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::error::AiError;
use crate::traits::{
    ChatCompleter, ChatMessage, Citation, Completion, CompletionRequest, FactCheck,
    ResearchResult, SocialAnalyst, SocialPulse, TokenUsage, WebResearcher,
};

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    citations: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: String,
}

#[derive(Debug, Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

async fn post_chat(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    body: serde_json::Value,
) -> Result<WireResponse, AiError> {
    let response = client
        .post(format!("{}/chat/completions", base_url.trim_end_matches('/')))
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await?;

    let status = response.status().as_u16();
    if status == 429 {
        return Err(AiError::RateLimited);
    }
    if status >= 400 {
        let message = response.text().await.unwrap_or_default();
        return Err(AiError::Api { status, message });
    }

    let wire: WireResponse = response
        .json()
        .await
        .map_err(|e| AiError::InvalidResponse(e.to_string()))?;
    if wire.choices.is_empty() {
        return Err(AiError::InvalidResponse("empty choices".to_string()));
    }
    Ok(wire)
}

fn wire_messages(messages: &[ChatMessage]) -> serde_json::Value {
    json!(messages)
}

// --- Chat completion ---

pub struct HttpChatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpChatClient {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl ChatCompleter for HttpChatClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, AiError> {
        let mut body = json!({
            "model": self.model,
            "messages": wire_messages(&request.messages),
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        if request.json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }

        debug!(model = %self.model, max_tokens = request.max_tokens, "Chat completion call");
        let wire = post_chat(&self.client, &self.base_url, &self.api_key, body).await?;
        let usage = wire.usage.unwrap_or_default();
        let content = wire
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        info!(
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "Chat completion ok"
        );
        Ok(Completion {
            content,
            usage: TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            },
        })
    }
}

// --- Web research (sonar-style: chat completion with citation URLs) ---

pub struct HttpWebResearcher {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpWebResearcher {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl WebResearcher for HttpWebResearcher {
    async fn search(&self, query: &str, max_tokens: u32) -> Result<ResearchResult, AiError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "You are a news research assistant. Provide recent, factual context with sources. Be concise."},
                {"role": "user", "content": query},
            ],
            "max_tokens": max_tokens,
        });
        let wire = post_chat(&self.client, &self.base_url, &self.api_key, body).await?;
        let content = wire
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        let citations = wire
            .citations
            .unwrap_or_default()
            .into_iter()
            .map(|url| Citation {
                title: url.clone(),
                url,
            })
            .collect();
        Ok(ResearchResult { content, citations })
    }

    async fn fact_check(&self, claim: &str) -> Result<FactCheck, AiError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "Fact-check the claim. Answer with VERIFIED, REFUTED or UNVERIFIABLE followed by one sentence of evidence."},
                {"role": "user", "content": claim},
            ],
            "max_tokens": 200,
        });
        let wire = post_chat(&self.client, &self.base_url, &self.api_key, body).await?;
        let result = wire
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        Ok(FactCheck {
            claim: claim.to_string(),
            result,
        })
    }
}

// --- Social sentiment ---

pub struct HttpSocialAnalyst {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpSocialAnalyst {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

// --- Embeddings (OpenAI-compatible /embeddings endpoint) ---

pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpEmbedder {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingWire {
    data: Vec<EmbeddingRow>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

#[async_trait]
impl crate::traits::TextEmbedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let mut batch = self.embed_batch(vec![text.to_string()]).await?;
        batch
            .pop()
            .ok_or_else(|| anyhow::anyhow!("embedding backend returned no vector"))
    }

    async fn embed_batch(&self, texts: Vec<String>) -> anyhow::Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&json!({"model": self.model, "input": texts}))
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("embedding backend status {}", response.status());
        }
        let wire: EmbeddingWire = response.json().await?;
        Ok(wire.data.into_iter().map(|r| r.embedding).collect())
    }
}

#[derive(Debug, Deserialize, Default)]
struct SocialWire {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    sentiment: String,
    #[serde(default)]
    key_reactions: Vec<String>,
    #[serde(default)]
    trending_hashtags: Vec<String>,
}

#[async_trait]
impl SocialAnalyst for HttpSocialAnalyst {
    async fn analyze(&self, topic: &str, max_tokens: u32) -> Result<SocialPulse, AiError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "You have access to real-time social data. Summarize public reaction to the topic as JSON with keys: summary, sentiment (positive/negative/neutral/mixed), key_reactions (array), trending_hashtags (array)."},
                {"role": "user", "content": topic},
            ],
            "max_tokens": max_tokens,
            "response_format": {"type": "json_object"},
        });
        let wire = post_chat(&self.client, &self.base_url, &self.api_key, body).await?;
        let content = wire
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        let parsed: SocialWire = serde_json::from_str(&content)
            .map_err(|e| AiError::InvalidResponse(format!("social payload: {e}")))?;
        Ok(SocialPulse {
            summary: parsed.summary,
            sentiment: parsed.sentiment,
            key_reactions: parsed.key_reactions,
            trending_hashtags: parsed.trending_hashtags,
        })
    }
}
