//! Replacement-source discovery. Kicks in when a source times out, is
//! blocked, or comes back empty too many runs in a row. Runs detached from
//! the pipeline; all failures are soft.

use std::collections::HashMap;
use std::sync::Arc;

use ai_client::{ChatCompleter, ChatMessage, CompletionRequest};
use anyhow::Result;
use newsloom_common::config::DiscoveryConfig;
use newsloom_common::robots::RobotsPolicy;
use newsloom_common::{
    default_tier, extract_domain, LogLevel, PageFetcher, ProgressEvent, ProgressSink, Source,
};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::health::HealthStore;
use crate::registry::SourceRegistry;

const HTML_SAMPLE_BYTES: usize = 15 * 1024;
const MIN_LINKS: usize = 10;

/// One replacement candidate proposed by the model.
#[derive(Debug, Clone, Deserialize)]
struct Suggestion {
    domain: String,
    name: String,
    #[serde(default)]
    base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct SelectorReply {
    #[serde(default)]
    article_links: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
}

pub struct SourceDiscovery {
    chat: Arc<dyn ChatCompleter>,
    fetcher: Arc<dyn PageFetcher>,
    registry: Arc<SourceRegistry>,
    health: Arc<HealthStore>,
    sink: Arc<dyn ProgressSink>,
    config: DiscoveryConfig,
    user_agent: String,
    attempts: Mutex<HashMap<String, u32>>,
}

impl SourceDiscovery {
    pub fn new(
        chat: Arc<dyn ChatCompleter>,
        fetcher: Arc<dyn PageFetcher>,
        registry: Arc<SourceRegistry>,
        health: Arc<HealthStore>,
        sink: Arc<dyn ProgressSink>,
        config: DiscoveryConfig,
        user_agent: &str,
    ) -> Self {
        Self {
            chat,
            fetcher,
            registry,
            health,
            sink,
            config,
            user_agent: user_agent.to_string(),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Try to find, validate and register one replacement for `blocked_domain`.
    /// Bounded by the global discovered cap and per-domain attempt cap.
    pub async fn discover_replacement(
        &self,
        blocked_domain: &str,
        reason: &str,
    ) -> Result<Option<Source>> {
        if self.health.discovered_count().await >= self.config.max_discovered {
            debug!(blocked_domain, "Discovery cap reached, skipping");
            return Ok(None);
        }
        {
            let mut attempts = self.attempts.lock().await;
            let count = attempts.entry(blocked_domain.to_string()).or_insert(0);
            if *count >= self.config.max_attempts_per_domain {
                debug!(blocked_domain, "Attempt cap reached for domain, skipping");
                return Ok(None);
            }
            *count += 1;
        }

        let (category, language, region) = infer_source_metadata(blocked_domain);
        info!(
            blocked_domain,
            reason, category, language, region, "Looking for a replacement source"
        );

        let suggestions = self
            .ask_for_suggestions(blocked_domain, &category, &language, &region)
            .await?;

        for suggestion in suggestions.into_iter().take(self.config.max_suggestions) {
            let domain = extract_domain(&suggestion.domain);
            if domain.is_empty()
                || domain == blocked_domain
                || self.health.is_blacklisted(&domain).await
                || self.registry.get(&domain).await.is_some()
            {
                continue;
            }
            let base_url = if suggestion.base_url.starts_with("http") {
                suggestion.base_url.clone()
            } else {
                format!("https://{domain}")
            };

            let html = match self.validate_candidate(&domain, &base_url).await {
                Some(html) => html,
                None => continue,
            };

            let selectors = self.infer_selectors(&domain, &html).await;
            let source = Source {
                domain: domain.clone(),
                name: suggestion.name.clone(),
                base_url,
                link_selectors: vec![selectors.article_links],
                title_selector: Some(selectors.title),
                content_selector: Some(selectors.content),
                rss_feeds: Vec::new(),
                rate_limit_secs: 2.0,
                tier: default_tier(),
                language: language.clone(),
                category: Some(category.clone()),
                auto_discovered: true,
            };

            self.registry.add(source.clone()).await;
            self.health
                .save_discovered(&domain, "llm", Some(blocked_domain))
                .await;
            self.sink.publish(ProgressEvent::source_log(
                LogLevel::Success,
                format!("Discovered replacement {domain} for {blocked_domain} ({reason})"),
                &domain,
            ));
            info!(domain, blocked_domain, "Replacement source registered");
            return Ok(Some(source));
        }

        Ok(None)
    }

    async fn ask_for_suggestions(
        &self,
        blocked_domain: &str,
        category: &str,
        language: &str,
        region: &str,
    ) -> Result<Vec<Suggestion>> {
        let avoid = self
            .health
            .blacklist_entries()
            .await
            .into_iter()
            .map(|(d, _)| d)
            .collect::<Vec<_>>()
            .join(", ");
        let prompt = format!(
            "The news site {blocked_domain} is no longer scrapable. Suggest up to {} \
             replacement news sites with category '{category}', language '{language}', \
             region '{region}'. Avoid these domains: [{avoid}]. Reply with ONLY a JSON \
             array of objects with keys: domain, name, base_url.",
            self.config.max_suggestions
        );
        let completion = self
            .chat
            .complete(CompletionRequest {
                messages: vec![ChatMessage::user(prompt)],
                temperature: 0.3,
                max_tokens: 600,
                json_mode: false,
            })
            .await
            .map_err(|e| anyhow::anyhow!("suggestion call failed: {e}"))?;

        let raw = strip_code_fences(&completion.content);
        match serde_json::from_str::<Vec<Suggestion>>(raw) {
            Ok(suggestions) => Ok(suggestions),
            Err(e) => {
                warn!(error = %e, "Unparseable suggestion reply, no candidates");
                Ok(Vec::new())
            }
        }
    }

    /// Validation chain: robots allows us, root serves HTML with status 200,
    /// page looks like a news home (enough links, article-ish markup).
    /// Returns the home page HTML on success for selector inference.
    async fn validate_candidate(&self, domain: &str, base_url: &str) -> Option<String> {
        let robots_url = format!("https://{domain}/robots.txt");
        let policy = match self.fetcher.fetch(&robots_url).await {
            Ok(page) if page.status == 200 => RobotsPolicy::parse(&page.body, &self.user_agent),
            _ => RobotsPolicy::allow_all(),
        };
        if !policy.allows(base_url) {
            debug!(domain, "Candidate rejected: robots disallows us");
            return None;
        }

        let page = match self.fetcher.fetch(base_url).await {
            Ok(page) => page,
            Err(e) => {
                debug!(domain, error = %e, "Candidate rejected: unreachable");
                return None;
            }
        };
        if page.status != 200 || !page.is_html() {
            debug!(domain, status = page.status, "Candidate rejected: not an HTML 200");
            return None;
        }

        let link_count = page.body.matches("<a ").count() + page.body.matches("<a\n").count();
        let looks_like_news = page.body.contains("<article")
            || page.body.contains("<h2")
            || page.body.contains("<h3");
        if link_count < MIN_LINKS || !looks_like_news {
            debug!(domain, link_count, "Candidate rejected: not article-like");
            return None;
        }

        Some(page.body)
    }

    /// Ask the model for CSS selectors given a truncated HTML sample.
    /// Falls back to a generic selector set on any failure.
    async fn infer_selectors(&self, domain: &str, html: &str) -> SelectorReply {
        let sample: String = html.chars().take(HTML_SAMPLE_BYTES).collect();
        let prompt = format!(
            "Given this HTML sample from the home page of {domain}, reply with ONLY a \
             JSON object with keys article_links (CSS selector for article links), \
             title, content.\n\nHTML:\n{sample}"
        );
        let reply = self
            .chat
            .complete(CompletionRequest {
                messages: vec![ChatMessage::user(prompt)],
                temperature: 0.0,
                max_tokens: 300,
                json_mode: true,
            })
            .await;

        match reply {
            Ok(completion) => {
                match serde_json::from_str::<SelectorReply>(strip_code_fences(&completion.content))
                {
                    Ok(mut selectors) => {
                        if selectors.article_links.is_empty() {
                            selectors.article_links = "a[href*='/article']".to_string();
                        }
                        if selectors.title.is_empty() {
                            selectors.title = "h1".to_string();
                        }
                        if selectors.content.is_empty() {
                            selectors.content = "article p".to_string();
                        }
                        selectors
                    }
                    Err(e) => {
                        debug!(domain, error = %e, "Selector reply unparseable, using generic set");
                        generic_selectors()
                    }
                }
            }
            Err(e) => {
                debug!(domain, error = %e, "Selector call failed, using generic set");
                generic_selectors()
            }
        }
    }
}

fn generic_selectors() -> SelectorReply {
    SelectorReply {
        article_links: "a[href*='/article']".to_string(),
        title: "h1".to_string(),
        content: "article p".to_string(),
    }
}

/// Strip a Markdown code fence if the model wrapped its JSON in one.
pub fn strip_code_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Infer (category, language, region) from the blocked domain alone.
fn infer_source_metadata(domain: &str) -> (String, String, String) {
    let category = [
        ("sport", "sport"),
        ("tech", "technologie"),
        ("finance", "economie"),
        ("echos", "economie"),
        ("business", "economie"),
        ("science", "science"),
        ("sante", "sante"),
        ("health", "sante"),
    ]
    .iter()
    .find(|(needle, _)| domain.contains(needle))
    .map(|(_, cat)| cat.to_string())
    .unwrap_or_else(|| "general".to_string());

    let (language, region) = match domain.rsplit('.').next().unwrap_or("") {
        "fr" => ("fr", "France"),
        "be" => ("fr", "Belgique"),
        "ch" => ("fr", "Suisse"),
        "ca" => ("fr", "Canada"),
        "de" => ("de", "Allemagne"),
        "es" => ("es", "Espagne"),
        "it" => ("it", "Italie"),
        "uk" => ("en", "Royaume-Uni"),
        _ => ("en", "International"),
    };
    (category, language.to_string(), region.to_string())
}
