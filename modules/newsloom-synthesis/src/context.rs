//! Context builder: everything attached to the generation prompt beyond the
//! articles themselves. Chunking with overlap, fact-density ranking,
//! contradiction detection, entity extraction, historical context for
//! ongoing stories, and the web-enrichment gating + fan-out.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use ai_client::{retry_with_backoff, BreakerConfig, CircuitBreaker, SocialAnalyst, WebResearcher};
use chrono::{DateTime, Utc};
use newsloom_common::config::EnrichmentConfig;
use newsloom_common::{
    Article, Cluster, NarrativeArc, PastSynthesis, Synthesis, TimelineEvent, TopicIntensity,
};
use newsloom_store::cosine_similarity;
use regex::Regex;
use tracing::{debug, info, warn};

// --- Chunking ---

/// A chunk of article text with back-references to its source.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub text: String,
    pub source_name: String,
    pub source_url: String,
    pub article_index: usize,
    pub chunk_index: usize,
}

const CHUNK_MAX_WORDS: usize = 256;
const CHUNK_OVERLAP_WORDS: usize = 50;

fn split_sentences(text: &str) -> Vec<&str> {
    static RE_SENTENCE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s).*?[.!?](\s+|$)").unwrap());
    let mut sentences: Vec<&str> = RE_SENTENCE
        .find_iter(text)
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .collect();
    let consumed: usize = RE_SENTENCE.find_iter(text).map(|m| m.end()).max().unwrap_or(0);
    let tail = text[consumed..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Greedy sentence-boundary chunking: fill up to `max_words`, then start the
/// next chunk with the last `overlap` words for continuity.
pub fn chunk_text(text: &str, max_words: usize, overlap: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for sentence in split_sentences(text) {
        let words: Vec<&str> = sentence.split_whitespace().collect();
        if !current.is_empty() && current.len() + words.len() > max_words {
            chunks.push(current.join(" "));
            let keep = current.len().saturating_sub(overlap);
            current = current.split_off(keep);
        }
        current.extend(words);
    }
    if !current.is_empty() {
        chunks.push(current.join(" "));
    }
    chunks
}

/// Chunk every article (title prepended to its body) with back-refs.
pub fn chunk_articles(articles: &[Article]) -> Vec<Chunk> {
    let mut all = Vec::new();
    for (article_index, article) in articles.iter().enumerate() {
        let full = if article.raw_title.is_empty() {
            article.raw_text.clone()
        } else {
            format!("{}. {}", article.raw_title, article.raw_text)
        };
        for (chunk_index, text) in chunk_text(&full, CHUNK_MAX_WORDS, CHUNK_OVERLAP_WORDS)
            .into_iter()
            .enumerate()
        {
            all.push(Chunk {
                text,
                source_name: article.source_name.clone(),
                source_url: article.url.clone(),
                article_index,
                chunk_index,
            });
        }
    }
    all
}

// --- Fact density ---

static RE_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\d{1,2}/\d{1,2}/\d{2,4}|\d{1,2}\s+(janvier|février|mars|avril|mai|juin|juillet|août|septembre|octobre|novembre|décembre|january|february|march|april|may|june|july|august|september|october|november|december)").unwrap()
});
static RE_PERCENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+([.,]\d+)?\s*%").unwrap());
static RE_BIG_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\d+([.,]\d+)?\s*(millions?|milliards?|million|billion|km|tonnes?|euros?|dollars?)")
        .unwrap()
});
static RE_ATTRIBUTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(selon|d'après|according to|a déclaré|said)\b").unwrap());
static RE_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());
static RE_GUILLEMETS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"«[^»]+»").unwrap());
static RE_HEDGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(probablement|peut-être|pourrait|sembl\w+|il se pourrait|selon certains|vraisemblablement|probably|perhaps|might|maybe|seems?|reportedly|allegedly|possibly)\b").unwrap()
});

/// Fact density in [0, 1]: verifiable markers vs epistemic hedging.
pub fn fact_density(text: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }
    let facts = RE_DATE.find_iter(text).count() as f64
        + RE_PERCENT.find_iter(text).count() as f64
        + RE_BIG_NUMBER.find_iter(text).count() as f64
        + RE_ATTRIBUTION.find_iter(text).count() as f64
        + RE_NUMBER.find_iter(text).count() as f64 * 0.5
        + RE_GUILLEMETS.find_iter(text).count() as f64 * 2.0;
    let hedges = RE_HEDGE.find_iter(text).count() as f64;
    (facts / (facts + hedges + 1.0)).clamp(0.0, 1.0)
}

/// Chunks paired with their density, best first.
pub fn rank_chunks_by_fact_density(chunks: Vec<Chunk>) -> Vec<(Chunk, f64)> {
    let mut scored: Vec<(Chunk, f64)> = chunks
        .into_iter()
        .map(|c| {
            let score = fact_density(&c.text);
            (c, score)
        })
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored
}

// --- Contradiction detection ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContradictionKind {
    Factual,
    Temporal,
}

#[derive(Debug, Clone)]
pub struct Contradiction {
    pub source1: String,
    pub source2: String,
    pub excerpt1: String,
    pub excerpt2: String,
    pub kind: ContradictionKind,
    pub similarity: f32,
}

static RE_NEGATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(ne\s+\w+\s+pas|n'est\s+pas|jamais|aucun\w*|dément\w*|nie\b|not\b|never\b|denie[sd]|no\s+longer)\b")
        .unwrap()
});

fn excerpt(text: &str) -> String {
    text.chars().take(200).collect()
}

fn detect_pair(text1: &str, text2: &str) -> Option<ContradictionKind> {
    let neg1 = RE_NEGATION.find_iter(text1).count() as i64;
    let neg2 = RE_NEGATION.find_iter(text2).count() as i64;
    if (neg1 - neg2).abs() >= 3 {
        return Some(ContradictionKind::Factual);
    }

    let numbers1: std::collections::HashSet<&str> =
        RE_NUMBER.find_iter(text1).map(|m| m.as_str()).collect();
    let numbers2: std::collections::HashSet<&str> =
        RE_NUMBER.find_iter(text2).map(|m| m.as_str()).collect();
    if !numbers1.is_empty() && !numbers2.is_empty() {
        let common = numbers1.intersection(&numbers2).count();
        let total = numbers1.union(&numbers2).count();
        if common == 0 && total > 4 {
            return Some(ContradictionKind::Factual);
        }
    }

    let dates1: Vec<&str> = RE_DATE.find_iter(text1).map(|m| m.as_str()).collect();
    let dates2: Vec<&str> = RE_DATE.find_iter(text2).map(|m| m.as_str()).collect();
    if !dates1.is_empty() && !dates2.is_empty() && dates1 != dates2 {
        return Some(ContradictionKind::Temporal);
    }
    None
}

/// Pairs covering the same topic (cosine >= threshold) with contradictory
/// signals. Capped at `max` per cluster.
pub fn detect_contradictions(
    articles: &[Article],
    embeddings: &[Vec<f32>],
    similarity_threshold: f32,
    max: usize,
) -> Vec<Contradiction> {
    let mut found = Vec::new();
    let n = articles.len().min(embeddings.len());
    'outer: for i in 0..n {
        for j in (i + 1)..n {
            let similarity = cosine_similarity(&embeddings[i], &embeddings[j]);
            if similarity < similarity_threshold {
                continue;
            }
            let text1: String = articles[i].raw_text.chars().take(1000).collect();
            let text2: String = articles[j].raw_text.chars().take(1000).collect();
            if let Some(kind) = detect_pair(&text1, &text2) {
                found.push(Contradiction {
                    source1: articles[i].source_name.clone(),
                    source2: articles[j].source_name.clone(),
                    excerpt1: excerpt(&text1),
                    excerpt2: excerpt(&text2),
                    kind,
                    similarity,
                });
                if found.len() >= max {
                    break 'outer;
                }
            }
        }
    }
    found
}

// --- Entity extraction ---

#[derive(Debug, Clone, Default)]
pub struct ExtractedEntities {
    pub persons: Vec<String>,
    pub organizations: Vec<String>,
    pub locations: Vec<String>,
    pub dates: Vec<String>,
}

impl ExtractedEntities {
    pub fn all_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        names.extend(self.persons.iter().cloned());
        names.extend(self.organizations.iter().cloned());
        names.extend(self.locations.iter().cloned());
        names
    }
}

static RE_PROPER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][a-zà-ÿ]+(?:\s+[A-Z][a-zà-ÿ]+)*\b").unwrap());
static RE_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:à|en|au|aux|in|at|from)\s+([A-Z][a-zà-ÿ]+(?:\s+[A-Z][a-zà-ÿ]+)*)").unwrap()
});
static RE_ORG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Z][a-zà-ÿ]+(?:\s+[A-Z][a-zà-ÿ]+)*)\s+(?i:gouvernement|ministère|ministry|company|corporation|association|parti|group|groupe|banque|commission)").unwrap()
});

const CAP_STOPWORDS: &[&str] = &[
    "Le", "La", "Les", "Un", "Une", "The", "A", "An", "Ce", "Cette", "Il", "Elle", "Nous", "Selon",
    "Dans", "Mais", "Pour",
];

fn dedup_keep_order(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items.into_iter().filter(|i| seen.insert(i.clone())).collect()
}

/// Pattern-based extraction; no model involved. Persons are capitalized runs
/// not already claimed as locations or organizations.
pub fn extract_entities(text: &str) -> ExtractedEntities {
    let locations: Vec<String> = RE_LOCATION
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect();
    let organizations: Vec<String> = RE_ORG
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect();
    let dates: Vec<String> = RE_DATE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect();

    let claimed: std::collections::HashSet<&String> =
        locations.iter().chain(organizations.iter()).collect();
    let persons: Vec<String> = RE_PROPER
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .filter(|w| w.len() > 2 && !CAP_STOPWORDS.contains(&w.as_str()))
        .filter(|w| !claimed.contains(w))
        .take(10)
        .collect();

    ExtractedEntities {
        persons: dedup_keep_order(persons),
        organizations: dedup_keep_order(organizations),
        locations: dedup_keep_order(locations),
        dates: dedup_keep_order(dates),
    }
}

// --- Narrative arc + historical context ---

/// Where the story sits in its lifecycle, from prior coverage and current
/// cluster size.
pub fn derive_narrative_arc(
    prior_count: usize,
    days_since_last_update: Option<f64>,
    current_articles: usize,
) -> NarrativeArc {
    if prior_count <= 1 {
        return NarrativeArc::Emerging;
    }
    let gap = days_since_last_update.unwrap_or(0.0);
    if gap > 7.0 {
        return NarrativeArc::Resolved;
    }
    if prior_count >= 4 && current_articles >= 5 {
        return NarrativeArc::Peak;
    }
    if gap > 3.0 && current_articles < 3 {
        return NarrativeArc::Declining;
    }
    NarrativeArc::Developing
}

fn arc_instruction(arc: NarrativeArc) -> &'static str {
    match arc {
        NarrativeArc::Emerging => {
            "Histoire émergente: pose le contexte complet, les lecteurs découvrent le sujet."
        }
        NarrativeArc::Developing => {
            "Histoire en développement: rappelle brièvement les épisodes précédents puis concentre-toi sur les nouveautés."
        }
        NarrativeArc::Peak => {
            "Histoire au sommet: couverture intense, synthétise les angles divergents et tranche les contradictions."
        }
        NarrativeArc::Declining => {
            "Histoire en décrue: fais le bilan des développements et indique ce qui reste ouvert."
        }
        NarrativeArc::Resolved => {
            "Histoire close qui ressurgit: résume le dénouement passé avant d'introduire l'élément nouveau."
        }
    }
}

/// Compact textual history section for the prompt: chronology, established
/// key points, entity evolution, contradiction history, arc instruction.
pub fn historical_context_text(past: &[PastSynthesis], arc: NarrativeArc) -> String {
    if past.is_empty() {
        return String::new();
    }
    let mut ordered: Vec<&PastSynthesis> = past.iter().collect();
    ordered.sort_by_key(|p| p.synthesis.created_at);

    let mut out = String::from("=== CONTEXTE HISTORIQUE ===\n\nChronologie:\n");
    for p in ordered.iter().rev().take(5).rev() {
        let summary: String = p.synthesis.introduction.chars().take(200).collect();
        out.push_str(&format!(
            "- {} — {} : {}\n",
            p.synthesis.created_at.format("%d/%m/%Y"),
            p.synthesis.title,
            summary
        ));
    }

    let key_points: Vec<&String> = ordered
        .iter()
        .rev()
        .flat_map(|p| p.synthesis.key_points.iter())
        .take(5)
        .collect();
    if !key_points.is_empty() {
        out.push_str("\nPoints établis:\n");
        for point in key_points {
            out.push_str(&format!("- {point}\n"));
        }
    }

    let mut entity_mentions: HashMap<&String, usize> = HashMap::new();
    for p in &ordered {
        for entity in &p.synthesis.key_entities {
            *entity_mentions.entry(entity).or_insert(0) += 1;
        }
    }
    if !entity_mentions.is_empty() {
        let mut entities: Vec<(&String, usize)> = entity_mentions.into_iter().collect();
        entities.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        out.push_str("\nActeurs récurrents:\n");
        for (entity, mentions) in entities.into_iter().take(5) {
            out.push_str(&format!("- {entity} ({} mentions)\n", mentions.min(3)));
        }
    }

    let contradiction_notes: Vec<String> = ordered
        .iter()
        .rev()
        .filter(|p| p.synthesis.has_contradictions)
        .take(3)
        .map(|p| {
            format!(
                "- {} : {} contradiction(s) signalée(s)",
                p.synthesis.created_at.format("%d/%m/%Y"),
                p.synthesis.contradictions_count
            )
        })
        .collect();
    if !contradiction_notes.is_empty() {
        out.push_str("\nContradictions passées:\n");
        for note in contradiction_notes {
            out.push_str(&note);
            out.push('\n');
        }
    }

    out.push_str(&format!("\nConsigne narrative: {}\n", arc_instruction(arc)));
    out
}

// --- Web-enrichment gating ---

const BREAKING_KEYWORDS: &[&str] = &[
    "breaking",
    "urgent",
    "alerte",
    "dernière minute",
    "en direct",
    "exclusif",
    "attentat",
    "séisme",
    "crash",
    "démission",
];

pub fn has_breaking_keywords(text: &str) -> bool {
    let lower = text.to_lowercase();
    BREAKING_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Topic importance for cost gating, derived from cluster shape.
pub fn topic_importance(
    cluster_size: usize,
    avg_recency_hours: f64,
    source_diversity: usize,
    breaking_keywords: bool,
) -> TopicIntensity {
    if breaking_keywords || (avg_recency_hours < 2.0 && source_diversity >= 4) {
        return TopicIntensity::Breaking;
    }
    if avg_recency_hours < 6.0 && (cluster_size >= 5 || source_diversity >= 3) {
        return TopicIntensity::Hot;
    }
    if avg_recency_hours > 48.0 || source_diversity <= 1 {
        return TopicIntensity::Standard; // minor topics share the standard tier
    }
    TopicIntensity::Developing
}

/// Cost-control decision for the web-search enrichment.
/// Returns (use_search, reason).
pub fn should_use_search(
    scrape_success: bool,
    content_length: usize,
    importance: TopicIntensity,
    is_minor: bool,
    source_tier: u8,
    min_content_length: usize,
) -> (bool, &'static str) {
    if scrape_success && content_length >= min_content_length {
        return (false, "scrape_success");
    }
    if is_minor {
        return (false, "minor_topic");
    }
    match importance {
        TopicIntensity::Breaking => return (true, "urgent_breaking"),
        TopicIntensity::Hot => return (true, "urgent_hot"),
        _ => {}
    }
    if source_tier == 1 {
        return (true, "tier1_scrape_failed");
    }
    (false, "cost_control")
}

// --- Enrichment execution ---

#[derive(Debug, Clone, Default)]
pub struct EnrichmentBlock {
    /// complete | partial | skipped:<reason> | disabled
    pub status: String,
    pub research_text: String,
    pub citations: Vec<String>,
    pub social_summary: String,
    pub social_sentiment: Option<String>,
    pub hashtags: Vec<String>,
}

// --- Final context record ---

#[derive(Debug, Clone, Default)]
pub struct ClusterContext {
    pub top_chunks: Vec<(Chunk, f64)>,
    pub contradictions: Vec<Contradiction>,
    pub key_entities: Vec<String>,
    pub historical_text: String,
    pub narrative_arc: Option<NarrativeArc>,
    pub enrichment: EnrichmentBlock,
    pub prior_synthesis_text: Option<String>,
    pub timeline: Vec<TimelineEvent>,
}

pub struct ContextBuilder {
    researcher: Arc<dyn WebResearcher>,
    social: Arc<dyn SocialAnalyst>,
    research_breaker: CircuitBreaker,
    social_breaker: CircuitBreaker,
    config: EnrichmentConfig,
    enabled: bool,
}

const TOP_CHUNKS: usize = 10;
const CONTRADICTION_SIMILARITY: f32 = 0.75;
const MAX_CONTRADICTIONS: usize = 3;

impl ContextBuilder {
    pub fn new(
        researcher: Arc<dyn WebResearcher>,
        social: Arc<dyn SocialAnalyst>,
        config: EnrichmentConfig,
        enabled: bool,
    ) -> Self {
        Self {
            researcher,
            social,
            research_breaker: CircuitBreaker::new("web-research", BreakerConfig::default()),
            social_breaker: CircuitBreaker::new("social-sentiment", BreakerConfig::default()),
            config,
            enabled,
        }
    }

    /// Assemble the full context record for one cluster.
    pub async fn build(
        &self,
        cluster: &Cluster,
        embeddings: &[Vec<f32>],
        update_target: Option<&Synthesis>,
        now: DateTime<Utc>,
    ) -> ClusterContext {
        let articles = &cluster.articles;

        let chunks = chunk_articles(articles);
        let num_chunks = chunks.len();
        let mut top_chunks = rank_chunks_by_fact_density(chunks);
        top_chunks.truncate(TOP_CHUNKS);

        let contradictions = detect_contradictions(
            articles,
            embeddings,
            CONTRADICTION_SIMILARITY,
            MAX_CONTRADICTIONS,
        );
        if !contradictions.is_empty() {
            warn!(
                cluster = cluster.id,
                count = contradictions.len(),
                "Contradictions detected in cluster"
            );
        }

        let combined_text: String = articles
            .iter()
            .map(|a| format!("{} {}", a.raw_title, a.raw_text))
            .collect::<Vec<_>>()
            .join(" ");
        let entities = extract_entities(&combined_text);
        let key_entities: Vec<String> = entities.all_names().into_iter().take(10).collect();

        // Narrative arc + history from the cluster's own past syntheses.
        let prior_count = cluster.past_syntheses.len()
            + update_target.map(|t| t.update_count as usize + 1).unwrap_or(0);
        let last_update = cluster
            .past_syntheses
            .iter()
            .map(|p| p.synthesis.last_updated_at.unwrap_or(p.synthesis.created_at))
            .chain(update_target.map(|t| t.last_updated_at.unwrap_or(t.created_at)))
            .max();
        let days_since_last = last_update.map(|t| (now - t).num_seconds() as f64 / 86_400.0);
        let narrative_arc = derive_narrative_arc(prior_count, days_since_last, articles.len());
        let historical_text = historical_context_text(&cluster.past_syntheses, narrative_arc);

        // Timeline from article publication order.
        let mut timeline: Vec<TimelineEvent> = articles
            .iter()
            .filter_map(|a| {
                a.published_at.map(|date| TimelineEvent {
                    date,
                    title: a.raw_title.clone(),
                    source: a.source_name.clone(),
                })
            })
            .collect();
        timeline.sort_by_key(|e| e.date);

        // Update-mode prior text.
        let prior_synthesis_text = update_target.map(|target| {
            let body: String = target.body.chars().take(2000).collect();
            format!(
                "=== SYNTHÈSE EXISTANTE À METTRE À JOUR ===\nTitre original: {}\nCréée le: {}\n\nRésumé existant:\n{}\n\nContenu existant (extrait):\n{}\n",
                target.title,
                target.created_at.format("%d/%m/%Y à %H:%M"),
                target.introduction,
                body
            )
        });

        // Enrichment gating.
        let total_content: usize = articles.iter().map(|a| a.raw_text.chars().count()).sum();
        let avg_recency_hours = {
            let ages: Vec<f64> = articles
                .iter()
                .filter_map(|a| a.published_at)
                .map(|t| (now - t).num_seconds() as f64 / 3600.0)
                .collect();
            if ages.is_empty() {
                0.0
            } else {
                ages.iter().sum::<f64>() / ages.len() as f64
            }
        };
        let source_diversity = articles
            .iter()
            .map(|a| a.source_domain.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len();
        let breaking = has_breaking_keywords(&combined_text);
        let importance = topic_importance(articles.len(), avg_recency_hours, source_diversity, breaking);
        let is_minor = avg_recency_hours > 48.0 || source_diversity <= 1;
        let best_tier = articles.iter().map(|a| a.tier).min().unwrap_or(2);
        let scrape_success = articles
            .iter()
            .any(|a| matches!(a.extraction_method, newsloom_common::ExtractionMethod::ScrapeFull | newsloom_common::ExtractionMethod::RssFull));
        let (use_search, reason) = should_use_search(
            scrape_success,
            total_content,
            importance,
            is_minor,
            best_tier,
            self.config.min_content_length,
        );

        let enrichment = if !self.enabled {
            EnrichmentBlock {
                status: "disabled".to_string(),
                ..Default::default()
            }
        } else if use_search {
            let topic = articles
                .first()
                .map(|a| a.raw_title.chars().take(200).collect::<String>())
                .unwrap_or_default();
            self.run_enrichment(&topic).await
        } else {
            debug!(cluster = cluster.id, reason, "Web enrichment skipped");
            EnrichmentBlock {
                status: format!("skipped:{reason}"),
                ..Default::default()
            }
        };

        info!(
            cluster = cluster.id,
            chunks = num_chunks,
            contradictions = contradictions.len(),
            arc = %narrative_arc,
            enrichment = %enrichment.status,
            "Context assembled"
        );

        ClusterContext {
            top_chunks,
            contradictions,
            key_entities,
            historical_text,
            narrative_arc: Some(narrative_arc),
            enrichment,
            prior_synthesis_text,
            timeline,
        }
    }

    /// Fan out the two enrichment calls in parallel; each failure degrades
    /// the block instead of failing the cluster.
    async fn run_enrichment(&self, topic: &str) -> EnrichmentBlock {
        let timeout = Duration::from_secs(self.config.search_timeout_secs);
        let research = async {
            self.research_breaker.try_acquire()?;
            let query = format!("Contexte factuel récent et vérifiable sur: {topic}");
            let result = retry_with_backoff(2, Duration::from_secs(2), Duration::from_secs(30), || async {
                tokio::time::timeout(timeout, self.researcher.search(&query, 900))
                    .await
                    .map_err(|_| ai_client::AiError::Connection("enrichment timeout".into()))?
            })
            .await;
            match &result {
                Ok(_) => self.research_breaker.record_success(),
                Err(e) if !matches!(e, ai_client::AiError::CircuitOpen(_)) => {
                    self.research_breaker.record_failure()
                }
                Err(_) => {}
            }
            result
        };
        let social = async {
            self.social_breaker.try_acquire()?;
            let result = retry_with_backoff(2, Duration::from_secs(2), Duration::from_secs(30), || async {
                tokio::time::timeout(timeout, self.social.analyze(topic, 600))
                    .await
                    .map_err(|_| ai_client::AiError::Connection("enrichment timeout".into()))?
            })
            .await;
            match &result {
                Ok(_) => self.social_breaker.record_success(),
                Err(e) if !matches!(e, ai_client::AiError::CircuitOpen(_)) => {
                    self.social_breaker.record_failure()
                }
                Err(_) => {}
            }
            result
        };

        let (research, social) = tokio::join!(research, social);

        let mut block = EnrichmentBlock::default();
        let mut successes = 0;
        match research {
            Ok(result) => {
                successes += 1;
                block.research_text = result.content;
                block.citations = result.citations.into_iter().map(|c| c.url).collect();
            }
            Err(e) => warn!(error = %e, "Web research enrichment failed"),
        }
        match social {
            Ok(pulse) => {
                successes += 1;
                block.social_summary = pulse.summary;
                block.social_sentiment = Some(pulse.sentiment);
                block.hashtags = pulse.trending_hashtags;
            }
            Err(e) => warn!(error = %e, "Social sentiment enrichment failed"),
        }
        block.status = if successes == 2 { "complete" } else { "partial" }.to_string();
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ai_client::{AiError, FactCheck, ResearchResult, SocialPulse};
    use chrono::Duration as ChronoDuration;
    use newsloom_common::ExtractionMethod;

    fn article(source: &str, title: &str, body: &str, hours_ago: i64) -> Article {
        Article {
            url: format!("https://{source}.fr/{}", title.len()),
            source_domain: format!("{source}.fr"),
            source_name: source.to_string(),
            raw_title: title.to_string(),
            raw_text: body.to_string(),
            published_at: Some(Utc::now() - ChronoDuration::hours(hours_ago)),
            authors: Vec::new(),
            image_url: None,
            language: "fr".to_string(),
            extraction_method: ExtractionMethod::ScrapeFull,
            tier: 2,
            category: None,
            meta_description: String::new(),
            used_in_synthesis_id: String::new(),
            covered_by_sources: Vec::new(),
            duplicate_count: 0,
        }
    }

    // --- chunking ---

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = chunk_text("Une seule phrase courte.", 256, 50);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn long_text_chunks_with_overlap() {
        let sentence = "Cette phrase contient exactement huit mots utiles pour tester. ";
        let text = sentence.repeat(60); // ~480 words
        let chunks = chunk_text(&text, 100, 20);
        assert!(chunks.len() >= 4);
        // Overlap: the start of chunk 2 repeats words from the end of chunk 1.
        let chunk1_words: Vec<&str> = chunks[0].split_whitespace().collect();
        let tail = chunk1_words[chunk1_words.len() - 20..].join(" ");
        assert!(chunks[1].starts_with(&tail));
    }

    #[test]
    fn chunks_carry_back_refs() {
        let articles = vec![
            article("alpha", "Titre un", &"Phrase complète ici. ".repeat(10), 1),
            article("beta", "Titre deux", &"Autre phrase là. ".repeat(10), 1),
        ];
        let chunks = chunk_articles(&articles);
        assert!(chunks.iter().any(|c| c.article_index == 0 && c.source_name == "alpha"));
        assert!(chunks.iter().any(|c| c.article_index == 1 && c.source_name == "beta"));
    }

    // --- fact density ---

    #[test]
    fn factual_text_scores_higher_than_hedged() {
        let factual = "Le PIB a progressé de 2,3 % au 12/03/2026 selon l'Insee, soit 45 milliards d'euros.";
        let hedged = "Il se pourrait que la situation semble évoluer, peut-être, selon certains observateurs probablement.";
        assert!(fact_density(factual) > fact_density(hedged));
    }

    #[test]
    fn density_is_clamped() {
        let d = fact_density("10% 20% 30% «citation» selon 12/01/2026 40 millions");
        assert!((0.0..=1.0).contains(&d));
        assert_eq!(fact_density(""), 0.0);
    }

    #[test]
    fn ranking_orders_by_density_desc() {
        let dense = Chunk {
            text: "45 % de hausse selon l'institut, 12 millions d'euros au 01/02/2026.".to_string(),
            source_name: "a".into(),
            source_url: "u".into(),
            article_index: 0,
            chunk_index: 0,
        };
        let vague = Chunk {
            text: "La situation pourrait peut-être évoluer prochainement semble-t-il.".to_string(),
            source_name: "b".into(),
            source_url: "u".into(),
            article_index: 1,
            chunk_index: 0,
        };
        let ranked = rank_chunks_by_fact_density(vec![vague, dense]);
        assert_eq!(ranked[0].0.source_name, "a");
        assert!(ranked[0].1 > ranked[1].1);
    }

    // --- contradictions ---

    #[test]
    fn negation_asymmetry_is_factual_contradiction() {
        let a = article("alpha", "t", "Le ministre confirme la réforme et annonce un calendrier précis dès septembre.", 1);
        let b = article(
            "beta",
            "t",
            "Le ministre ne confirme pas la réforme, il n'est pas question de calendrier, jamais évoqué, aucun engagement, il dément toute annonce.",
            1,
        );
        let found = detect_contradictions(&[a, b], &[vec![1.0, 0.0], vec![0.99, 0.01]], 0.75, 3);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, ContradictionKind::Factual);
    }

    #[test]
    fn dissimilar_pairs_are_not_compared() {
        let a = article("alpha", "t", "Le ministre ne confirme pas, jamais, aucun, dément, n'est pas d'accord.", 1);
        let b = article("beta", "t", "Texte totalement différent sans négation particulière.", 1);
        let found = detect_contradictions(&[a, b], &[vec![1.0, 0.0], vec![0.0, 1.0]], 0.75, 3);
        assert!(found.is_empty());
    }

    #[test]
    fn different_dates_are_temporal() {
        let a = article("alpha", "t", "La réunion aura lieu le 12/03/2026 au siège.", 1);
        let b = article("beta", "t", "La réunion aura lieu le 15/03/2026 au siège.", 1);
        let found = detect_contradictions(&[a, b], &[vec![1.0, 0.0], vec![0.99, 0.01]], 0.75, 3);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, ContradictionKind::Temporal);
    }

    // --- entities ---

    #[test]
    fn entities_are_categorized_and_deduped() {
        let text = "Emmanuel Durand a rencontré la Banque Centrale à Paris. Emmanuel Durand reviendra à Paris le 12 mars.";
        let entities = extract_entities(text);
        assert!(entities.persons.contains(&"Emmanuel Durand".to_string()));
        assert!(entities.locations.contains(&"Paris".to_string()));
        assert_eq!(
            entities.persons.iter().filter(|p| p.as_str() == "Emmanuel Durand").count(),
            1
        );
        assert!(!entities.dates.is_empty());
    }

    // --- narrative arc ---

    #[test]
    fn arc_derivation_follows_rules() {
        assert_eq!(derive_narrative_arc(0, None, 3), NarrativeArc::Emerging);
        assert_eq!(derive_narrative_arc(1, Some(1.0), 3), NarrativeArc::Emerging);
        assert_eq!(derive_narrative_arc(3, Some(9.0), 3), NarrativeArc::Resolved);
        assert_eq!(derive_narrative_arc(4, Some(1.0), 5), NarrativeArc::Peak);
        assert_eq!(derive_narrative_arc(3, Some(4.0), 2), NarrativeArc::Declining);
        assert_eq!(derive_narrative_arc(2, Some(1.0), 3), NarrativeArc::Developing);
    }

    // --- enrichment gating ---

    #[test]
    fn successful_scrape_never_searches() {
        let (use_search, reason) =
            should_use_search(true, 5000, TopicIntensity::Breaking, false, 1, 500);
        assert!(!use_search);
        assert_eq!(reason, "scrape_success");
    }

    #[test]
    fn minor_topic_never_searches() {
        let (use_search, reason) =
            should_use_search(false, 100, TopicIntensity::Standard, true, 1, 500);
        assert!(!use_search);
        assert_eq!(reason, "minor_topic");
    }

    #[test]
    fn breaking_and_hot_search_when_scrape_failed() {
        assert_eq!(
            should_use_search(false, 100, TopicIntensity::Breaking, false, 2, 500),
            (true, "urgent_breaking")
        );
        assert_eq!(
            should_use_search(false, 100, TopicIntensity::Hot, false, 2, 500),
            (true, "urgent_hot")
        );
    }

    #[test]
    fn tier1_failure_searches_else_cost_control() {
        assert_eq!(
            should_use_search(false, 100, TopicIntensity::Standard, false, 1, 500),
            (true, "tier1_scrape_failed")
        );
        assert_eq!(
            should_use_search(false, 100, TopicIntensity::Standard, false, 2, 500),
            (false, "cost_control")
        );
    }

    #[test]
    fn importance_derivation() {
        assert_eq!(topic_importance(3, 1.0, 4, false), TopicIntensity::Breaking);
        assert_eq!(topic_importance(2, 30.0, 2, true), TopicIntensity::Breaking);
        assert_eq!(topic_importance(5, 3.0, 2, false), TopicIntensity::Hot);
        assert_eq!(topic_importance(2, 60.0, 1, false), TopicIntensity::Standard);
        assert_eq!(topic_importance(3, 12.0, 2, false), TopicIntensity::Developing);
    }

    // --- enrichment execution ---

    struct OkResearcher;
    #[async_trait::async_trait]
    impl WebResearcher for OkResearcher {
        async fn search(&self, _q: &str, _m: u32) -> Result<ResearchResult, AiError> {
            Ok(ResearchResult {
                content: "contexte".to_string(),
                citations: Vec::new(),
            })
        }
        async fn fact_check(&self, claim: &str) -> Result<FactCheck, AiError> {
            Ok(FactCheck {
                claim: claim.to_string(),
                result: "VERIFIED".to_string(),
            })
        }
    }

    struct DownSocial;
    #[async_trait::async_trait]
    impl SocialAnalyst for DownSocial {
        async fn analyze(&self, _t: &str, _m: u32) -> Result<SocialPulse, AiError> {
            Err(AiError::Api {
                status: 400,
                message: "bad".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn partial_enrichment_on_single_backend_failure() {
        let builder = ContextBuilder::new(
            Arc::new(OkResearcher),
            Arc::new(DownSocial),
            EnrichmentConfig::default(),
            true,
        );
        let block = builder.run_enrichment("sujet").await;
        assert_eq!(block.status, "partial");
        assert_eq!(block.research_text, "contexte");
        assert!(block.social_summary.is_empty());
    }

    #[tokio::test]
    async fn disabled_builder_reports_disabled() {
        let builder = ContextBuilder::new(
            Arc::new(OkResearcher),
            Arc::new(DownSocial),
            EnrichmentConfig::default(),
            false,
        );
        let cluster = Cluster::new(
            0,
            vec![article("alpha", "Un titre", &"Corps. ".repeat(20), 1)],
            Vec::new(),
        );
        let ctx = builder.build(&cluster, &[vec![1.0]], None, Utc::now()).await;
        assert_eq!(ctx.enrichment.status, "disabled");
    }
}
