use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Source model ---

/// How an article's content was obtained, in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    RssFull,
    RssMetadata,
    ScrapeFull,
    ScrapePartial,
    Api,
}

impl std::fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractionMethod::RssFull => write!(f, "rss_full"),
            ExtractionMethod::RssMetadata => write!(f, "rss_metadata"),
            ExtractionMethod::ScrapeFull => write!(f, "scrape_full"),
            ExtractionMethod::ScrapePartial => write!(f, "scrape_partial"),
            ExtractionMethod::Api => write!(f, "api"),
        }
    }
}

/// A registered news source. Identity is the domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub domain: String,
    pub name: String,
    pub base_url: String,
    /// CSS-ish selector hints for article links, keyed by section path.
    #[serde(default)]
    pub link_selectors: Vec<String>,
    #[serde(default)]
    pub title_selector: Option<String>,
    #[serde(default)]
    pub content_selector: Option<String>,
    /// Ordered RSS/Atom feed URLs. Empty = HTML scraping only.
    #[serde(default)]
    pub rss_feeds: Vec<String>,
    /// Minimum gap between requests to this domain, in seconds.
    pub rate_limit_secs: f64,
    /// 1 = major, 2 = standard, 3 = minor.
    #[serde(default = "default_tier")]
    pub tier: u8,
    pub language: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub auto_discovered: bool,
}

pub fn default_tier() -> u8 {
    2
}

impl Source {
    /// Strategy order this source advertises: feeds first when registered,
    /// then HTML scraping.
    pub fn strategies(&self) -> Vec<ExtractionMethod> {
        if self.rss_feeds.is_empty() {
            vec![ExtractionMethod::ScrapeFull]
        } else {
            vec![ExtractionMethod::RssFull, ExtractionMethod::ScrapeFull]
        }
    }
}

// --- Source health ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Active,
    Degraded,
    Blocked,
    Blacklisted,
    Discovered,
}

impl std::fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceStatus::Active => write!(f, "active"),
            SourceStatus::Degraded => write!(f, "degraded"),
            SourceStatus::Blocked => write!(f, "blocked"),
            SourceStatus::Blacklisted => write!(f, "blacklisted"),
            SourceStatus::Discovered => write!(f, "discovered"),
        }
    }
}

/// Persisted success/failure bookkeeping for one domain.
/// Invariant: `successful + failed == total_attempts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceHealth {
    pub domain: String,
    pub status: SourceStatus,
    pub total_attempts: u64,
    pub successful: u64,
    pub failed: u64,
    /// Rolling 7-day window counters, pruned on every record.
    #[serde(default)]
    pub recent_successes: Vec<DateTime<Utc>>,
    #[serde(default)]
    pub recent_failures: Vec<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub consecutive_empty_runs: u32,
    #[serde(default)]
    pub discovered_by: Option<String>,
    #[serde(default)]
    pub replaces_domain: Option<String>,
}

const ROLLING_WINDOW_DAYS: i64 = 7;

impl SourceHealth {
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            status: SourceStatus::Active,
            total_attempts: 0,
            successful: 0,
            failed: 0,
            recent_successes: Vec::new(),
            recent_failures: Vec::new(),
            last_success_at: None,
            last_failure_at: None,
            last_error: None,
            consecutive_empty_runs: 0,
            discovered_by: None,
            replaces_domain: None,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            return 1.0;
        }
        self.successful as f64 / self.total_attempts as f64
    }

    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.total_attempts += 1;
        self.successful += 1;
        self.last_success_at = Some(now);
        self.recent_successes.push(now);
        self.prune_window(now);
        self.apply_transitions();
    }

    pub fn record_failure(&mut self, error: &str, now: DateTime<Utc>) {
        self.total_attempts += 1;
        self.failed += 1;
        self.last_failure_at = Some(now);
        self.last_error = Some(error.to_string());
        self.recent_failures.push(now);
        self.prune_window(now);
        self.apply_transitions();
    }

    fn prune_window(&mut self, now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::days(ROLLING_WINDOW_DAYS);
        self.recent_successes.retain(|t| *t >= cutoff);
        self.recent_failures.retain(|t| *t >= cutoff);
    }

    /// Status transitions. Blacklisted is sticky: only an operator (or a hard
    /// block) moves a source in or out of it.
    fn apply_transitions(&mut self) {
        match self.status {
            SourceStatus::Blacklisted => {}
            SourceStatus::Blocked => {}
            _ => {
                if self.recent_failures.len() >= 5 && self.recent_successes.is_empty() {
                    self.status = SourceStatus::Blocked;
                } else if self.success_rate() < 0.5 {
                    self.status = SourceStatus::Degraded;
                } else if self.status == SourceStatus::Degraded && self.success_rate() >= 0.7 {
                    self.status = SourceStatus::Active;
                }
            }
        }
    }
}

// --- Article ---

/// A collected article. Natural key is the URL. Articles are not durably
/// stored beyond the `used_in_synthesis_id` marker in the vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub url: String,
    pub source_domain: String,
    pub source_name: String,
    pub raw_title: String,
    pub raw_text: String,
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    pub language: String,
    pub extraction_method: ExtractionMethod,
    #[serde(default = "default_tier")]
    pub tier: u8,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub meta_description: String,
    /// Empty string until the article feeds a persisted synthesis.
    #[serde(default)]
    pub used_in_synthesis_id: String,
    /// Source names whose near-duplicate coverage collapsed into this article.
    #[serde(default)]
    pub covered_by_sources: Vec<String>,
    #[serde(default)]
    pub duplicate_count: u32,
}

impl Article {
    /// Extraction-time acceptance rule: body >= 50 chars, or a title of at
    /// least 10 chars backed by a meta description of at least 30.
    pub fn passes_content_gate(&self) -> bool {
        self.raw_text.chars().count() >= 50
            || (self.raw_title.chars().count() >= 10
                && self.meta_description.chars().count() >= 30)
    }
}

// --- Cluster ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterType {
    New,
    Update,
}

/// A past synthesis pulled back in for hybrid clustering, with its stored vector.
#[derive(Debug, Clone)]
pub struct PastSynthesis {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub synthesis: Synthesis,
}

/// A transient group of related articles (+ optionally prior syntheses)
/// feeding one synthesis generation. A cluster with zero articles is
/// discarded before it ever reaches this type.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub id: i64,
    pub articles: Vec<Article>,
    pub past_syntheses: Vec<PastSynthesis>,
    pub cluster_type: ClusterType,
}

impl Cluster {
    pub fn new(id: i64, articles: Vec<Article>, past_syntheses: Vec<PastSynthesis>) -> Self {
        let cluster_type = if past_syntheses.is_empty() {
            ClusterType::New
        } else {
            ClusterType::Update
        };
        Self {
            id,
            articles,
            past_syntheses,
            cluster_type,
        }
    }

    pub fn urls(&self) -> Vec<String> {
        self.articles.iter().map(|a| crate::normalize_url(&a.url)).collect()
    }
}

// --- Synthesis metadata enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeArc {
    Emerging,
    Developing,
    Peak,
    Declining,
    Resolved,
}

impl std::fmt::Display for NarrativeArc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NarrativeArc::Emerging => write!(f, "emerging"),
            NarrativeArc::Developing => write!(f, "developing"),
            NarrativeArc::Peak => write!(f, "peak"),
            NarrativeArc::Declining => write!(f, "declining"),
            NarrativeArc::Resolved => write!(f, "resolved"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Negative,
    #[default]
    Neutral,
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TopicIntensity {
    Breaking,
    Hot,
    Developing,
    #[default]
    Standard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModerationFlag {
    #[default]
    Safe,
    Warning,
    Blocked,
}

// --- Causal graph ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CausalRelation {
    Causes,
    Triggers,
    Enables,
    Prevents,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausalEdge {
    pub cause: String,
    pub effect: String,
    #[serde(rename = "type")]
    pub relation: CausalRelation,
    #[serde(default)]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionTimeframe {
    CourtTerme,
    MoyenTerme,
    LongTerme,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub prediction: String,
    /// Confidence in [0, 1].
    pub probability: f32,
    #[serde(rename = "type", default)]
    pub prediction_type: String,
    pub timeframe: PredictionTimeframe,
    #[serde(default)]
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CausalGraph {
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(default)]
    pub edges: Vec<CausalEdge>,
    #[serde(default)]
    pub central_entity: Option<String>,
    #[serde(default)]
    pub narrative_flow: String,
    #[serde(default)]
    pub predictions: Vec<Prediction>,
    /// Set when the pattern-based fallback extractor had to supplement the
    /// LLM's causal chain.
    #[serde(default)]
    pub fallback_note: Option<String>,
}

// --- Synthesis ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub name: String,
    pub url: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub date: DateTime<Utc>,
    pub title: String,
    pub source: String,
}

/// Persona identity attached to a synthesis: id, display name, emoji.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PersonaIdentity {
    pub id: String,
    pub name: String,
    pub emoji: String,
}

/// The durable unit of output. One row per story (updates reuse the id);
/// persona variants are separate rows pointing back via `base_synthesis_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Synthesis {
    pub id: Uuid,
    #[serde(default)]
    pub base_synthesis_id: Option<Uuid>,
    pub title: String,
    pub introduction: String,
    pub body: String,
    pub analysis: String,
    pub key_points: Vec<String>,
    /// Deduplicated source list. Invariant: `num_sources == sources.len()`.
    pub sources: Vec<SourceRef>,
    pub num_sources: usize,
    pub cluster_id: i64,
    pub compliance_score: f64,
    pub reading_time_minutes: u32,
    pub created_at: DateTime<Utc>,
    pub narrative_arc: NarrativeArc,
    #[serde(default)]
    pub timeline: Vec<TimelineEvent>,
    #[serde(default)]
    pub has_contradictions: bool,
    #[serde(default)]
    pub contradictions_count: u32,
    #[serde(default)]
    pub key_entities: Vec<String>,
    #[serde(default)]
    pub causal_graph: CausalGraph,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub category_confidence: f64,
    #[serde(default)]
    pub sentiment: Sentiment,
    #[serde(default)]
    pub topic_intensity: TopicIntensity,
    #[serde(default)]
    pub persona: PersonaIdentity,
    #[serde(default)]
    pub is_persona_version: bool,
    #[serde(default)]
    pub quality_fallback: bool,

    // Story persistence
    #[serde(default)]
    pub update_count: u32,
    pub first_seen: DateTime<Utc>,
    #[serde(default)]
    pub last_updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub update_notice: Option<String>,
    #[serde(default)]
    pub parent_synthesis_id: Option<Uuid>,
    pub story_id: String,

    // Moderation
    #[serde(default)]
    pub is_published: bool,
    #[serde(default)]
    pub moderation_flag: ModerationFlag,

    #[serde(default)]
    pub generation_cost_usd: f64,
    #[serde(default)]
    pub enrichment_status: String,

    // Knowledge hub linkage (opaque ids)
    #[serde(default)]
    pub entity_ids: Vec<Uuid>,
    #[serde(default)]
    pub topic_id: Option<Uuid>,
}
