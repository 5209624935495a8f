use std::env;
use std::path::PathBuf;

/// Application configuration. Tunables carry their pipeline defaults;
/// environment variables override deployment-specific values.
#[derive(Debug, Clone)]
pub struct Config {
    // Web server
    pub web_host: String,
    pub web_port: u16,

    /// Bearer token required on mutating admin calls. None = mutations rejected (503).
    pub operator_token: Option<String>,

    // AI providers
    pub llm_api_key: String,
    pub llm_base_url: String,
    pub llm_model: String,
    pub web_research_api_key: String,
    pub social_api_key: String,

    /// Disk mirror of the source health store.
    pub health_snapshot_path: PathBuf,

    /// Distributed run-lock TTL.
    pub lock_ttl_secs: u64,

    pub scraper: ScraperConfig,
    pub dedup: DedupConfig,
    pub cluster: ClusterConfig,
    pub continuity: ContinuityConfig,
    pub enrichment: EnrichmentConfig,
    pub generator: GeneratorConfig,
    pub persona: PersonaConfig,
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    /// Hard deadline wrapping discovery + extraction for one source.
    pub source_timeout_secs: u64,
    /// Deadline for a single page fetch + parse.
    pub article_timeout_secs: u64,
    pub max_parallel_sources: usize,
    pub max_parallel_articles: usize,
    /// Fraction of hard-block responses (403/406/429) that flags a source as blocked.
    pub block_ratio_threshold: f64,
    /// Consecutive empty runs before auto-discovery is scheduled.
    pub empty_runs_before_discovery: u32,
    pub user_agent: String,
    /// Bodies shorter than this fall back to the title+meta partial strategy.
    pub partial_body_threshold: usize,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            source_timeout_secs: 45,
            article_timeout_secs: 15,
            max_parallel_sources: 5,
            max_parallel_articles: 5,
            block_ratio_threshold: 0.6,
            empty_runs_before_discovery: 2,
            user_agent: "NewsloomBot/0.1".to_string(),
            partial_body_threshold: 200,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Cosine similarity above which two articles collapse into one.
    pub embedding_threshold: f32,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            embedding_threshold: 0.92,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub min_cluster_size: usize,
    pub min_samples: usize,
    /// Cosine-distance epsilon for density linkage.
    pub epsilon: f32,
    /// Similarity threshold for the greedy fallback clusterer.
    pub fallback_similarity: f32,
    /// false = skip density clustering and use the greedy fallback directly.
    pub use_density: bool,
    pub embed_batch_size: usize,
    pub max_past_syntheses: usize,
    /// Syntheses newer than this are always re-clustered.
    pub persistence_recent_days: i64,
    /// Older syntheses need at least this persistence score.
    pub persistence_min_score: f64,
    pub persistence_max_days: i64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: 2,
            min_samples: 1,
            epsilon: 0.15,
            fallback_similarity: 0.70,
            use_density: true,
            embed_batch_size: 20,
            max_past_syntheses: 150,
            persistence_recent_days: 3,
            persistence_min_score: 3.0,
            persistence_max_days: 90,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContinuityConfig {
    pub lookback_hours: i64,
    pub url_overlap_threshold: f64,
    pub embedding_threshold: f32,
}

impl Default for ContinuityConfig {
    fn default() -> Self {
        Self {
            lookback_hours: 24,
            url_overlap_threshold: 0.7,
            embedding_threshold: 0.92,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    /// Scraped content below this length counts as a failed scrape for gating.
    pub min_content_length: usize,
    pub search_timeout_secs: u64,
    pub max_fact_check_claims: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            min_content_length: 500,
            search_timeout_secs: 30,
            max_fact_check_claims: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub llm_timeout_secs: u64,
    pub max_retries: u32,
    pub temperature: f32,
    pub price_input_per_token: f64,
    pub price_output_per_token: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            llm_timeout_secs: 120,
            max_retries: 3,
            temperature: 0.7,
            price_input_per_token: 0.000_000_5,
            price_output_per_token: 0.000_001_5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PersonaConfig {
    pub quality_threshold: f64,
    pub keyword_confidence_threshold: f64,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            quality_threshold: 0.6,
            keyword_confidence_threshold: 0.6,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Global cap on auto-discovered sources.
    pub max_discovered: usize,
    pub max_attempts_per_domain: u32,
    pub max_suggestions: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_discovered: 10,
            max_attempts_per_domain: 3,
            max_suggestions: 3,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            web_host: "0.0.0.0".to_string(),
            web_port: 3000,
            operator_token: None,
            llm_api_key: String::new(),
            llm_base_url: "https://openrouter.ai/api/v1".to_string(),
            llm_model: "deepseek/deepseek-chat".to_string(),
            web_research_api_key: String::new(),
            social_api_key: String::new(),
            health_snapshot_path: PathBuf::from("data/sources_health.json"),
            lock_ttl_secs: 3600,
            scraper: ScraperConfig::default(),
            dedup: DedupConfig::default(),
            cluster: ClusterConfig::default(),
            continuity: ContinuityConfig::default(),
            enrichment: EnrichmentConfig::default(),
            generator: GeneratorConfig::default(),
            persona: PersonaConfig::default(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to the
    /// built-in defaults for everything not surfaced.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = env::var("WEB_HOST") {
            cfg.web_host = v;
        }
        if let Ok(v) = env::var("WEB_PORT") {
            if let Ok(port) = v.parse() {
                cfg.web_port = port;
            }
        }
        cfg.operator_token = env::var("OPERATOR_TOKEN").ok().filter(|t| !t.is_empty());
        cfg.llm_api_key = env::var("LLM_API_KEY").unwrap_or_default();
        if let Ok(v) = env::var("LLM_BASE_URL") {
            cfg.llm_base_url = v;
        }
        if let Ok(v) = env::var("LLM_MODEL") {
            cfg.llm_model = v;
        }
        cfg.web_research_api_key = env::var("WEB_RESEARCH_API_KEY").unwrap_or_default();
        cfg.social_api_key = env::var("SOCIAL_API_KEY").unwrap_or_default();
        if let Ok(v) = env::var("HEALTH_SNAPSHOT_PATH") {
            cfg.health_snapshot_path = PathBuf::from(v);
        }
        if let Ok(v) = env::var("SOURCE_TIMEOUT_SECS") {
            if let Ok(secs) = v.parse() {
                cfg.scraper.source_timeout_secs = secs;
            }
        }
        if let Ok(v) = env::var("PERSONA_QUALITY_THRESHOLD") {
            if let Ok(t) = v.parse() {
                cfg.persona.quality_threshold = t;
            }
        }
        cfg
    }

    /// Log key lengths of the sensitive values for debugging, never the values.
    pub fn log_redacted(&self) {
        let vars = [
            ("LLM_API_KEY", &self.llm_api_key),
            ("WEB_RESEARCH_API_KEY", &self.web_research_api_key),
            ("SOCIAL_API_KEY", &self.social_api_key),
        ];
        for (name, value) in vars {
            if value.is_empty() {
                tracing::info!("{name} = (empty)");
            } else {
                tracing::info!("{name} = ({} chars)", value.len());
            }
        }
    }
}
