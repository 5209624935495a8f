mod routes;

use std::sync::Arc;

use ai_client::{HttpChatClient, HttpEmbedder, HttpSocialAnalyst, HttpWebResearcher, TextEmbedder};
use anyhow::Result;
use newsloom_common::{Config, PageFetcher};
use newsloom_knowledge::KnowledgeHub;
use newsloom_pipeline::{PipelineDeps, PipelineManager, ProgressBroker, RunLock};
use newsloom_scraper::{HttpFetcher, Scraper};
use newsloom_sources::{HealthStore, SourceDiscovery, SourceRegistry};
use newsloom_store::{KvStore, MemoryKvStore, MemoryVectorStore, VectorStore};
use newsloom_synthesis::{
    ContextBuilder, KeywordTable, PersonaSelector, SynthesisGenerator, SynthesisPersister,
};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env();
    config.log_redacted();

    // In-memory backends stand in until the real stores are wired up via
    // deployment config; the whole core only sees the traits.
    let store: Arc<dyn VectorStore> = Arc::new(MemoryVectorStore::new());
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());

    let registry = Arc::new(SourceRegistry::with_defaults());
    let health = Arc::new(HealthStore::new(kv.clone(), config.health_snapshot_path.clone()));
    health.load().await?;

    let broker = Arc::new(ProgressBroker::new());
    let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpFetcher::new(&config.scraper.user_agent)?);
    let chat = Arc::new(HttpChatClient::new(
        &config.llm_base_url,
        &config.llm_api_key,
        &config.llm_model,
    ));
    let embedder: Arc<dyn TextEmbedder> = Arc::new(HttpEmbedder::new(
        &config.llm_base_url,
        &config.llm_api_key,
        "bge-m3",
    ));

    let scraper = Arc::new(Scraper::new(
        fetcher.clone(),
        registry.clone(),
        health.clone(),
        broker.clone(),
        config.scraper.clone(),
    ));
    let discovery = Some(Arc::new(SourceDiscovery::new(
        chat.clone(),
        fetcher,
        registry.clone(),
        health.clone(),
        broker.clone(),
        config.discovery.clone(),
        &config.scraper.user_agent,
    )));

    let enrichment_enabled =
        !config.web_research_api_key.is_empty() || !config.social_api_key.is_empty();
    let context_builder = Arc::new(ContextBuilder::new(
        Arc::new(HttpWebResearcher::new(
            "https://api.perplexity.ai",
            &config.web_research_api_key,
            "sonar",
        )),
        Arc::new(HttpSocialAnalyst::new(
            "https://api.x.ai/v1",
            &config.social_api_key,
            "grok-3",
        )),
        config.enrichment.clone(),
        enrichment_enabled,
    ));

    let deps = Arc::new(PipelineDeps {
        registry: registry.clone(),
        health: health.clone(),
        scraper,
        discovery: discovery.clone(),
        embedder: embedder.clone(),
        store: store.clone(),
        context_builder,
        generator: Arc::new(SynthesisGenerator::new(chat, config.generator.clone())),
        persona_selector: Arc::new(PersonaSelector::new(
            KeywordTable::with_seed(),
            config.persona.clone(),
        )),
        persister: Arc::new(SynthesisPersister::new(store.clone())),
        knowledge: Arc::new(KnowledgeHub::new(store, embedder)),
        sink: broker.clone(),
        config: config.clone(),
    });

    let manager = Arc::new(PipelineManager::new(
        deps,
        RunLock::new(kv, config.lock_ttl_secs),
        broker,
    ));

    let state = routes::AppState {
        manager,
        health: health.clone(),
        discovery,
        operator_token: config.operator_token.clone(),
    };
    let app = routes::router(state).layer(TraceLayer::new_for_http());

    let address = format!("{}:{}", config.web_host, config.web_port);
    info!(%address, sources = registry.len().await, "Newsloom admin surface listening");
    let listener = tokio::net::TcpListener::bind(&address).await?;
    axum::serve(listener, app).await?;

    // Snapshot on clean shutdown.
    health.flush().await?;
    Ok(())
}
