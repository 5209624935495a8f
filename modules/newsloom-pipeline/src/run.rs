//! The staged pipeline run: scrape, embed, dedup, load history, cluster,
//! then per-cluster continuity/context/generation/persona/persist/knowledge.
//! Every stage boundary re-checks the cooperative cancellation flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ai_client::TextEmbedder;
use chrono::Utc;
use newsloom_cluster::{cluster_hybrid, dedup_articles, EmbeddingBatcher, PersistenceSelector};
use newsloom_common::{
    Cluster, Config, LogLevel, NewsloomError, PipelineMode, PipelineStatus, ProgressEvent,
    ProgressSink, RunSummary, Synthesis,
};
use newsloom_knowledge::KnowledgeHub;
use newsloom_scraper::Scraper;
use newsloom_sources::{HealthStore, SourceDiscovery, SourceRegistry};
use newsloom_store::{Point, VectorStore, ARTICLES};
use newsloom_synthesis::{
    persona, quality_accepts, score_quality, ContextBuilder, ContinuityDecider,
    ContinuityDecision, PersonaSelector, SynthesisGenerator, SynthesisPersister,
};
use tracing::{info, warn};
use uuid::Uuid;

/// Upper bound on syntheses per run; clusters are taken largest first.
const MAX_SYNTHESES_PER_RUN: usize = 10;

pub struct PipelineDeps {
    pub config: Config,
    pub registry: Arc<SourceRegistry>,
    pub health: Arc<HealthStore>,
    pub scraper: Arc<Scraper>,
    pub discovery: Option<Arc<SourceDiscovery>>,
    pub embedder: Arc<dyn TextEmbedder>,
    pub store: Arc<dyn VectorStore>,
    pub context_builder: Arc<ContextBuilder>,
    pub generator: Arc<SynthesisGenerator>,
    pub persona_selector: Arc<PersonaSelector>,
    pub persister: Arc<SynthesisPersister>,
    pub knowledge: Arc<KnowledgeHub>,
    pub sink: Arc<dyn ProgressSink>,
}

#[derive(Debug, Clone)]
pub struct RunParams {
    pub mode: PipelineMode,
    pub sources: Option<Vec<String>>,
    pub topics: Vec<String>,
    pub max_articles_per_source: usize,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            mode: PipelineMode::Scrape,
            sources: None,
            topics: Vec::new(),
            max_articles_per_source: 20,
        }
    }
}

fn check_cancelled(cancelled: &AtomicBool) -> Result<(), NewsloomError> {
    if cancelled.load(Ordering::Relaxed) {
        Err(NewsloomError::Cancelled)
    } else {
        Ok(())
    }
}

fn mean_pool(embeddings: &[&Vec<f32>]) -> Vec<f32> {
    let Some(first) = embeddings.first() else {
        return Vec::new();
    };
    let mut mean = vec![0.0f32; first.len()];
    for embedding in embeddings {
        for (slot, value) in mean.iter_mut().zip(embedding.iter()) {
            *slot += value;
        }
    }
    let n = embeddings.len() as f32;
    for slot in &mut mean {
        *slot /= n;
    }
    mean
}

/// Execute one full run. The lock is the caller's responsibility; this
/// function only honours the cancellation flag and reports through the sink.
pub async fn execute(
    deps: &PipelineDeps,
    params: RunParams,
    cancelled: Arc<AtomicBool>,
) -> RunSummary {
    let mut summary = RunSummary {
        mode: params.mode.to_string(),
        started_at: Some(Utc::now()),
        status: PipelineStatus::Running,
        ..Default::default()
    };

    match run_stages(deps, params, cancelled, &mut summary).await {
        Ok(()) => {
            summary.status = PipelineStatus::Completed;
            summary.completed_at = Some(Utc::now());
            deps.sink.publish(ProgressEvent::Progress {
                percent: 100,
                step: "terminé".to_string(),
                status: PipelineStatus::Completed,
            });
            deps.sink.publish(ProgressEvent::Completed {
                summary: summary.clone(),
            });
        }
        Err(NewsloomError::Cancelled) => {
            summary.status = PipelineStatus::Cancelled;
            summary.completed_at = Some(Utc::now());
            info!("Pipeline run cancelled by operator");
            deps.sink.publish(ProgressEvent::Progress {
                percent: 0,
                step: "annulé".to_string(),
                status: PipelineStatus::Cancelled,
            });
        }
        Err(e) => {
            summary.status = PipelineStatus::Error;
            summary.error = Some(e.to_string());
            summary.completed_at = Some(Utc::now());
            warn!(error = %e, "Pipeline run failed");
            deps.sink.publish(ProgressEvent::Error {
                error: e.to_string(),
            });
        }
    }

    if let Err(e) = deps.health.flush().await {
        warn!(error = %e, "Health snapshot flush failed at end of run");
    }
    summary
}

async fn run_stages(
    deps: &PipelineDeps,
    params: RunParams,
    cancelled: Arc<AtomicBool>,
    summary: &mut RunSummary,
) -> Result<(), NewsloomError> {
    let progress = |percent: u8, step: &str| {
        deps.sink.publish(ProgressEvent::Progress {
            percent,
            step: step.to_string(),
            status: PipelineStatus::Running,
        });
    };

    // --- Scrape fan-out ---
    progress(5, "collecte des sources");
    check_cancelled(&cancelled)?;
    let outcome = deps
        .scraper
        .run(
            params.mode,
            params.sources.clone(),
            &params.topics,
            params.max_articles_per_source,
            cancelled.clone(),
        )
        .await
        .map_err(|e| NewsloomError::Scrape(e.to_string()))?;
    summary.raw_articles = outcome.articles.len();

    // Auto-discovery runs detached; the pipeline never waits for it.
    if let Some(discovery) = &deps.discovery {
        for candidate in outcome.discovery_candidates {
            let discovery = discovery.clone();
            tokio::spawn(async move {
                if let Err(e) = discovery
                    .discover_replacement(&candidate.domain, &candidate.detail)
                    .await
                {
                    warn!(domain = %candidate.domain, error = %e, "Background discovery failed");
                }
            });
        }
    }

    check_cancelled(&cancelled)?;
    if outcome.articles.is_empty() {
        info!("No articles collected, completing with empty counters");
        return Ok(());
    }

    // --- Embeddings ---
    progress(30, "calcul des embeddings");
    let batcher = EmbeddingBatcher::new(
        deps.embedder.clone(),
        deps.sink.clone(),
        deps.config.cluster.embed_batch_size,
    );
    let embeddings = batcher.embed_articles(&outcome.articles, &cancelled).await?;

    // --- Dedup ---
    progress(40, "déduplication");
    check_cancelled(&cancelled)?;
    let deduped = dedup_articles(
        outcome.articles,
        embeddings,
        deps.config.dedup.embedding_threshold,
    );
    summary.unique_articles = deduped.articles.len();
    summary.duplicates_removed = deduped.removed.len();
    summary.sources_used = deduped
        .articles
        .iter()
        .map(|a| a.source_domain.as_str())
        .collect::<std::collections::HashSet<_>>()
        .len();

    // --- Past syntheses for hybrid clustering ---
    progress(50, "chargement des histoires persistantes");
    check_cancelled(&cancelled)?;
    let now = Utc::now();
    let selector = PersistenceSelector::new(deps.store.clone(), deps.config.cluster.clone());
    let past = selector
        .select(now)
        .await
        .map_err(|e| NewsloomError::Store(e.to_string()))?;
    summary.past_syntheses_used = past.len();

    // --- Clustering (CPU-bound, off the I/O scheduler) ---
    progress(55, "clustering hybride");
    check_cancelled(&cancelled)?;
    let article_vecs = deduped.embeddings.clone();
    let synthesis_vecs: Vec<Vec<f32>> = past.iter().map(|p| p.vector.clone()).collect();
    let cluster_config = deps.config.cluster.clone();
    let raw_clusters = tokio::task::spawn_blocking(move || {
        cluster_hybrid(&article_vecs, &synthesis_vecs, &cluster_config)
    })
    .await
    .map_err(|e| NewsloomError::Validation(format!("clustering task failed: {e}")))?;

    let mut clusters: Vec<(Cluster, Vec<Vec<f32>>)> = raw_clusters
        .into_iter()
        .map(|raw| {
            let articles = raw
                .article_indices
                .iter()
                .map(|&i| deduped.articles[i].clone())
                .collect::<Vec<_>>();
            let cluster_embeddings = raw
                .article_indices
                .iter()
                .map(|&i| deduped.embeddings[i].clone())
                .collect::<Vec<_>>();
            let past_syntheses = raw
                .synthesis_indices
                .iter()
                .map(|&i| past[i].clone())
                .collect::<Vec<_>>();
            (Cluster::new(raw.label, articles, past_syntheses), cluster_embeddings)
        })
        .collect();
    clusters.sort_by_key(|(c, _)| std::cmp::Reverse(c.articles.len()));
    summary.clusters = clusters.len();
    deps.sink.publish(ProgressEvent::log(
        LogLevel::Success,
        format!(
            "{} cluster(s), {} article(s) unique(s), {} histoire(s) persistante(s)",
            clusters.len(),
            summary.unique_articles,
            summary.past_syntheses_used
        ),
    ));

    // --- Store article markers (vector + minimal payload, no full text) ---
    progress(65, "indexation des articles");
    check_cancelled(&cancelled)?;
    for (article, vector) in deduped.articles.iter().zip(deduped.embeddings.iter()) {
        let point = Point {
            id: Uuid::new_v4(),
            vector: vector.clone(),
            payload: serde_json::json!({
                "url": article.url,
                "source_domain": article.source_domain,
                "source_name": article.source_name,
                "title": article.raw_title,
                "published_at": article.published_at.map(|t| t.to_rfc3339()),
                "used_in_synthesis_id": "",
            }),
        };
        deps.store
            .upsert(ARTICLES, point)
            .await
            .map_err(|e| NewsloomError::Store(e.to_string()))?;
    }

    // --- Per-cluster synthesis ---
    let decider = ContinuityDecider::new(deps.store.clone(), deps.config.continuity.clone());
    let eligible: Vec<&(Cluster, Vec<Vec<f32>>)> = clusters
        .iter()
        .filter(|(c, _)| c.articles.len() >= 2)
        .take(MAX_SYNTHESES_PER_RUN)
        .collect();
    let total_eligible = eligible.len();

    for (index, (cluster, cluster_embeddings)) in eligible.into_iter().enumerate() {
        check_cancelled(&cancelled)?;
        let percent = 70 + ((25 * index) / total_eligible.max(1)) as u8;
        progress(percent, &format!("synthèse {}/{}", index + 1, total_eligible));

        let decision = decider
            .decide(cluster, cluster_embeddings, now)
            .await
            .map_err(|e| NewsloomError::Store(e.to_string()))?;

        let update_target: Option<Synthesis> = match decision {
            ContinuityDecision::Skip { existing_id } => {
                deps.sink.publish(ProgressEvent::log(
                    LogLevel::Info,
                    format!("Cluster {} ignoré: doublon de {existing_id}", cluster.id),
                ));
                continue;
            }
            ContinuityDecision::Update { target, .. } => Some(*target),
            ContinuityDecision::New => None,
        };

        let context = deps
            .context_builder
            .build(cluster, cluster_embeddings, update_target.as_ref(), now)
            .await;

        let mut synthesis = deps
            .generator
            .generate(cluster, &context, update_target.as_ref(), now)
            .await;

        // Persona pass: second styled generation gated by the quality scorer.
        let selected = deps.persona_selector.select(
            synthesis.category.as_deref(),
            synthesis.sentiment,
            synthesis.topic_intensity,
            &synthesis.title,
            &synthesis.key_entities,
        );
        let mut variant = None;
        if selected.id != persona::NEUTRAL.id {
            match deps.generator.restyle_with_persona(&synthesis, selected).await {
                Some(styled) => {
                    let text = format!(
                        "{} {} {} {}",
                        styled.title, styled.introduction, styled.body, styled.analysis
                    );
                    let quality = score_quality(&text, selected);
                    if quality_accepts(&quality, deps.config.persona.quality_threshold) {
                        variant = Some(styled);
                    } else {
                        info!(
                            persona = selected.id,
                            overall = quality.overall,
                            "Persona version below quality threshold, keeping neutral"
                        );
                        synthesis.quality_fallback = true;
                    }
                }
                None => {
                    synthesis.quality_fallback = true;
                }
            }
        }

        // Knowledge hub before persistence so ids land in the stored row.
        let vector = mean_pool(&cluster_embeddings.iter().collect::<Vec<_>>());
        if let Err(e) = deps.knowledge.process(&mut synthesis, &vector).await {
            warn!(error = %e, "Knowledge hub processing failed, continuing");
        }

        deps.persister
            .persist(&synthesis, variant.as_ref(), &vector)
            .await
            .map_err(|e| NewsloomError::Store(e.to_string()))?;

        if synthesis.update_count > 0 {
            summary.updates += 1;
        } else {
            summary.new_topics += 1;
        }
        summary.syntheses_written += 1;
    }

    Ok(())
}
