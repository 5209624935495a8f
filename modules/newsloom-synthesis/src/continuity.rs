//! Story-continuation decision, run per cluster before generation: reuse an
//! existing synthesis (update), drop the cluster (pure duplicate), or start
//! a new story. This is what makes re-runs idempotent inside the window.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use newsloom_common::config::ContinuityConfig;
use newsloom_common::{normalize_url, Cluster, Synthesis};
use newsloom_store::{Condition, Filter, VectorStore, SYNTHESES};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum ContinuityDecision {
    /// No related synthesis in the window: create a new story.
    New,
    /// Reuse the target synthesis id and fold in the new URLs.
    Update {
        target: Box<Synthesis>,
        new_urls: Vec<String>,
    },
    /// Same story, no new information: generate nothing.
    Skip { existing_id: Uuid },
}

pub struct ContinuityDecider {
    store: Arc<dyn VectorStore>,
    config: ContinuityConfig,
}

impl ContinuityDecider {
    pub fn new(store: Arc<dyn VectorStore>, config: ContinuityConfig) -> Self {
        Self { store, config }
    }

    /// Decide the fate of one cluster. Stable for identical inputs within
    /// the lookback window.
    pub async fn decide(
        &self,
        cluster: &Cluster,
        cluster_embeddings: &[Vec<f32>],
        now: DateTime<Utc>,
    ) -> Result<ContinuityDecision> {
        let cluster_urls: HashSet<String> = cluster.urls().into_iter().collect();
        if cluster_urls.is_empty() {
            return Ok(ContinuityDecision::New);
        }

        let recent = self.recent_base_syntheses(now).await?;

        // Step 1: URL-overlap test.
        for candidate in &recent {
            let candidate_urls: HashSet<String> = candidate
                .sources
                .iter()
                .map(|s| normalize_url(&s.url))
                .collect();
            if candidate_urls.is_empty() {
                continue;
            }
            let intersection = cluster_urls.intersection(&candidate_urls).count();
            let union = cluster_urls.union(&candidate_urls).count();
            let jaccard = intersection as f64 / union as f64;
            if jaccard >= self.config.url_overlap_threshold {
                return Ok(self.classify_against(candidate, &cluster_urls, &candidate_urls, "url"));
            }
        }

        // Step 2: embedding-similarity test on the mean-pooled cluster.
        if let Some(mean) = mean_pool(cluster_embeddings) {
            let filter = self.recent_base_filter(now);
            let hits = self
                .store
                .query(SYNTHESES, &mean, Some(&filter), 3)
                .await?;
            for hit in hits {
                if hit.score < self.config.embedding_threshold {
                    break;
                }
                let Ok(candidate) = serde_json::from_value::<Synthesis>(hit.point.payload.clone())
                else {
                    continue;
                };
                let candidate_urls: HashSet<String> = candidate
                    .sources
                    .iter()
                    .map(|s| normalize_url(&s.url))
                    .collect();
                return Ok(self.classify_against(
                    &candidate,
                    &cluster_urls,
                    &candidate_urls,
                    "embedding",
                ));
            }
        }

        Ok(ContinuityDecision::New)
    }

    /// Shared branching for both tests: new URLs mean an update, a fully
    /// covered cluster is a duplicate.
    fn classify_against(
        &self,
        candidate: &Synthesis,
        cluster_urls: &HashSet<String>,
        candidate_urls: &HashSet<String>,
        matched_by: &str,
    ) -> ContinuityDecision {
        let new_urls: Vec<String> = cluster_urls
            .difference(candidate_urls)
            .cloned()
            .collect();
        if new_urls.is_empty() {
            info!(
                synthesis_id = %candidate.id,
                matched_by,
                "Cluster is a pure duplicate, skipping"
            );
            ContinuityDecision::Skip {
                existing_id: candidate.id,
            }
        } else {
            info!(
                synthesis_id = %candidate.id,
                matched_by,
                new_urls = new_urls.len(),
                "Cluster continues an existing story, switching to update mode"
            );
            ContinuityDecision::Update {
                target: Box::new(candidate.clone()),
                new_urls,
            }
        }
    }

    fn recent_base_filter(&self, now: DateTime<Utc>) -> Filter {
        let cutoff = now - Duration::hours(self.config.lookback_hours);
        Filter::eq("is_persona_version", false)
            .and(Condition::DateGte("created_at".to_string(), cutoff))
    }

    async fn recent_base_syntheses(&self, now: DateTime<Utc>) -> Result<Vec<Synthesis>> {
        let filter = self.recent_base_filter(now);
        let points = self
            .store
            .scroll(SYNTHESES, Some(&filter), usize::MAX, false)
            .await?;
        let mut syntheses = Vec::new();
        for point in points {
            match serde_json::from_value::<Synthesis>(point.payload.clone()) {
                Ok(s) => syntheses.push(s),
                Err(e) => debug!(id = %point.id, error = %e, "Unparseable synthesis payload"),
            }
        }
        Ok(syntheses)
    }
}

fn mean_pool(embeddings: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = embeddings.first()?;
    let dim = first.len();
    let mut mean = vec![0.0f32; dim];
    for embedding in embeddings {
        for (slot, value) in mean.iter_mut().zip(embedding.iter()) {
            *slot += value;
        }
    }
    let n = embeddings.len() as f32;
    for slot in &mut mean {
        *slot /= n;
    }
    Some(mean)
}
