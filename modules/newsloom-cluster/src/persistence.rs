//! Selects which past syntheses join the clustering space. Recent stories
//! always come back; older ones must have earned persistence through
//! updates and longevity.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use newsloom_common::config::ClusterConfig;
use newsloom_common::{PastSynthesis, Synthesis};
use newsloom_store::{Condition, Filter, VectorStore, SYNTHESES};
use tracing::{debug, info};

/// Persistence score: update activity weighs double, a fresh update adds 5,
/// a story spanning more than a week adds 3.
pub fn persistence_score(synthesis: &Synthesis, now: DateTime<Utc>) -> f64 {
    let mut score = synthesis.update_count as f64 * 2.0;
    let last_activity = synthesis.last_updated_at.unwrap_or(synthesis.created_at);
    if now - last_activity <= Duration::days(3) {
        score += 5.0;
    }
    if last_activity - synthesis.first_seen > Duration::days(7) {
        score += 3.0;
    }
    score
}

pub struct PersistenceSelector {
    store: Arc<dyn VectorStore>,
    config: ClusterConfig,
}

impl PersistenceSelector {
    pub fn new(store: Arc<dyn VectorStore>, config: ClusterConfig) -> Self {
        Self { store, config }
    }

    /// Load candidate past syntheses (base rows only) with their vectors:
    /// everything from the last `persistence_recent_days` unconditionally,
    /// older ones when their score clears `persistence_min_score`. Capped
    /// and sorted by score descending.
    pub async fn select(&self, now: DateTime<Utc>) -> Result<Vec<PastSynthesis>> {
        let window_start = now - Duration::days(self.config.persistence_max_days);
        let filter = Filter::eq("is_persona_version", false)
            .and(Condition::DateGte("created_at".to_string(), window_start));

        let points = self
            .store
            .scroll(SYNTHESES, Some(&filter), usize::MAX, true)
            .await?;

        let recent_cutoff = now - Duration::days(self.config.persistence_recent_days);
        let mut scored: Vec<(f64, PastSynthesis)> = Vec::new();
        for point in points {
            let synthesis: Synthesis = match serde_json::from_value(point.payload.clone()) {
                Ok(s) => s,
                Err(e) => {
                    debug!(id = %point.id, error = %e, "Skipping unparseable synthesis payload");
                    continue;
                }
            };
            let score = persistence_score(&synthesis, now);
            let is_recent = synthesis.created_at >= recent_cutoff;
            if is_recent || score >= self.config.persistence_min_score {
                scored.push((
                    score,
                    PastSynthesis {
                        id: point.id,
                        vector: point.vector,
                        synthesis,
                    },
                ));
            }
        }

        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(self.config.max_past_syntheses);
        info!(selected = scored.len(), "Persistent syntheses selected");
        Ok(scored.into_iter().map(|(_, past)| past).collect())
    }
}
