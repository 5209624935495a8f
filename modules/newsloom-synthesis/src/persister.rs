//! Synthesis persistence: one upsert per row (base first, persona variant
//! second), then best-effort marking of the consumed articles across several
//! URL normalization strategies.

use std::sync::Arc;

use anyhow::Result;
use newsloom_common::{normalize_url, Synthesis};
use newsloom_store::{Point, VectorStore, ARTICLES, SYNTHESES};
use tracing::{debug, info};

pub struct SynthesisPersister {
    store: Arc<dyn VectorStore>,
}

impl SynthesisPersister {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self { store }
    }

    /// Upsert the base synthesis (reusing its id in update mode), then the
    /// accepted persona variant if any, then mark the consumed articles.
    pub async fn persist(
        &self,
        base: &Synthesis,
        variant: Option<&Synthesis>,
        vector: &[f32],
    ) -> Result<()> {
        self.upsert_row(base, vector).await?;
        if let Some(variant) = variant {
            self.upsert_row(variant, vector).await?;
        }
        let marked = self.mark_articles_used(base).await;
        info!(
            id = %base.id,
            variant = variant.map(|v| v.id.to_string()).unwrap_or_default(),
            articles_marked = marked,
            "Synthesis persisted"
        );
        Ok(())
    }

    async fn upsert_row(&self, synthesis: &Synthesis, vector: &[f32]) -> Result<()> {
        let payload = serde_json::to_value(synthesis)?;
        self.store
            .upsert(
                SYNTHESES,
                Point {
                    id: synthesis.id,
                    vector: vector.to_vec(),
                    payload,
                },
            )
            .await
    }

    /// Best-effort `used_in_synthesis_id` marking. Tries several URL
    /// normalizations; a miss is logged at debug level and never rolls the
    /// synthesis back.
    pub async fn mark_articles_used(&self, synthesis: &Synthesis) -> usize {
        let stored = match self.store.scroll(ARTICLES, None, usize::MAX, false).await {
            Ok(points) => points,
            Err(e) => {
                debug!(error = %e, "Article scan failed, skipping usage marking");
                return 0;
            }
        };

        let mut marked = 0;
        for source in &synthesis.sources {
            let target_variants = url_variants(&source.url);
            let matched = stored.iter().find(|point| {
                point
                    .payload
                    .get("url")
                    .and_then(|v| v.as_str())
                    .map(|url| {
                        let stored_variants = url_variants(url);
                        target_variants.iter().any(|t| stored_variants.contains(t))
                    })
                    .unwrap_or(false)
            });
            match matched {
                Some(point) => {
                    let patch = serde_json::json!({
                        "used_in_synthesis_id": synthesis.id.to_string(),
                    });
                    if let Err(e) = self.store.set_payload(ARTICLES, point.id, patch).await {
                        debug!(url = %source.url, error = %e, "Failed to mark article as used");
                    } else {
                        marked += 1;
                    }
                }
                None => {
                    debug!(url = %source.url, "article not stored");
                }
            }
        }
        marked
    }
}

/// Normalization ladder used for article lookup: exact, lowercased without
/// trailing slash, percent-decoded, and domain+path only.
fn url_variants(url: &str) -> Vec<String> {
    let mut variants = vec![url.to_string()];
    let normalized = normalize_url(url);
    if !variants.contains(&normalized) {
        variants.push(normalized.clone());
    }
    if let Ok(decoded) = urlencoding::decode(&normalized) {
        let decoded = decoded.to_string();
        if !variants.contains(&decoded) {
            variants.push(decoded);
        }
    }
    if let Some(rest) = normalized.split("://").nth(1) {
        let domain_path = rest.to_string();
        if !variants.contains(&domain_path) {
            variants.push(domain_path);
        }
    }
    variants
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use newsloom_common::{
        CausalGraph, ModerationFlag, NarrativeArc, PersonaIdentity, Sentiment, SourceRef,
        TopicIntensity,
    };
    use newsloom_store::MemoryVectorStore;
    use uuid::Uuid;

    fn synthesis(urls: &[&str]) -> Synthesis {
        let now = Utc::now();
        Synthesis {
            id: Uuid::new_v4(),
            base_synthesis_id: None,
            title: "Titre".to_string(),
            introduction: "Intro".to_string(),
            body: "Corps".to_string(),
            analysis: "Analyse".to_string(),
            key_points: vec!["p".to_string()],
            sources: urls
                .iter()
                .map(|u| SourceRef {
                    name: "A".to_string(),
                    url: u.to_string(),
                    title: "t".to_string(),
                })
                .collect(),
            num_sources: urls.len(),
            cluster_id: 0,
            compliance_score: 1.0,
            reading_time_minutes: 1,
            created_at: now,
            narrative_arc: NarrativeArc::Emerging,
            timeline: Vec::new(),
            has_contradictions: false,
            contradictions_count: 0,
            key_entities: Vec::new(),
            causal_graph: CausalGraph::default(),
            category: None,
            category_confidence: 0.0,
            sentiment: Sentiment::Neutral,
            topic_intensity: TopicIntensity::Standard,
            persona: PersonaIdentity::default(),
            is_persona_version: false,
            quality_fallback: false,
            update_count: 0,
            first_seen: now,
            last_updated_at: None,
            update_notice: None,
            parent_synthesis_id: None,
            story_id: "s".to_string(),
            is_published: true,
            moderation_flag: ModerationFlag::Safe,
            generation_cost_usd: 0.0,
            enrichment_status: String::new(),
            entity_ids: Vec::new(),
            topic_id: None,
        }
    }

    async fn seed_article(store: &MemoryVectorStore, url: &str) -> Uuid {
        let id = Uuid::new_v4();
        store
            .upsert(
                ARTICLES,
                Point {
                    id,
                    vector: vec![1.0],
                    payload: serde_json::json!({"url": url, "used_in_synthesis_id": ""}),
                },
            )
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn persists_base_and_variant_rows() {
        let store = Arc::new(MemoryVectorStore::new());
        let persister = SynthesisPersister::new(store.clone());
        let base = synthesis(&["https://a.fr/1"]);
        let mut variant = base.clone();
        variant.id = Uuid::new_v4();
        variant.base_synthesis_id = Some(base.id);
        variant.is_persona_version = true;

        persister.persist(&base, Some(&variant), &[1.0, 0.0]).await.unwrap();
        assert_eq!(store.len(SYNTHESES).await, 2);
        let rows = store.retrieve(SYNTHESES, &[variant.id]).await.unwrap();
        assert_eq!(rows[0].payload["base_synthesis_id"], base.id.to_string());
    }

    #[tokio::test]
    async fn upsert_reuses_id_in_update_mode() {
        let store = Arc::new(MemoryVectorStore::new());
        let persister = SynthesisPersister::new(store.clone());
        let mut s = synthesis(&["https://a.fr/1"]);
        persister.persist(&s, None, &[1.0]).await.unwrap();
        s.update_count = 1;
        persister.persist(&s, None, &[1.0]).await.unwrap();
        assert_eq!(store.len(SYNTHESES).await, 1);
        let rows = store.retrieve(SYNTHESES, &[s.id]).await.unwrap();
        assert_eq!(rows[0].payload["update_count"], 1);
    }

    #[tokio::test]
    async fn marks_articles_across_normalizations() {
        let store = Arc::new(MemoryVectorStore::new());
        let exact = seed_article(&store, "https://a.fr/exact").await;
        let cased = seed_article(&store, "https://A.fr/Case/").await;
        let encoded = seed_article(&store, "https://a.fr/d%C3%A9cision").await;
        let persister = SynthesisPersister::new(store.clone());

        let s = synthesis(&[
            "https://a.fr/exact",
            "https://a.fr/case",
            "https://a.fr/décision",
        ]);
        persister.persist(&s, None, &[1.0]).await.unwrap();

        for id in [exact, cased, encoded] {
            let rows = store.retrieve(ARTICLES, &[id]).await.unwrap();
            assert_eq!(
                rows[0].payload["used_in_synthesis_id"],
                s.id.to_string(),
                "article {id} should be marked"
            );
        }
    }

    #[tokio::test]
    async fn missing_article_does_not_fail_persist() {
        let store = Arc::new(MemoryVectorStore::new());
        let persister = SynthesisPersister::new(store.clone());
        let s = synthesis(&["https://a.fr/jamais-stocke"]);
        persister.persist(&s, None, &[1.0]).await.unwrap();
        assert_eq!(store.len(SYNTHESES).await, 1);
    }
}
