//! Knowledge hub hook: entity resolution to canonical ids, topic assignment
//! by centroid similarity, and per-topic causal-graph aggregation.

pub mod causal;
pub mod entities;
pub mod topics;

use std::sync::Arc;

use ai_client::TextEmbedder;
use anyhow::Result;
use newsloom_common::Synthesis;
use newsloom_store::VectorStore;
use tracing::info;

pub use entities::EntityResolver;

pub struct KnowledgeHub {
    resolver: EntityResolver,
    store: Arc<dyn VectorStore>,
}

impl KnowledgeHub {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn TextEmbedder>) -> Self {
        Self {
            resolver: EntityResolver::new(store.clone(), embedder),
            store,
        }
    }

    /// Post-persist hook for one synthesis: resolve entity mentions, record
    /// co-occurrences, assign a topic, fold the causal edges into it.
    pub async fn process(&self, synthesis: &mut Synthesis, vector: &[f32]) -> Result<()> {
        let entity_ids = self.resolver.resolve_mentions(&synthesis.key_entities).await?;
        self.resolver.record_co_occurrences(&entity_ids).await?;
        synthesis.entity_ids = entity_ids;

        synthesis.topic_id = topics::assign_topic(self.store.as_ref(), vector).await?;
        if let Some(topic_id) = synthesis.topic_id {
            causal::aggregate_into_topic(self.store.as_ref(), topic_id, &synthesis.causal_graph)
                .await?;
        }

        info!(
            synthesis = %synthesis.id,
            entities = synthesis.entity_ids.len(),
            topic = ?synthesis.topic_id,
            "Knowledge hub updated"
        );
        Ok(())
    }
}
