//! Topic assignment: a synthesis joins an existing topic when its vector is
//! close enough to the topic centroid. Anything below the threshold stays
//! unassigned and is left to the periodic topic-detection job.

use anyhow::Result;
use newsloom_store::{VectorStore, TOPICS};
use tracing::debug;
use uuid::Uuid;

const CENTROID_THRESHOLD: f32 = 0.70;

pub async fn assign_topic(store: &dyn VectorStore, vector: &[f32]) -> Result<Option<Uuid>> {
    if vector.is_empty() {
        return Ok(None);
    }
    let hits = store.query(TOPICS, vector, None, 1).await?;
    match hits.first() {
        Some(hit) if hit.score >= CENTROID_THRESHOLD => {
            let count = hit
                .point
                .payload
                .get("synthesis_count")
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            store
                .set_payload(
                    TOPICS,
                    hit.point.id,
                    serde_json::json!({"synthesis_count": count + 1}),
                )
                .await?;
            Ok(Some(hit.point.id))
        }
        Some(hit) => {
            debug!(score = hit.score, "Best topic centroid below threshold, leaving unassigned");
            Ok(None)
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use newsloom_store::{MemoryVectorStore, Point};

    async fn seed_topic(store: &MemoryVectorStore, vector: Vec<f32>) -> Uuid {
        let id = Uuid::new_v4();
        store
            .upsert(
                TOPICS,
                Point {
                    id,
                    vector,
                    payload: serde_json::json!({"label": "économie", "synthesis_count": 0}),
                },
            )
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn close_vector_joins_topic() {
        let store = MemoryVectorStore::new();
        let topic = seed_topic(&store, vec![1.0, 0.0]).await;
        let assigned = assign_topic(&store, &[0.95, 0.05]).await.unwrap();
        assert_eq!(assigned, Some(topic));
        let rows = store.retrieve(TOPICS, &[topic]).await.unwrap();
        assert_eq!(rows[0].payload["synthesis_count"], 1);
    }

    #[tokio::test]
    async fn distant_vector_stays_unassigned() {
        let store = MemoryVectorStore::new();
        seed_topic(&store, vec![1.0, 0.0]).await;
        let assigned = assign_topic(&store, &[0.0, 1.0]).await.unwrap();
        assert_eq!(assigned, None);
    }

    #[tokio::test]
    async fn no_topics_means_unassigned() {
        let store = MemoryVectorStore::new();
        assert_eq!(assign_topic(&store, &[1.0]).await.unwrap(), None);
    }
}
