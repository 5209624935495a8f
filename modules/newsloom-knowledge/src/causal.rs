//! Per-topic causal-graph aggregation: each synthesis's validated edges are
//! folded into the topic's graph with frequency weights; the most connected
//! node becomes the central entity.

use std::collections::HashMap;

use anyhow::Result;
use newsloom_common::CausalGraph;
use newsloom_store::{VectorStore, TOPICS};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AggregatedGraph {
    #[serde(default)]
    pub edges: Vec<AggregatedEdge>,
    #[serde(default)]
    pub central_entity: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedEdge {
    pub cause: String,
    pub effect: String,
    pub relation: String,
    /// How many syntheses asserted this edge.
    pub frequency: u64,
}

pub async fn aggregate_into_topic(
    store: &dyn VectorStore,
    topic_id: Uuid,
    graph: &CausalGraph,
) -> Result<()> {
    if graph.edges.is_empty() {
        return Ok(());
    }
    let rows = store.retrieve(TOPICS, &[topic_id]).await?;
    let Some(point) = rows.first() else {
        return Ok(());
    };
    let mut aggregated: AggregatedGraph = point
        .payload
        .get("causal_graph")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();

    for edge in &graph.edges {
        let relation = serde_json::to_value(edge.relation)?
            .as_str()
            .unwrap_or("causes")
            .to_string();
        match aggregated.edges.iter_mut().find(|e| {
            e.cause.eq_ignore_ascii_case(&edge.cause)
                && e.effect.eq_ignore_ascii_case(&edge.effect)
                && e.relation == relation
        }) {
            Some(existing) => existing.frequency += 1,
            None => aggregated.edges.push(AggregatedEdge {
                cause: edge.cause.clone(),
                effect: edge.effect.clone(),
                relation,
                frequency: 1,
            }),
        }
    }

    // Central entity: highest weighted degree across the aggregate.
    let mut degree: HashMap<&str, u64> = HashMap::new();
    for edge in &aggregated.edges {
        *degree.entry(edge.cause.as_str()).or_insert(0) += edge.frequency;
        *degree.entry(edge.effect.as_str()).or_insert(0) += edge.frequency;
    }
    aggregated.central_entity = degree
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(node, _)| node.to_string());

    store
        .set_payload(
            TOPICS,
            topic_id,
            serde_json::json!({"causal_graph": serde_json::to_value(&aggregated)?}),
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use newsloom_common::{CausalEdge, CausalRelation};
    use newsloom_store::{MemoryVectorStore, Point};

    fn edge(cause: &str, effect: &str) -> CausalEdge {
        CausalEdge {
            cause: cause.to_string(),
            effect: effect.to_string(),
            relation: CausalRelation::Causes,
            sources: Vec::new(),
        }
    }

    async fn topic(store: &MemoryVectorStore) -> Uuid {
        let id = Uuid::new_v4();
        store
            .upsert(
                TOPICS,
                Point {
                    id,
                    vector: vec![1.0],
                    payload: serde_json::json!({"label": "énergie"}),
                },
            )
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn repeated_edges_gain_frequency() {
        let store = MemoryVectorStore::new();
        let topic_id = topic(&store).await;
        let graph = CausalGraph {
            edges: vec![edge("sécheresse", "baisse des récoltes")],
            ..Default::default()
        };
        aggregate_into_topic(&store, topic_id, &graph).await.unwrap();
        aggregate_into_topic(&store, topic_id, &graph).await.unwrap();

        let rows = store.retrieve(TOPICS, &[topic_id]).await.unwrap();
        let aggregated: AggregatedGraph =
            serde_json::from_value(rows[0].payload["causal_graph"].clone()).unwrap();
        assert_eq!(aggregated.edges.len(), 1);
        assert_eq!(aggregated.edges[0].frequency, 2);
    }

    #[tokio::test]
    async fn central_entity_is_highest_degree_node() {
        let store = MemoryVectorStore::new();
        let topic_id = topic(&store).await;
        let graph = CausalGraph {
            edges: vec![
                edge("sécheresse", "baisse des récoltes"),
                edge("sécheresse", "hausse des prix"),
            ],
            ..Default::default()
        };
        aggregate_into_topic(&store, topic_id, &graph).await.unwrap();
        let rows = store.retrieve(TOPICS, &[topic_id]).await.unwrap();
        let aggregated: AggregatedGraph =
            serde_json::from_value(rows[0].payload["causal_graph"].clone()).unwrap();
        assert_eq!(aggregated.central_entity.as_deref(), Some("sécheresse"));
    }

    #[tokio::test]
    async fn empty_graph_is_a_no_op() {
        let store = MemoryVectorStore::new();
        let topic_id = topic(&store).await;
        aggregate_into_topic(&store, topic_id, &CausalGraph::default())
            .await
            .unwrap();
        let rows = store.retrieve(TOPICS, &[topic_id]).await.unwrap();
        assert!(rows[0].payload.get("causal_graph").is_none());
    }
}
