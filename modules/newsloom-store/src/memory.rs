//! In-memory store implementations. Used by every test and as the degraded
//! fallback when the real backends are unreachable.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{cosine_similarity, Filter, KvStore, Point, ScoredPoint, VectorStore};

// --- Vector store ---

#[derive(Default)]
pub struct MemoryVectorStore {
    collections: RwLock<HashMap<String, HashMap<Uuid, Point>>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.len())
            .unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, collection: &str, point: Point) -> Result<()> {
        let mut cols = self.collections.write().await;
        cols.entry(collection.to_string())
            .or_default()
            .insert(point.id, point);
        Ok(())
    }

    async fn retrieve(&self, collection: &str, ids: &[Uuid]) -> Result<Vec<Point>> {
        let cols = self.collections.read().await;
        let col = match cols.get(collection) {
            Some(c) => c,
            None => return Ok(Vec::new()),
        };
        Ok(ids.iter().filter_map(|id| col.get(id).cloned()).collect())
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: Option<&Filter>,
        limit: usize,
        with_vector: bool,
    ) -> Result<Vec<Point>> {
        let cols = self.collections.read().await;
        let col = match cols.get(collection) {
            Some(c) => c,
            None => return Ok(Vec::new()),
        };
        let mut out: Vec<Point> = col
            .values()
            .filter(|p| filter.map(|f| f.matches(&p.payload)).unwrap_or(true))
            .take(limit)
            .cloned()
            .collect();
        if !with_vector {
            for p in &mut out {
                p.vector.clear();
            }
        }
        Ok(out)
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        filter: Option<&Filter>,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>> {
        let cols = self.collections.read().await;
        let col = match cols.get(collection) {
            Some(c) => c,
            None => return Ok(Vec::new()),
        };
        let mut scored: Vec<ScoredPoint> = col
            .values()
            .filter(|p| filter.map(|f| f.matches(&p.payload)).unwrap_or(true))
            .map(|p| ScoredPoint {
                score: cosine_similarity(vector, &p.vector),
                point: p.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn set_payload(
        &self,
        collection: &str,
        id: Uuid,
        partial: serde_json::Value,
    ) -> Result<()> {
        let mut cols = self.collections.write().await;
        let col = cols.entry(collection.to_string()).or_default();
        if let Some(point) = col.get_mut(&id) {
            if let (Some(obj), Some(patch)) = (point.payload.as_object_mut(), partial.as_object()) {
                for (k, v) in patch {
                    obj.insert(k.clone(), v.clone());
                }
            }
        }
        Ok(())
    }
}

// --- Key-value store ---

#[derive(Default)]
struct KvInner {
    values: HashMap<String, (String, Option<Instant>)>,
    sets: HashMap<String, HashSet<String>>,
}

impl KvInner {
    fn live(&mut self, key: &str) -> Option<&String> {
        if let Some((_, Some(expiry))) = self.values.get(key) {
            if *expiry <= Instant::now() {
                self.values.remove(key);
                return None;
            }
        }
        self.values.get(key).map(|(v, _)| v)
    }
}

#[derive(Default)]
pub struct MemoryKvStore {
    inner: RwLock<KvInner>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut inner = self.inner.write().await;
        Ok(inner.live(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.values.insert(key.to_string(), (value.to_string(), None));
        Ok(())
    }

    async fn set_nx_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let mut inner = self.inner.write().await;
        if inner.live(key).is_some() {
            return Ok(false);
        }
        let expiry = Instant::now() + Duration::from_secs(ttl_secs);
        inner
            .values
            .insert(key.to_string(), (value.to_string(), Some(expiry)));
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.values.remove(key);
        Ok(())
    }

    async fn compare_and_del(&self, key: &str, expected: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        if inner.live(key).map(|v| v == expected).unwrap_or(false) {
            inner.values.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn set_add(&self, set: &str, member: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .sets
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, set: &str, member: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(s) = inner.sets.get_mut(set) {
            s.remove(member);
        }
        Ok(())
    }

    async fn set_members(&self, set: &str) -> Result<Vec<String>> {
        let inner = self.inner.read().await;
        let mut members: Vec<String> = inner
            .sets
            .get(set)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Condition;

    fn point(id: Uuid, vector: Vec<f32>, payload: serde_json::Value) -> Point {
        Point { id, vector, payload }
    }

    #[tokio::test]
    async fn upsert_overwrites_same_id() {
        let store = MemoryVectorStore::new();
        let id = Uuid::new_v4();
        store
            .upsert("syntheses", point(id, vec![1.0], serde_json::json!({"v": 1})))
            .await
            .unwrap();
        store
            .upsert("syntheses", point(id, vec![1.0], serde_json::json!({"v": 2})))
            .await
            .unwrap();
        assert_eq!(store.len("syntheses").await, 1);
        let got = store.retrieve("syntheses", &[id]).await.unwrap();
        assert_eq!(got[0].payload["v"], 2);
    }

    #[tokio::test]
    async fn query_orders_by_similarity() {
        let store = MemoryVectorStore::new();
        let near = Uuid::new_v4();
        let far = Uuid::new_v4();
        store
            .upsert("articles", point(near, vec![1.0, 0.0], serde_json::json!({})))
            .await
            .unwrap();
        store
            .upsert("articles", point(far, vec![0.0, 1.0], serde_json::json!({})))
            .await
            .unwrap();
        let hits = store.query("articles", &[1.0, 0.1], None, 2).await.unwrap();
        assert_eq!(hits[0].point.id, near);
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn scroll_applies_filter_and_strips_vectors() {
        let store = MemoryVectorStore::new();
        store
            .upsert(
                "articles",
                point(Uuid::new_v4(), vec![1.0], serde_json::json!({"used_in_synthesis_id": ""})),
            )
            .await
            .unwrap();
        store
            .upsert(
                "articles",
                point(Uuid::new_v4(), vec![1.0], serde_json::json!({"used_in_synthesis_id": "x"})),
            )
            .await
            .unwrap();
        let filter = Filter::default().and(Condition::Empty("used_in_synthesis_id".to_string()));
        let got = store.scroll("articles", Some(&filter), 10, false).await.unwrap();
        assert_eq!(got.len(), 1);
        assert!(got[0].vector.is_empty());
    }

    #[tokio::test]
    async fn set_payload_merges_shallowly() {
        let store = MemoryVectorStore::new();
        let id = Uuid::new_v4();
        store
            .upsert("articles", point(id, vec![], serde_json::json!({"a": 1, "b": 2})))
            .await
            .unwrap();
        store
            .set_payload("articles", id, serde_json::json!({"b": 3, "c": 4}))
            .await
            .unwrap();
        let got = store.retrieve("articles", &[id]).await.unwrap();
        assert_eq!(got[0].payload, serde_json::json!({"a": 1, "b": 3, "c": 4}));
    }

    #[tokio::test]
    async fn kv_set_nx_is_exclusive() {
        let kv = MemoryKvStore::new();
        assert!(kv.set_nx_ttl("lock", "a", 60).await.unwrap());
        assert!(!kv.set_nx_ttl("lock", "b", 60).await.unwrap());
        assert!(!kv.compare_and_del("lock", "b").await.unwrap());
        assert!(kv.compare_and_del("lock", "a").await.unwrap());
        assert!(kv.set_nx_ttl("lock", "b", 60).await.unwrap());
    }

    #[tokio::test]
    async fn kv_ttl_expires() {
        let kv = MemoryKvStore::new();
        assert!(kv.set_nx_ttl("lock", "a", 0).await.unwrap());
        // ttl of zero seconds is already expired
        assert_eq!(kv.get("lock").await.unwrap(), None);
        assert!(kv.set_nx_ttl("lock", "b", 60).await.unwrap());
    }

    #[tokio::test]
    async fn kv_sets_sorted_members() {
        let kv = MemoryKvStore::new();
        kv.set_add("blacklist", "b.com").await.unwrap();
        kv.set_add("blacklist", "a.com").await.unwrap();
        kv.set_add("blacklist", "a.com").await.unwrap();
        assert_eq!(kv.set_members("blacklist").await.unwrap(), vec!["a.com", "b.com"]);
        kv.set_remove("blacklist", "a.com").await.unwrap();
        assert_eq!(kv.set_members("blacklist").await.unwrap(), vec!["b.com"]);
    }
}
