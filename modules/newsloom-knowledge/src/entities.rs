//! Entity resolution: mention -> canonical entity id through a chain of
//! increasingly expensive matchers (cache, exact, alias table, edit
//! distance, embedding similarity), creating a new entity as a last resort.

use std::collections::HashMap;
use std::sync::Arc;

use ai_client::TextEmbedder;
use anyhow::Result;
use chrono::Utc;
use newsloom_store::{Point, VectorStore, ENTITIES};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

const LEVENSHTEIN_THRESHOLD: f64 = 0.85;
const EMBEDDING_THRESHOLD: f32 = 0.90;

/// Common French/English abbreviation -> canonical form.
const COMMON_ALIASES: &[(&str, &str)] = &[
    ("ue", "union européenne"),
    ("usa", "états-unis"),
    ("états unis", "états-unis"),
    ("ia", "intelligence artificielle"),
    ("onu", "nations unies"),
    ("bce", "banque centrale européenne"),
    ("uk", "royaume-uni"),
];

fn normalize_mention(mention: &str) -> String {
    mention.trim().to_lowercase()
}

pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Normalized edit similarity in [0, 1].
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

pub struct EntityResolver {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn TextEmbedder>,
    /// Resolved-mention cache for the process lifetime.
    cache: Mutex<HashMap<String, Uuid>>,
}

impl EntityResolver {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn TextEmbedder>) -> Self {
        Self {
            store,
            embedder,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve every mention of one synthesis, bumping mention counts.
    pub async fn resolve_mentions(&self, mentions: &[String]) -> Result<Vec<Uuid>> {
        let mut ids = Vec::new();
        for mention in mentions {
            let id = self.resolve(mention).await?;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// The resolution chain for a single mention.
    pub async fn resolve(&self, mention: &str) -> Result<Uuid> {
        let normalized = normalize_mention(mention);
        let canonical = COMMON_ALIASES
            .iter()
            .find(|(alias, _)| *alias == normalized)
            .map(|(_, canonical)| canonical.to_string())
            .unwrap_or_else(|| normalized.clone());

        // 1. Cache.
        {
            let cache = self.cache.lock().await;
            if let Some(id) = cache.get(&canonical) {
                let id = *id;
                drop(cache);
                self.bump_mentions(id).await?;
                return Ok(id);
            }
        }

        let existing = self.store.scroll(ENTITIES, None, usize::MAX, false).await?;

        // 2. Exact name or alias match.
        let exact = existing.iter().find(|point| {
            entity_names(&point.payload)
                .iter()
                .any(|name| *name == canonical)
        });
        if let Some(point) = exact {
            return self.remember(&canonical, point.id).await;
        }

        // 3. Edit-distance match.
        let fuzzy = existing
            .iter()
            .map(|point| {
                let best = entity_names(&point.payload)
                    .iter()
                    .map(|name| name_similarity(name, &canonical))
                    .fold(0.0f64, f64::max);
                (point, best)
            })
            .filter(|(_, sim)| *sim >= LEVENSHTEIN_THRESHOLD)
            .max_by(|a, b| a.1.total_cmp(&b.1));
        if let Some((point, sim)) = fuzzy {
            debug!(mention = %canonical, similarity = sim, "Entity matched by edit distance");
            let id = point.id;
            let alias_patch = serde_json::json!({"aliases": push_alias(&point.payload, &canonical)});
            self.store.set_payload(ENTITIES, id, alias_patch).await?;
            return self.remember(&canonical, id).await;
        }

        // 4. Embedding similarity.
        let vector = self.embedder.embed(&canonical).await?;
        let hits = self.store.query(ENTITIES, &vector, None, 1).await?;
        if let Some(hit) = hits.first() {
            if hit.score >= EMBEDDING_THRESHOLD {
                debug!(mention = %canonical, score = hit.score, "Entity matched by embedding");
                return self.remember(&canonical, hit.point.id).await;
            }
        }

        // 5. Create.
        let id = Uuid::new_v4();
        self.store
            .upsert(
                ENTITIES,
                Point {
                    id,
                    vector,
                    payload: serde_json::json!({
                        "name": canonical,
                        "aliases": [],
                        "mention_count": 0,
                        "co_occurrences": {},
                        "created_at": Utc::now().to_rfc3339(),
                    }),
                },
            )
            .await?;
        self.remember(&canonical, id).await
    }

    async fn remember(&self, canonical: &str, id: Uuid) -> Result<Uuid> {
        self.cache.lock().await.insert(canonical.to_string(), id);
        self.bump_mentions(id).await?;
        Ok(id)
    }

    async fn bump_mentions(&self, id: Uuid) -> Result<()> {
        let rows = self.store.retrieve(ENTITIES, &[id]).await?;
        if let Some(point) = rows.first() {
            let count = point
                .payload
                .get("mention_count")
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            self.store
                .set_payload(ENTITIES, id, serde_json::json!({"mention_count": count + 1}))
                .await?;
        }
        Ok(())
    }

    /// Record pairwise co-occurrence counts for the entities of one synthesis.
    pub async fn record_co_occurrences(&self, ids: &[Uuid]) -> Result<()> {
        for &id in ids {
            let rows = self.store.retrieve(ENTITIES, &[id]).await?;
            let Some(point) = rows.first() else { continue };
            let mut co: HashMap<String, u64> = point
                .payload
                .get("co_occurrences")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default();
            for &other in ids {
                if other != id {
                    *co.entry(other.to_string()).or_insert(0) += 1;
                }
            }
            self.store
                .set_payload(
                    ENTITIES,
                    id,
                    serde_json::json!({"co_occurrences": co}),
                )
                .await?;
        }
        Ok(())
    }
}

fn entity_names(payload: &serde_json::Value) -> Vec<String> {
    let mut names = Vec::new();
    if let Some(name) = payload.get("name").and_then(|v| v.as_str()) {
        names.push(name.to_string());
    }
    if let Some(aliases) = payload.get("aliases").and_then(|v| v.as_array()) {
        names.extend(aliases.iter().filter_map(|a| a.as_str().map(String::from)));
    }
    names
}

fn push_alias(payload: &serde_json::Value, alias: &str) -> Vec<String> {
    let mut aliases = entity_names(payload);
    aliases.retain(|a| a != alias);
    aliases.remove(0); // the canonical name stays in its own field
    aliases.push(alias.to_string());
    aliases
}
