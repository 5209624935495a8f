//! Domain -> Source catalog. Single source of truth consulted by the scraper.
//! Loaded at startup from the static catalog; mutated only by discovery.

use std::collections::HashMap;

use newsloom_common::Source;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct SourceFilter {
    pub category: Option<String>,
    pub language: Option<String>,
    pub tier: Option<u8>,
}

pub struct SourceRegistry {
    inner: RwLock<HashMap<String, Source>>,
}

impl SourceRegistry {
    pub fn new(seed: Vec<Source>) -> Self {
        let mut map = HashMap::new();
        for source in seed {
            map.insert(source.domain.clone(), source);
        }
        Self {
            inner: RwLock::new(map),
        }
    }

    /// Registry seeded with the compiled-in catalog.
    pub fn with_defaults() -> Self {
        Self::new(crate::catalog::default_catalog())
    }

    pub async fn get(&self, domain: &str) -> Option<Source> {
        self.inner.read().await.get(domain).cloned()
    }

    pub async fn domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self.inner.read().await.keys().cloned().collect();
        domains.sort();
        domains
    }

    pub async fn list(&self, filter: &SourceFilter) -> Vec<Source> {
        let inner = self.inner.read().await;
        let mut sources: Vec<Source> = inner
            .values()
            .filter(|s| {
                filter
                    .category
                    .as_deref()
                    .map(|c| s.category.as_deref() == Some(c))
                    .unwrap_or(true)
                    && filter
                        .language
                        .as_deref()
                        .map(|l| s.language == l)
                        .unwrap_or(true)
                    && filter.tier.map(|t| s.tier == t).unwrap_or(true)
            })
            .cloned()
            .collect();
        sources.sort_by(|a, b| a.domain.cmp(&b.domain));
        sources
    }

    /// Insert or replace. Domain uniqueness is the map key.
    pub async fn add(&self, source: Source) {
        info!(domain = %source.domain, auto_discovered = source.auto_discovered, "Registering source");
        self.inner
            .write()
            .await
            .insert(source.domain.clone(), source);
    }

    pub async fn remove(&self, domain: &str) -> Option<Source> {
        self.inner.write().await.remove(domain)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}
