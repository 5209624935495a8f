//! Source health bookkeeping with two durable layers: the fast key-value
//! store is primary, a JSON snapshot on disk is the fallback. Reads are
//! served from memory; mutations go through the actor mutex and mirror to
//! both layers (KV immediately, snapshot at most every 60 s).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, Utc};
use newsloom_common::{SourceHealth, SourceStatus};
use newsloom_store::KvStore;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const HEALTH_KEY_PREFIX: &str = "sources:health:";
const BLACKLIST_SET: &str = "sources:blacklist";
const DISCOVERED_SET: &str = "sources:discovered";
const KNOWN_SET: &str = "sources:known";
const SNAPSHOT_INTERVAL_SECS: u64 = 60;

/// Disk snapshot layout. Additive fields only; readers tolerate unknown keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub sources: HashMap<String, SourceHealth>,
    #[serde(default)]
    pub blacklist: Vec<String>,
}

/// Categorized buckets used by operator tooling.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HealthReport {
    pub healthy: Vec<String>,
    pub degraded: Vec<String>,
    pub blocked: Vec<String>,
    pub blacklisted: Vec<String>,
    pub discovered: Vec<String>,
    pub total: usize,
}

struct HealthState {
    sources: HashMap<String, SourceHealth>,
    /// domain -> reason
    blacklist: HashMap<String, String>,
    last_snapshot: Option<Instant>,
    kv_available: bool,
}

pub struct HealthStore {
    kv: Arc<dyn KvStore>,
    snapshot_path: PathBuf,
    state: Mutex<HealthState>,
}

impl HealthStore {
    pub fn new(kv: Arc<dyn KvStore>, snapshot_path: PathBuf) -> Self {
        Self {
            kv,
            snapshot_path,
            state: Mutex::new(HealthState {
                sources: HashMap::new(),
                blacklist: HashMap::new(),
                last_snapshot: None,
                kv_available: true,
            }),
        }
    }

    /// Load persisted state. The KV store wins when reachable; the snapshot
    /// is the fallback. Neither being available starts empty with a warning.
    pub async fn load(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        match self.load_from_kv().await {
            Ok((sources, blacklist)) => {
                info!(
                    sources = sources.len(),
                    blacklisted = blacklist.len(),
                    "Source health loaded from KV store"
                );
                state.sources = sources;
                state.blacklist = blacklist;
                state.kv_available = true;
            }
            Err(e) => {
                warn!(error = %e, "KV store unreachable, falling back to snapshot");
                state.kv_available = false;
                match self.load_snapshot().await {
                    Ok(snapshot) => {
                        info!(
                            sources = snapshot.sources.len(),
                            "Source health loaded from disk snapshot"
                        );
                        state.blacklist = snapshot
                            .blacklist
                            .into_iter()
                            .map(|d| (d, "from snapshot".to_string()))
                            .collect();
                        state.sources = snapshot.sources;
                    }
                    Err(e) => {
                        warn!(error = %e, "No usable snapshot, starting with empty health state");
                    }
                }
            }
        }
        Ok(())
    }

    async fn load_from_kv(&self) -> Result<(HashMap<String, SourceHealth>, HashMap<String, String>)> {
        let mut sources = HashMap::new();
        for domain in self.kv.set_members(KNOWN_SET).await? {
            if let Some(raw) = self.kv.get(&format!("{HEALTH_KEY_PREFIX}{domain}")).await? {
                match serde_json::from_str::<SourceHealth>(&raw) {
                    Ok(health) => {
                        sources.insert(domain, health);
                    }
                    Err(e) => debug!(domain, error = %e, "Skipping unparseable health entry"),
                }
            }
        }
        let blacklist = self
            .kv
            .set_members(BLACKLIST_SET)
            .await?
            .into_iter()
            .map(|d| (d, "from kv".to_string()))
            .collect();
        Ok((sources, blacklist))
    }

    async fn load_snapshot(&self) -> Result<HealthSnapshot> {
        let raw = tokio::fs::read_to_string(&self.snapshot_path).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub async fn get(&self, domain: &str) -> Option<SourceHealth> {
        self.state.lock().await.sources.get(domain).cloned()
    }

    pub async fn record_success(&self, domain: &str) {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let health = state
            .sources
            .entry(domain.to_string())
            .or_insert_with(|| SourceHealth::new(domain));
        health.record_success(now);
        health.consecutive_empty_runs = 0;
        let health = health.clone();
        self.mirror(&mut state, health).await;
    }

    pub async fn record_failure(&self, domain: &str, error: &str) {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let health = state
            .sources
            .entry(domain.to_string())
            .or_insert_with(|| SourceHealth::new(domain));
        health.record_failure(error, now);
        let health = health.clone();
        self.mirror(&mut state, health).await;
    }

    /// Bump the empty-run counter and return the new value. Resets on any
    /// run that yields articles (via `record_success`).
    pub async fn record_empty_run(&self, domain: &str) -> u32 {
        let mut state = self.state.lock().await;
        let health = state
            .sources
            .entry(domain.to_string())
            .or_insert_with(|| SourceHealth::new(domain));
        health.consecutive_empty_runs += 1;
        let count = health.consecutive_empty_runs;
        let health = health.clone();
        self.mirror(&mut state, health).await;
        count
    }

    pub async fn blacklist(&self, domain: &str, reason: &str) {
        info!(domain, reason, "Blacklisting source");
        let mut state = self.state.lock().await;
        state
            .blacklist
            .insert(domain.to_string(), reason.to_string());
        let health = state
            .sources
            .entry(domain.to_string())
            .or_insert_with(|| SourceHealth::new(domain));
        health.status = SourceStatus::Blacklisted;
        health.last_error = Some(reason.to_string());
        let health = health.clone();
        if state.kv_available {
            let _ = self.kv.set_add(BLACKLIST_SET, domain).await;
        }
        self.mirror(&mut state, health).await;
    }

    pub async fn unblacklist(&self, domain: &str) {
        let mut state = self.state.lock().await;
        state.blacklist.remove(domain);
        if let Some(health) = state.sources.get_mut(domain) {
            if health.status == SourceStatus::Blacklisted {
                health.status = SourceStatus::Active;
            }
            let health = health.clone();
            if state.kv_available {
                let _ = self.kv.set_remove(BLACKLIST_SET, domain).await;
            }
            self.mirror(&mut state, health).await;
        } else if state.kv_available {
            let _ = self.kv.set_remove(BLACKLIST_SET, domain).await;
        }
    }

    pub async fn clear_blacklist(&self) {
        let domains: Vec<String> = {
            let state = self.state.lock().await;
            state.blacklist.keys().cloned().collect()
        };
        for domain in domains {
            self.unblacklist(&domain).await;
        }
    }

    pub async fn is_blacklisted(&self, domain: &str) -> bool {
        self.state.lock().await.blacklist.contains_key(domain)
    }

    pub async fn blacklist_entries(&self) -> Vec<(String, String)> {
        let state = self.state.lock().await;
        let mut entries: Vec<(String, String)> = state
            .blacklist
            .iter()
            .map(|(d, r)| (d.clone(), r.clone()))
            .collect();
        entries.sort();
        entries
    }

    /// Record a freshly discovered source with status `discovered` and the
    /// replacement link back to the domain it stands in for.
    pub async fn save_discovered(&self, domain: &str, discovered_by: &str, replaces: Option<&str>) {
        let mut state = self.state.lock().await;
        let mut health = SourceHealth::new(domain);
        health.status = SourceStatus::Discovered;
        health.discovered_by = Some(discovered_by.to_string());
        health.replaces_domain = replaces.map(|d| d.to_string());
        state.sources.insert(domain.to_string(), health.clone());
        if state.kv_available {
            let _ = self.kv.set_add(DISCOVERED_SET, domain).await;
        }
        self.mirror(&mut state, health).await;
    }

    pub async fn discovered_count(&self) -> usize {
        let state = self.state.lock().await;
        state
            .sources
            .values()
            .filter(|h| h.status == SourceStatus::Discovered)
            .count()
    }

    pub async fn health_report(&self) -> HealthReport {
        let state = self.state.lock().await;
        let mut report = HealthReport {
            total: state.sources.len(),
            ..Default::default()
        };
        for (domain, health) in &state.sources {
            let bucket = match health.status {
                SourceStatus::Active => &mut report.healthy,
                SourceStatus::Degraded => &mut report.degraded,
                SourceStatus::Blocked => &mut report.blocked,
                SourceStatus::Blacklisted => &mut report.blacklisted,
                SourceStatus::Discovered => &mut report.discovered,
            };
            bucket.push(domain.clone());
        }
        report.healthy.sort();
        report.degraded.sort();
        report.blocked.sort();
        report.blacklisted.sort();
        report.discovered.sort();
        report
    }

    /// Write the snapshot regardless of the coalescing interval. Called on
    /// clean shutdown and at the end of each run.
    pub async fn flush(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.write_snapshot(&state).await?;
        state.last_snapshot = Some(Instant::now());
        Ok(())
    }

    /// Mirror one mutated entry to the KV store and maybe the snapshot.
    /// KV write failures demote to local-only mode with a warning.
    async fn mirror(&self, state: &mut HealthState, health: SourceHealth) {
        if state.kv_available {
            let key = format!("{HEALTH_KEY_PREFIX}{}", health.domain);
            let payload = match serde_json::to_string(&health) {
                Ok(p) => p,
                Err(e) => {
                    debug!(error = %e, "Failed to serialize health entry");
                    return;
                }
            };
            let write = async {
                self.kv.set(&key, &payload).await?;
                self.kv.set_add(KNOWN_SET, &health.domain).await
            };
            if let Err(e) = write.await {
                warn!(error = %e, "KV store write failed, continuing with local state only");
                state.kv_available = false;
            }
        }

        let due = state
            .last_snapshot
            .map(|t| t.elapsed().as_secs() >= SNAPSHOT_INTERVAL_SECS)
            .unwrap_or(true);
        if due {
            if let Err(e) = self.write_snapshot(state).await {
                warn!(error = %e, "Snapshot write failed, keeping in-memory state only");
            }
            state.last_snapshot = Some(Instant::now());
        }
    }

    async fn write_snapshot(&self, state: &HealthState) -> Result<()> {
        let mut blacklist: Vec<String> = state.blacklist.keys().cloned().collect();
        blacklist.sort();
        let snapshot = HealthSnapshot {
            last_updated: Utc::now(),
            sources: state.sources.clone(),
            blacklist,
        };
        if let Some(parent) = self.snapshot_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(&snapshot)?;
        tokio::fs::write(&self.snapshot_path, json).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use newsloom_store::MemoryKvStore;

    fn temp_snapshot_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("newsloom-health-{name}-{}.json", std::process::id()))
    }

    fn store(name: &str) -> HealthStore {
        HealthStore::new(Arc::new(MemoryKvStore::new()), temp_snapshot_path(name))
    }

    #[tokio::test]
    async fn success_and_failure_update_counters() {
        let store = store("counters");
        store.record_success("a.fr").await;
        store.record_failure("a.fr", "timeout").await;
        let health = store.get("a.fr").await.unwrap();
        assert_eq!(health.total_attempts, 2);
        assert_eq!(health.successful, 1);
        assert_eq!(health.failed, 1);
        assert_eq!(health.last_error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn blacklist_round_trip() {
        let store = store("blacklist");
        store.blacklist("bad.com", "HTTP blocked (70%)").await;
        assert!(store.is_blacklisted("bad.com").await);
        assert_eq!(store.get("bad.com").await.unwrap().status, SourceStatus::Blacklisted);
        store.unblacklist("bad.com").await;
        assert!(!store.is_blacklisted("bad.com").await);
        assert_eq!(store.get("bad.com").await.unwrap().status, SourceStatus::Active);
    }

    #[tokio::test]
    async fn empty_run_counter_resets_on_success() {
        let store = store("empty-runs");
        assert_eq!(store.record_empty_run("a.fr").await, 1);
        assert_eq!(store.record_empty_run("a.fr").await, 2);
        store.record_success("a.fr").await;
        assert_eq!(store.record_empty_run("a.fr").await, 1);
    }

    #[tokio::test]
    async fn health_report_buckets() {
        let store = store("report");
        store.record_success("ok.fr").await;
        store.blacklist("bad.com", "operator").await;
        store.save_discovered("new.fr", "llm", Some("bad.com")).await;
        let report = store.health_report().await;
        assert_eq!(report.healthy, vec!["ok.fr"]);
        assert_eq!(report.blacklisted, vec!["bad.com"]);
        assert_eq!(report.discovered, vec!["new.fr"]);
        assert_eq!(report.total, 3);
    }

    #[tokio::test]
    async fn snapshot_round_trip_deep_equal() {
        let path = temp_snapshot_path("roundtrip");
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let store = HealthStore::new(kv.clone(), path.clone());
        store.record_success("a.fr").await;
        store.record_failure("b.fr", "boom").await;
        store.blacklist("bad.com", "blocked").await;
        store.flush().await.unwrap();

        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        let snapshot: HealthSnapshot = serde_json::from_str(&raw).unwrap();
        assert_eq!(snapshot.blacklist, vec!["bad.com"]);
        assert_eq!(snapshot.sources.len(), 3);
        let original = store.get("a.fr").await.unwrap();
        let reloaded = &snapshot.sources["a.fr"];
        assert_eq!(serde_json::to_value(&original).unwrap(), serde_json::to_value(reloaded).unwrap());

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn snapshot_reader_tolerates_unknown_keys() {
        let raw = r#"{"last_updated":"2026-01-01T00:00:00Z","sources":{},"blacklist":[],"future_field":42}"#;
        let snapshot: HealthSnapshot = serde_json::from_str(raw).unwrap();
        assert!(snapshot.sources.is_empty());
    }

    #[tokio::test]
    async fn load_prefers_kv_over_snapshot() {
        let path = temp_snapshot_path("prefer-kv");
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());

        // Seed KV with one domain, disk with another.
        let seeded = HealthStore::new(kv.clone(), path.clone());
        seeded.record_success("from-kv.fr").await;
        seeded.flush().await.unwrap();

        let fresh = HealthStore::new(kv.clone(), path.clone());
        fresh.load().await.unwrap();
        assert!(fresh.get("from-kv.fr").await.is_some());

        let _ = tokio::fs::remove_file(&path).await;
    }
}
