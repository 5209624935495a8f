//! Cluster-wide single-run lock: SET-IF-ABSENT with TTL in the fast KV
//! store, compare-and-delete on release. When the KV store is unreachable
//! the lock degrades to a process-local flag (single-node safety only).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use newsloom_common::NewsloomError;
use newsloom_store::KvStore;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

const LOCK_KEY: &str = "pipeline:lock";

pub struct RunLock {
    kv: Arc<dyn KvStore>,
    ttl_secs: u64,
    token: Mutex<Option<String>>,
    local_held: AtomicBool,
    degraded: AtomicBool,
}

impl RunLock {
    pub fn new(kv: Arc<dyn KvStore>, ttl_secs: u64) -> Self {
        Self {
            kv,
            ttl_secs,
            token: Mutex::new(None),
            local_held: AtomicBool::new(false),
            degraded: AtomicBool::new(false),
        }
    }

    /// Acquire or fail with `PipelineBusy`. Never blocks waiting for the
    /// other holder.
    pub async fn acquire(&self) -> Result<(), NewsloomError> {
        let token = Uuid::new_v4().to_string();
        match self.kv.set_nx_ttl(LOCK_KEY, &token, self.ttl_secs).await {
            Ok(true) => {
                self.degraded.store(false, Ordering::SeqCst);
                *self.token.lock().await = Some(token);
                debug!("Run lock acquired");
                Ok(())
            }
            Ok(false) => Err(NewsloomError::PipelineBusy),
            Err(e) => {
                warn!(error = %e, "KV store unreachable, falling back to local run lock");
                self.degraded.store(true, Ordering::SeqCst);
                if self
                    .local_held
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    Ok(())
                } else {
                    Err(NewsloomError::PipelineBusy)
                }
            }
        }
    }

    /// Release is compare-and-delete: only the holder's token clears the key.
    pub async fn release(&self) {
        if self.degraded.load(Ordering::SeqCst) {
            self.local_held.store(false, Ordering::SeqCst);
            return;
        }
        let token = self.token.lock().await.take();
        if let Some(token) = token {
            match self.kv.compare_and_del(LOCK_KEY, &token).await {
                Ok(true) => debug!("Run lock released"),
                Ok(false) => warn!("Run lock was not ours to release (expired?)"),
                Err(e) => warn!(error = %e, "Run lock release failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use newsloom_store::MemoryKvStore;

    #[tokio::test]
    async fn second_acquire_fails_until_release() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let lock_a = RunLock::new(kv.clone(), 3600);
        let lock_b = RunLock::new(kv.clone(), 3600);

        lock_a.acquire().await.unwrap();
        assert!(matches!(
            lock_b.acquire().await,
            Err(NewsloomError::PipelineBusy)
        ));
        lock_a.release().await;
        lock_b.acquire().await.unwrap();
    }

    #[tokio::test]
    async fn release_does_not_clobber_other_holder() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let lock_a = RunLock::new(kv.clone(), 3600);
        let lock_b = RunLock::new(kv.clone(), 3600);

        lock_a.acquire().await.unwrap();
        // B never acquired; releasing must not free A's lock.
        lock_b.release().await;
        assert!(matches!(
            lock_b.acquire().await,
            Err(NewsloomError::PipelineBusy)
        ));
    }

    struct DownKv;

    #[async_trait::async_trait]
    impl KvStore for DownKv {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            anyhow::bail!("down")
        }
        async fn set(&self, _key: &str, _value: &str) -> Result<()> {
            anyhow::bail!("down")
        }
        async fn set_nx_ttl(&self, _key: &str, _value: &str, _ttl: u64) -> Result<bool> {
            anyhow::bail!("down")
        }
        async fn del(&self, _key: &str) -> Result<()> {
            anyhow::bail!("down")
        }
        async fn compare_and_del(&self, _key: &str, _expected: &str) -> Result<bool> {
            anyhow::bail!("down")
        }
        async fn set_add(&self, _set: &str, _member: &str) -> Result<()> {
            anyhow::bail!("down")
        }
        async fn set_remove(&self, _set: &str, _member: &str) -> Result<()> {
            anyhow::bail!("down")
        }
        async fn set_members(&self, _set: &str) -> Result<Vec<String>> {
            anyhow::bail!("down")
        }
    }

    #[tokio::test]
    async fn degrades_to_local_lock_when_kv_down() {
        let lock = RunLock::new(Arc::new(DownKv), 3600);
        lock.acquire().await.unwrap();
        assert!(matches!(
            lock.acquire().await,
            Err(NewsloomError::PipelineBusy)
        ));
        lock.release().await;
        lock.acquire().await.unwrap();
    }
}
