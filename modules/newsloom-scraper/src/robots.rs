use std::collections::HashMap;
use std::sync::Arc;

use newsloom_common::robots::RobotsPolicy;
use newsloom_common::PageFetcher;
use tokio::sync::Mutex;
use tracing::debug;

/// Per-domain robots.txt cache. Fetched once before first access to a
/// domain; a missing or unreadable file allows everything.
pub struct RobotsCache {
    fetcher: Arc<dyn PageFetcher>,
    user_agent: String,
    policies: Mutex<HashMap<String, Arc<RobotsPolicy>>>,
}

impl RobotsCache {
    pub fn new(fetcher: Arc<dyn PageFetcher>, user_agent: &str) -> Self {
        Self {
            fetcher,
            user_agent: user_agent.to_string(),
            policies: Mutex::new(HashMap::new()),
        }
    }

    pub async fn allows(&self, domain: &str, url: &str) -> bool {
        let policy = self.policy_for(domain).await;
        let allowed = policy.allows(url);
        if !allowed {
            debug!(domain, url, "Skipping URL disallowed by robots.txt");
        }
        allowed
    }

    async fn policy_for(&self, domain: &str) -> Arc<RobotsPolicy> {
        {
            let policies = self.policies.lock().await;
            if let Some(policy) = policies.get(domain) {
                return policy.clone();
            }
        }

        let robots_url = format!("https://{domain}/robots.txt");
        let policy = match self.fetcher.fetch(&robots_url).await {
            Ok(page) if page.status == 200 => {
                Arc::new(RobotsPolicy::parse(&page.body, &self.user_agent))
            }
            _ => Arc::new(RobotsPolicy::allow_all()),
        };

        let mut policies = self.policies.lock().await;
        policies
            .entry(domain.to_string())
            .or_insert_with(|| policy.clone())
            .clone()
    }
}
