//! Per-source bounded-concurrency scrape fan-out. One hard deadline around
//! each source, one around each article, rate limiting per domain, robots
//! compliance, and a hard-block circuit that blacklists hostile sources.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::stream::{self, StreamExt};
use newsloom_common::config::ScraperConfig;
use newsloom_common::{
    Article, ExtractionMethod, PageFetcher, PipelineMode, ProgressEvent, ProgressSink, Source,
    SourceScrapeStatus,
};
use newsloom_sources::{HealthStore, SourceRegistry};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::extract;
use crate::rate_limit::RateLimiter;
use crate::robots::RobotsCache;
use crate::simulation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryReason {
    Timeout,
    Blocked,
    EmptyRuns,
}

/// A domain that should get a background auto-discovery pass.
#[derive(Debug, Clone)]
pub struct DiscoveryCandidate {
    pub domain: String,
    pub reason: DiscoveryReason,
    pub detail: String,
}

#[derive(Debug, Default)]
pub struct ScrapeOutcome {
    pub articles: Vec<Article>,
    pub discovery_candidates: Vec<DiscoveryCandidate>,
}

#[derive(Debug, Error)]
enum SourceError {
    #[error("HTTP blocked ({ratio:.0}% hard-block responses)")]
    Blocked { ratio: f64 },
    #[error("{0}")]
    Other(String),
}

pub struct Scraper {
    fetcher: Arc<dyn PageFetcher>,
    registry: Arc<SourceRegistry>,
    health: Arc<HealthStore>,
    sink: Arc<dyn ProgressSink>,
    robots: Arc<RobotsCache>,
    rate_limiter: Arc<RateLimiter>,
    config: ScraperConfig,
}

impl Scraper {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        registry: Arc<SourceRegistry>,
        health: Arc<HealthStore>,
        sink: Arc<dyn ProgressSink>,
        config: ScraperConfig,
    ) -> Self {
        let robots = Arc::new(RobotsCache::new(fetcher.clone(), &config.user_agent));
        Self {
            fetcher,
            registry,
            health,
            sink,
            robots,
            rate_limiter: Arc::new(RateLimiter::new()),
            config,
        }
    }

    /// Collect articles from the candidate sources. `requested = None` means
    /// the whole registry. Blacklisted domains are skipped (with an event),
    /// never fetched.
    pub async fn run(
        self: &Arc<Self>,
        mode: PipelineMode,
        requested: Option<Vec<String>>,
        topics: &[String],
        max_articles_per_source: usize,
        cancelled: Arc<AtomicBool>,
    ) -> Result<ScrapeOutcome> {
        if mode == PipelineMode::Simulation {
            info!("Simulation mode: fabricating deterministic articles");
            return Ok(ScrapeOutcome {
                articles: simulation::simulated_articles(topics, max_articles_per_source),
                discovery_candidates: Vec::new(),
            });
        }

        let candidates = match requested {
            Some(domains) => domains,
            None => self.registry.domains().await,
        };

        let mut domains = Vec::new();
        for domain in candidates {
            if self.health.is_blacklisted(&domain).await {
                self.sink.publish(ProgressEvent::SourceUpdate {
                    domain: domain.clone(),
                    status: SourceScrapeStatus::Skipped,
                    articles: 0,
                    error: None,
                });
                continue;
            }
            domains.push(domain);
        }

        info!(sources = domains.len(), mode = %mode, "Scrape fan-out starting");
        let source_slots = Arc::new(Semaphore::new(self.config.max_parallel_sources));
        let topics: Arc<Vec<String>> = Arc::new(topics.to_vec());
        let mut tasks: JoinSet<(Vec<Article>, Option<DiscoveryCandidate>)> = JoinSet::new();

        for domain in domains {
            if cancelled.load(Ordering::Relaxed) {
                break;
            }
            let scraper = self.clone();
            let slots = source_slots.clone();
            let topics = topics.clone();
            let cancelled = cancelled.clone();
            tasks.spawn(async move {
                let _permit = match slots.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return (Vec::new(), None),
                };
                if cancelled.load(Ordering::Relaxed) {
                    return (Vec::new(), None);
                }
                scraper
                    .scrape_one(&domain, &topics, max_articles_per_source, cancelled)
                    .await
            });
        }

        let mut outcome = ScrapeOutcome::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((articles, candidate)) => {
                    outcome.articles.extend(articles);
                    if let Some(candidate) = candidate {
                        outcome.discovery_candidates.push(candidate);
                    }
                }
                Err(e) => warn!(error = %e, "Scrape task panicked"),
            }
            if cancelled.load(Ordering::Relaxed) {
                tasks.abort_all();
            }
        }

        info!(
            articles = outcome.articles.len(),
            discovery_candidates = outcome.discovery_candidates.len(),
            "Scrape fan-out complete"
        );
        Ok(outcome)
    }

    /// One source under its global deadline, with health updates and broker
    /// events as side effects.
    async fn scrape_one(
        &self,
        domain: &str,
        topics: &[String],
        max_articles: usize,
        cancelled: Arc<AtomicBool>,
    ) -> (Vec<Article>, Option<DiscoveryCandidate>) {
        self.sink.publish(ProgressEvent::SourceUpdate {
            domain: domain.to_string(),
            status: SourceScrapeStatus::Scraping,
            articles: 0,
            error: None,
        });

        let deadline = Duration::from_secs(self.config.source_timeout_secs);
        let result = tokio::time::timeout(
            deadline,
            self.scrape_source_inner(domain, topics, max_articles, cancelled),
        )
        .await;

        match result {
            Ok(Ok(articles)) if articles.is_empty() => {
                let empty_runs = self.health.record_empty_run(domain).await;
                self.sink.publish(ProgressEvent::SourceUpdate {
                    domain: domain.to_string(),
                    status: SourceScrapeStatus::Empty,
                    articles: 0,
                    error: None,
                });
                let candidate = (empty_runs >= self.config.empty_runs_before_discovery).then(|| {
                    DiscoveryCandidate {
                        domain: domain.to_string(),
                        reason: DiscoveryReason::EmptyRuns,
                        detail: format!("{empty_runs} consecutive empty runs"),
                    }
                });
                (Vec::new(), candidate)
            }
            Ok(Ok(articles)) => {
                self.health.record_success(domain).await;
                self.sink.publish(ProgressEvent::SourceUpdate {
                    domain: domain.to_string(),
                    status: SourceScrapeStatus::Success,
                    articles: articles.len() as u32,
                    error: None,
                });
                (articles, None)
            }
            Ok(Err(SourceError::Blocked { ratio })) => {
                let reason = format!("HTTP blocked ({:.0}% hard-block responses)", ratio * 100.0);
                self.health.record_failure(domain, &reason).await;
                self.health.blacklist(domain, &reason).await;
                self.sink.publish(ProgressEvent::SourceUpdate {
                    domain: domain.to_string(),
                    status: SourceScrapeStatus::Blocked,
                    articles: 0,
                    error: Some(reason.clone()),
                });
                (
                    Vec::new(),
                    Some(DiscoveryCandidate {
                        domain: domain.to_string(),
                        reason: DiscoveryReason::Blocked,
                        detail: reason,
                    }),
                )
            }
            Ok(Err(SourceError::Other(message))) => {
                self.health.record_failure(domain, &message).await;
                self.sink.publish(ProgressEvent::SourceUpdate {
                    domain: domain.to_string(),
                    status: SourceScrapeStatus::Error,
                    articles: 0,
                    error: Some(message),
                });
                (Vec::new(), None)
            }
            Err(_elapsed) => {
                let secs = self.config.source_timeout_secs;
                let reason = format!("Timeout after {secs}s");
                self.health.record_failure(domain, &reason).await;
                self.health.blacklist(domain, &reason).await;
                self.sink.publish(ProgressEvent::SourceUpdate {
                    domain: domain.to_string(),
                    status: SourceScrapeStatus::Timeout,
                    articles: 0,
                    error: Some(reason.clone()),
                });
                (
                    Vec::new(),
                    Some(DiscoveryCandidate {
                        domain: domain.to_string(),
                        reason: DiscoveryReason::Timeout,
                        detail: reason,
                    }),
                )
            }
        }
    }

    /// Strategy loop: feeds first, HTML second. First strategy yielding at
    /// least one accepted article wins.
    async fn scrape_source_inner(
        &self,
        domain: &str,
        topics: &[String],
        max_articles: usize,
        cancelled: Arc<AtomicBool>,
    ) -> Result<Vec<Article>, SourceError> {
        let source = self
            .registry
            .get(domain)
            .await
            .ok_or_else(|| SourceError::Other(format!("unknown source {domain}")))?;

        for strategy in source.strategies() {
            if cancelled.load(Ordering::Relaxed) {
                return Ok(Vec::new());
            }
            let articles = match strategy {
                ExtractionMethod::RssFull => self.scrape_feeds(&source, topics, max_articles).await?,
                ExtractionMethod::ScrapeFull => {
                    self.scrape_html(&source, topics, max_articles, cancelled.clone())
                        .await?
                }
                _ => Vec::new(),
            };
            if !articles.is_empty() {
                return Ok(articles);
            }
        }
        Ok(Vec::new())
    }

    async fn scrape_feeds(
        &self,
        source: &Source,
        topics: &[String],
        max_articles: usize,
    ) -> Result<Vec<Article>, SourceError> {
        for feed_url in &source.rss_feeds {
            if !self.robots.allows(&source.domain, feed_url).await {
                continue;
            }
            self.rate_limiter
                .acquire(&source.domain, source.rate_limit_secs)
                .await;
            // Feed and section fetches are URL discovery: bounded by the
            // per-source deadline, not the per-article one.
            let page = match self.fetcher.fetch(feed_url).await {
                Ok(page) if page.status == 200 => page,
                Ok(page) => {
                    debug!(feed_url, status = page.status, "Feed fetch non-200");
                    continue;
                }
                Err(e) => {
                    debug!(feed_url, error = %e, "Feed fetch failed");
                    continue;
                }
            };
            let mut articles = extract::articles_from_feed(&page.body, source, max_articles);
            if !topics.is_empty() {
                articles.retain(|a| topic_match(&format!("{} {}", a.raw_title, a.raw_text), topics));
            }
            if !articles.is_empty() {
                return Ok(articles);
            }
        }
        Ok(Vec::new())
    }

    async fn scrape_html(
        &self,
        source: &Source,
        topics: &[String],
        max_articles: usize,
        cancelled: Arc<AtomicBool>,
    ) -> Result<Vec<Article>, SourceError> {
        if !self.robots.allows(&source.domain, &source.base_url).await {
            // Home page itself disallowed: nothing to do, not a failure.
            return Ok(Vec::new());
        }
        self.rate_limiter
            .acquire(&source.domain, source.rate_limit_secs)
            .await;

        let home = self
            .fetcher
            .fetch(&source.base_url)
            .await
            .map_err(|e| SourceError::Other(format!("home page fetch failed: {e}")))?;

        if home.is_hard_block() {
            return Err(SourceError::Blocked { ratio: 1.0 });
        }
        if home.status != 200 {
            return Err(SourceError::Other(format!(
                "home page returned status {}",
                home.status
            )));
        }

        let urls = extract::discover_article_urls(&home.body, source, max_articles * 3);

        let attempted = AtomicUsize::new(0);
        let hard_blocks = AtomicUsize::new(0);
        let article_slots = Semaphore::new(self.config.max_parallel_articles);

        let fetched: Vec<Option<Article>> = stream::iter(urls)
            .map(|url| {
                let attempted = &attempted;
                let hard_blocks = &hard_blocks;
                let article_slots = &article_slots;
                let cancelled = cancelled.clone();
                async move {
                    let _permit = article_slots.acquire().await.ok()?;
                    if cancelled.load(Ordering::Relaxed) {
                        return None;
                    }
                    if !self.robots.allows(&source.domain, &url).await {
                        return None;
                    }
                    self.rate_limiter
                        .acquire(&source.domain, source.rate_limit_secs)
                        .await;
                    attempted.fetch_add(1, Ordering::Relaxed);
                    let page = tokio::time::timeout(
                        Duration::from_secs(self.config.article_timeout_secs),
                        self.fetcher.fetch(&url),
                    )
                    .await
                    .ok()?
                    .ok()?;
                    if page.is_hard_block() {
                        hard_blocks.fetch_add(1, Ordering::Relaxed);
                        return None;
                    }
                    if page.status != 200 {
                        return None;
                    }
                    extract::article_from_html(
                        &page.body,
                        &url,
                        source,
                        self.config.partial_body_threshold,
                    )
                }
            })
            .buffer_unordered(self.config.max_parallel_articles)
            .collect()
            .await;

        let attempted = attempted.load(Ordering::Relaxed);
        let hard_blocks = hard_blocks.load(Ordering::Relaxed);
        if attempted >= 3 {
            let ratio = hard_blocks as f64 / attempted as f64;
            if ratio >= self.config.block_ratio_threshold {
                return Err(SourceError::Blocked { ratio });
            }
        }

        let mut articles: Vec<Article> = fetched.into_iter().flatten().collect();
        if !topics.is_empty() {
            articles.retain(|a| topic_match(&format!("{} {}", a.raw_title, a.raw_text), topics));
        }
        articles.truncate(max_articles);
        Ok(articles)
    }
}

fn topic_match(text: &str, topics: &[String]) -> bool {
    let lower = text.to_lowercase();
    topics.iter().any(|t| lower.contains(&t.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use newsloom_common::{FetchedPage, NullSink};
    use newsloom_store::MemoryKvStore;
    use std::collections::HashMap;

    struct FakeFetcher {
        pages: HashMap<String, FetchedPage>,
        delay: Option<Duration>,
    }

    #[async_trait::async_trait]
    impl PageFetcher for FakeFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedPage> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no page for {url}"))
        }
    }

    fn page(url: &str, status: u16, body: &str) -> (String, FetchedPage) {
        (
            url.to_string(),
            FetchedPage {
                url: url.to_string(),
                status,
                content_type: "text/html".to_string(),
                body: body.to_string(),
            },
        )
    }

    fn article_page(title: &str) -> String {
        format!(
            r#"<html><head><meta property="og:title" content="{title}" />
            <meta name="description" content="Description suffisamment longue pour le test." />
            </head><body>
            <p>Premier paragraphe substantiel de l'article qui fait bien plus de quarante caractères.</p>
            <p>Deuxième paragraphe substantiel de l'article, également long et détaillé pour le test.</p>
            </body></html>"#
        )
    }

    fn home_page(n: usize) -> String {
        (0..n)
            .map(|i| format!("<a href=\"/article/sujet-numero-{i}\">lien</a>"))
            .collect()
    }

    fn test_source(domain: &str) -> Source {
        Source {
            domain: domain.to_string(),
            name: domain.to_string(),
            base_url: format!("https://{domain}"),
            link_selectors: vec!["/article/".to_string()],
            title_selector: None,
            content_selector: None,
            rss_feeds: Vec::new(),
            rate_limit_secs: 0.0,
            tier: 2,
            language: "fr".to_string(),
            category: None,
            auto_discovered: false,
        }
    }

    fn scraper_with(
        sources: Vec<Source>,
        pages: HashMap<String, FetchedPage>,
        delay: Option<Duration>,
        config: ScraperConfig,
    ) -> Arc<Scraper> {
        let health = Arc::new(HealthStore::new(
            Arc::new(MemoryKvStore::new()),
            std::env::temp_dir().join(format!(
                "newsloom-scraper-test-{}-{}.json",
                std::process::id(),
                sources.first().map(|s| s.domain.clone()).unwrap_or_default()
            )),
        ));
        Arc::new(Scraper::new(
            Arc::new(FakeFetcher { pages, delay }),
            Arc::new(SourceRegistry::new(sources)),
            health,
            Arc::new(NullSink),
            config,
        ))
    }

    #[tokio::test]
    async fn scrapes_articles_from_html_source() {
        let domain = "journal-ok.fr";
        let mut pages = HashMap::new();
        pages.extend([page(&format!("https://{domain}"), 200, &home_page(3))]);
        for i in 0..3 {
            pages.extend([page(
                &format!("https://{domain}/article/sujet-numero-{i}"),
                200,
                &article_page(&format!("Titre du sujet numero {i}")),
            )]);
        }
        let scraper = scraper_with(vec![test_source(domain)], pages, None, ScraperConfig::default());
        let outcome = scraper
            .run(
                PipelineMode::Scrape,
                None,
                &[],
                10,
                Arc::new(AtomicBool::new(false)),
            )
            .await
            .unwrap();
        assert_eq!(outcome.articles.len(), 3);
        assert!(outcome.discovery_candidates.is_empty());
        let health = scraper.health.get(domain).await.unwrap();
        assert_eq!(health.successful, 1);
    }

    #[tokio::test]
    async fn hard_block_ratio_blacklists_source() {
        let domain = "journal-bloque.fr";
        let mut pages = HashMap::new();
        pages.extend([page(&format!("https://{domain}"), 200, &home_page(4))]);
        for i in 0..4 {
            pages.extend([page(
                &format!("https://{domain}/article/sujet-numero-{i}"),
                403,
                "forbidden",
            )]);
        }
        let scraper = scraper_with(vec![test_source(domain)], pages, None, ScraperConfig::default());
        let outcome = scraper
            .run(
                PipelineMode::Scrape,
                None,
                &[],
                10,
                Arc::new(AtomicBool::new(false)),
            )
            .await
            .unwrap();
        assert!(outcome.articles.is_empty());
        assert_eq!(outcome.discovery_candidates.len(), 1);
        assert_eq!(outcome.discovery_candidates[0].reason, DiscoveryReason::Blocked);
        assert!(scraper.health.is_blacklisted(domain).await);
        let entry = scraper.health.get(domain).await.unwrap();
        assert!(entry.last_error.as_deref().unwrap_or("").contains("HTTP blocked"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_source_times_out_and_is_blacklisted() {
        let domain = "journal-lent.fr";
        let config = ScraperConfig {
            source_timeout_secs: 2,
            article_timeout_secs: 1,
            ..Default::default()
        };
        let pages = HashMap::new(); // every fetch hangs on the delay first
        let scraper = scraper_with(
            vec![test_source(domain)],
            pages,
            Some(Duration::from_secs(60)),
            config,
        );
        let outcome = scraper
            .run(
                PipelineMode::Scrape,
                None,
                &[],
                10,
                Arc::new(AtomicBool::new(false)),
            )
            .await
            .unwrap();
        assert!(outcome.articles.is_empty());
        assert_eq!(outcome.discovery_candidates.len(), 1);
        assert_eq!(outcome.discovery_candidates[0].reason, DiscoveryReason::Timeout);
        assert!(scraper.health.is_blacklisted(domain).await);
    }

    #[tokio::test]
    async fn blacklisted_source_is_skipped_not_fetched() {
        let domain = "journal-noir.fr";
        let scraper = scraper_with(
            vec![test_source(domain)],
            HashMap::new(),
            None,
            ScraperConfig::default(),
        );
        scraper.health.blacklist(domain, "operator").await;
        let outcome = scraper
            .run(
                PipelineMode::Scrape,
                None,
                &[],
                10,
                Arc::new(AtomicBool::new(false)),
            )
            .await
            .unwrap();
        assert!(outcome.articles.is_empty());
        // No failure recorded: the source was never touched.
        assert_eq!(scraper.health.get(domain).await.unwrap().failed, 0);
    }

    #[tokio::test]
    async fn consecutive_empty_runs_schedule_discovery() {
        let domain = "journal-vide.fr";
        let mut pages = HashMap::new();
        pages.extend([page(&format!("https://{domain}"), 200, "<html>aucun lien</html>")]);
        let scraper = scraper_with(vec![test_source(domain)], pages, None, ScraperConfig::default());

        let cancelled = Arc::new(AtomicBool::new(false));
        let first = scraper
            .run(PipelineMode::Scrape, None, &[], 10, cancelled.clone())
            .await
            .unwrap();
        assert!(first.discovery_candidates.is_empty());
        let second = scraper
            .run(PipelineMode::Scrape, None, &[], 10, cancelled)
            .await
            .unwrap();
        assert_eq!(second.discovery_candidates.len(), 1);
        assert_eq!(second.discovery_candidates[0].reason, DiscoveryReason::EmptyRuns);
    }

    #[tokio::test]
    async fn topic_mode_filters_articles() {
        let domain = "journal-theme.fr";
        let mut pages = HashMap::new();
        pages.extend([page(&format!("https://{domain}"), 200, &home_page(2))]);
        pages.extend([page(
            &format!("https://{domain}/article/sujet-numero-0"),
            200,
            &article_page("Budget et inflation en hausse"),
        )]);
        pages.extend([page(
            &format!("https://{domain}/article/sujet-numero-1"),
            200,
            &article_page("Festival de musique cet ete"),
        )]);
        let scraper = scraper_with(vec![test_source(domain)], pages, None, ScraperConfig::default());
        let outcome = scraper
            .run(
                PipelineMode::Topic,
                None,
                &["inflation".to_string()],
                10,
                Arc::new(AtomicBool::new(false)),
            )
            .await
            .unwrap();
        assert_eq!(outcome.articles.len(), 1);
        assert!(outcome.articles[0].raw_title.contains("inflation"));
    }

    #[tokio::test]
    async fn simulation_mode_never_fetches() {
        let scraper = scraper_with(Vec::new(), HashMap::new(), None, ScraperConfig::default());
        let outcome = scraper
            .run(
                PipelineMode::Simulation,
                None,
                &["energie".to_string()],
                5,
                Arc::new(AtomicBool::new(false)),
            )
            .await
            .unwrap();
        assert!(!outcome.articles.is_empty());
        assert!(outcome.articles.iter().all(|a| a.extraction_method == ExtractionMethod::Api));
    }

    #[tokio::test]
    async fn cancellation_stops_fanout_early() {
        let domain = "journal-annule.fr";
        let scraper = scraper_with(
            vec![test_source(domain)],
            HashMap::new(),
            None,
            ScraperConfig::default(),
        );
        let cancelled = Arc::new(AtomicBool::new(true));
        let outcome = scraper
            .run(PipelineMode::Scrape, None, &[], 10, cancelled)
            .await
            .unwrap();
        assert!(outcome.articles.is_empty());
    }
}
