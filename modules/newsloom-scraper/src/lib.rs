pub mod extract;
pub mod fanout;
pub mod fetcher;
pub mod rate_limit;
pub mod robots;
pub mod simulation;

pub use fanout::{DiscoveryCandidate, DiscoveryReason, ScrapeOutcome, Scraper};
pub use fetcher::HttpFetcher;
