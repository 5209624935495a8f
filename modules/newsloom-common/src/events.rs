use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Pipeline run state ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Cancelled,
    Error,
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStatus::Idle => write!(f, "idle"),
            PipelineStatus::Running => write!(f, "running"),
            PipelineStatus::Completed => write!(f, "completed"),
            PipelineStatus::Cancelled => write!(f, "cancelled"),
            PipelineStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineMode {
    Scrape,
    Topic,
    Simulation,
}

impl std::str::FromStr for PipelineMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SCRAPE" => Ok(Self::Scrape),
            "TOPIC" => Ok(Self::Topic),
            "SIMULATION" => Ok(Self::Simulation),
            other => Err(format!("unknown PipelineMode: {other}")),
        }
    }
}

impl std::fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineMode::Scrape => write!(f, "SCRAPE"),
            PipelineMode::Topic => write!(f, "TOPIC"),
            PipelineMode::Simulation => write!(f, "SIMULATION"),
        }
    }
}

// --- Broker events ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Success,
    Warning,
    Error,
}

/// Per-source lifecycle as seen by subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceScrapeStatus {
    Pending,
    Scraping,
    Success,
    Empty,
    Error,
    Timeout,
    Blocked,
    Skipped,
}

/// Counters summarizing one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunSummary {
    pub mode: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub raw_articles: usize,
    pub unique_articles: usize,
    pub duplicates_removed: usize,
    pub past_syntheses_used: usize,
    pub clusters: usize,
    pub new_topics: usize,
    pub updates: usize,
    pub syntheses_written: usize,
    pub sources_used: usize,
    pub status: PipelineStatus,
    #[serde(default)]
    pub error: Option<String>,
}

/// Structured events fanned out by the progress broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Log {
        level: LogLevel,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
    },
    Progress {
        percent: u8,
        step: String,
        status: PipelineStatus,
    },
    SourceUpdate {
        domain: String,
        status: SourceScrapeStatus,
        articles: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Completed {
        summary: RunSummary,
    },
    Error {
        error: String,
    },
}

impl ProgressEvent {
    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        Self::Log {
            level,
            message: message.into(),
            source: None,
            details: None,
        }
    }

    pub fn source_log(level: LogLevel, message: impl Into<String>, source: &str) -> Self {
        Self::Log {
            level,
            message: message.into(),
            source: Some(source.to_string()),
            details: None,
        }
    }
}

/// Push interface for pipeline components. Implementations must never block
/// the caller; a slow subscriber may drop events.
pub trait ProgressSink: Send + Sync {
    fn publish(&self, event: ProgressEvent);
}

/// Sink that discards everything. Default for tests and detached tasks.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn publish(&self, _event: ProgressEvent) {}
}

// --- Page fetching contract (shared by scraper and discovery) ---

/// A fetched page, status and body, before any extraction.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub status: u16,
    pub content_type: String,
    pub body: String,
}

impl FetchedPage {
    pub fn is_html(&self) -> bool {
        self.content_type.contains("text/html")
    }

    /// Hard-block statuses that count toward the blocked-source circuit.
    pub fn is_hard_block(&self) -> bool {
        matches!(self.status, 403 | 406 | 429 | 451)
    }
}

#[async_trait::async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> anyhow::Result<FetchedPage>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!(PipelineMode::from_str("scrape").unwrap(), PipelineMode::Scrape);
        assert_eq!(PipelineMode::from_str("SIMULATION").unwrap(), PipelineMode::Simulation);
        assert!(PipelineMode::from_str("bogus").is_err());
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let e = ProgressEvent::SourceUpdate {
            domain: "example.com".to_string(),
            status: SourceScrapeStatus::Timeout,
            articles: 0,
            error: Some("45s deadline".to_string()),
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["type"], "source_update");
        assert_eq!(json["status"], "timeout");
    }

    #[test]
    fn hard_block_statuses() {
        let page = |status| FetchedPage {
            url: String::new(),
            status,
            content_type: "text/html".to_string(),
            body: String::new(),
        };
        assert!(page(403).is_hard_block());
        assert!(page(429).is_hard_block());
        assert!(!page(200).is_hard_block());
        assert!(!page(500).is_hard_block());
    }
}
