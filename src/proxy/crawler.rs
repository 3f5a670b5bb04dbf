//! Proxy crawler module for fetching candidates from upstream sources
//!
//! This module provides functionality for:
//! - Describing sources and their payload encodings
//! - Fetching every source independently, so one failure never aborts the rest
//! - Reporting per-source outcomes for run statistics

use crate::proxy::models::{Candidate, SourceTag};
use crate::proxy::parser::ProxyParser;
use crate::{Error, Result};
use futures::future::join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Default timeout for HTTP requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default user agent for HTTP requests
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Payload encoding of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceFormat {
    Line,
    Html,
    JsonApi,
}

impl SourceFormat {
    /// Format assumed for a bare address without an explicit tag
    pub fn infer(address: &str) -> Self {
        let path = address.split(['?', '#']).next().unwrap_or(address);
        if path.ends_with(".txt") {
            SourceFormat::Line
        } else {
            SourceFormat::Html
        }
    }

    pub fn default_tag(&self) -> SourceTag {
        match self {
            SourceFormat::Line | SourceFormat::Html => SourceTag::Fp,
            SourceFormat::JsonApi => SourceTag::Daili66,
        }
    }

    /// Decode a payload in this format, tagging every candidate with `tag`
    pub fn decode(&self, body: &str, tag: SourceTag) -> Result<Vec<Candidate>> {
        match self {
            SourceFormat::Line => Ok(ProxyParser::parse_text(body, tag)),
            SourceFormat::Html => Ok(ProxyParser::parse_html(body, tag)),
            SourceFormat::JsonApi => ProxyParser::parse_json_api(body, tag),
        }
    }
}

/// Source entry as written in configuration: a bare address or a record
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SourceSpec {
    Bare(String),
    Structured {
        address: String,
        format: SourceFormat,
        #[serde(default)]
        tag: Option<SourceTag>,
    },
}

/// A source to crawl, with its format resolved at configuration time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SourceSpec")]
pub struct ProxySource {
    pub address: String,
    pub format: SourceFormat,
    pub tag: SourceTag,
}

impl From<SourceSpec> for ProxySource {
    fn from(entry: SourceSpec) -> Self {
        match entry {
            SourceSpec::Bare(address) => Self::bare(&address),
            SourceSpec::Structured {
                address,
                format,
                tag,
            } => Self {
                address,
                format,
                tag: tag.unwrap_or_else(|| format.default_tag()),
            },
        }
    }
}

impl ProxySource {
    pub fn new(address: &str, format: SourceFormat, tag: SourceTag) -> Self {
        Self {
            address: address.to_string(),
            format,
            tag,
        }
    }

    pub fn bare(address: &str) -> Self {
        let format = SourceFormat::infer(address);
        Self::new(address, format, format.default_tag())
    }

    /// Decode a fetched body according to this source's format
    pub fn parse_body(&self, body: &str) -> Result<Vec<Candidate>> {
        self.format
            .decode(body, self.tag)
            .map_err(|e| Error::source_failed(&self.address, e.to_string()))
    }

    /// Free proxy sources used when no configuration is given
    pub fn defaults() -> Vec<ProxySource> {
        vec![
            ProxySource::bare("https://free-proxy-list.net/"),
            ProxySource::bare("https://free-proxy-list.net/zh-cn/"),
            ProxySource::bare("https://free-proxy-list.net/ssl-proxy.html"),
            ProxySource::bare("https://free-proxy-list.net/zh-cn/ssl-proxy.html"),
            ProxySource::new(
                "http://api.66daili.com/?anonymity=%E9%AB%98%E5%8C%BF&protocol=HTTPS&format=json",
                SourceFormat::JsonApi,
                SourceTag::Daili66,
            ),
        ]
    }
}

/// Per-source outcome kept in run statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReport {
    pub address: String,
    pub tag: SourceTag,
    pub fetched: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of crawling a single source
#[derive(Debug, Clone)]
pub struct CrawlResult {
    /// The source that was crawled
    pub source: ProxySource,
    /// Candidates extracted from the source
    pub candidates: Vec<Candidate>,
    /// Error message if crawling failed
    pub error: Option<String>,
}

impl CrawlResult {
    /// Create a successful crawl result
    pub fn success(source: ProxySource, candidates: Vec<Candidate>) -> Self {
        Self {
            source,
            candidates,
            error: None,
        }
    }

    /// Create a failed crawl result
    pub fn failure(source: ProxySource, error: String) -> Self {
        Self {
            source,
            candidates: Vec::new(),
            error: Some(error),
        }
    }

    /// Check if the crawl was successful
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn report(&self) -> SourceReport {
        SourceReport {
            address: self.source.address.clone(),
            tag: self.source.tag,
            fetched: self.candidates.len(),
            error: self.error.clone(),
        }
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(DEFAULT_TIMEOUT_SECS)
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

/// Configuration for proxy crawler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlerConfig {
    /// Timeout for each source fetch
    #[serde(default = "default_timeout", with = "crate::config::duration_ms")]
    pub timeout: Duration,
    /// User agent for HTTP requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl CrawlerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// Proxy crawler for fetching candidates from sources
pub struct ProxyCrawler {
    client: Client,
}

impl ProxyCrawler {
    /// Create a new proxy crawler with custom configuration
    pub fn with_config(config: CrawlerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self { client })
    }

    /// Fetch and decode a single source
    pub async fn crawl_source(&self, source: &ProxySource) -> Result<Vec<Candidate>> {
        let response = self
            .client
            .get(&source.address)
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;
        source.parse_body(&body)
    }

    /// Fetch every source concurrently, returning one result per source in
    /// configuration order
    pub async fn crawl_sources_with_results(&self, sources: &[ProxySource]) -> Vec<CrawlResult> {
        join_all(sources.iter().map(|source| async move {
            match self.crawl_source(source).await {
                Ok(candidates) => {
                    info!(source = %source.address, tag = %source.tag, "fetched {} candidates", candidates.len());
                    CrawlResult::success(source.clone(), candidates)
                }
                Err(e) => {
                    warn!(source = %source.address, "source failed: {}", e);
                    CrawlResult::failure(source.clone(), e.to_string())
                }
            }
        }))
        .await
    }
}
