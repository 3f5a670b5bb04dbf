//! Proxy harvesting, probing and ranking
//!
//! This module provides functionality for:
//! - Parsing candidates from line lists, HTML tables and the JSON API
//! - Crawling configured sources concurrently
//! - Deduplicating and safety-filtering candidates
//! - Resolving regions through a cached geolocation backend
//! - Probing liveness and throughput in bounded batches
//! - Scoring, grouping and naming the final list

pub mod checker;
pub mod crawler;
pub mod filter;
pub mod geo;
pub mod labels;
pub mod models;
pub mod parser;
pub mod ranker;

pub use checker::{throughput_mbps, CheckerConfig, ProxyChecker};
pub use crawler::{CrawlResult, CrawlerConfig, ProxyCrawler, ProxySource, SourceFormat, SourceReport};
pub use filter::{dedup_candidates, FilterConfig, SafetyFilter};
pub use geo::{
    GeoBackend, GeoCache, GeoConfig, GeoLocator, GeoLookup, GeoResolver, IpApiLookup,
};
pub use models::{
    Candidate, ProbeResult, ProbeStatus, ProxyRecord, RankedProxy, RegionCode, ScoredProxy,
    SourceTag, SourceTier, UNREACHABLE_LATENCY,
};
pub use parser::{HtmlRow, ProxyParser};
pub use ranker::{compute_score, LabelStyle, Ranker, RankerConfig};
