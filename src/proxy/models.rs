//! Proxy data models
//!
//! Each pipeline stage produces a new value type that wraps its predecessor:
//! `Candidate` -> `ProbeResult` -> `ScoredProxy` -> `RankedProxy`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel latency recorded for candidates that failed the liveness probe
pub const UNREACHABLE_LATENCY: i64 = -1;

/// Provenance of a candidate, also used as the display name prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceTag {
    /// Scraped free proxy listings (free-proxy-list.net style pages and text lists)
    #[serde(rename = "FP")]
    Fp,
    /// The 66daili JSON API feed
    #[serde(rename = "66")]
    Daili66,
}

impl SourceTag {
    pub fn label(&self) -> &'static str {
        match self {
            SourceTag::Fp => "FP",
            SourceTag::Daili66 => "66",
        }
    }

    pub fn tier(&self) -> SourceTier {
        match self {
            SourceTag::Fp => SourceTier::Primary,
            SourceTag::Daili66 => SourceTier::Secondary,
        }
    }

    /// Parse a tag label, case-insensitive
    pub fn from_label(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "FP" => Some(SourceTag::Fp),
            "66" => Some(SourceTag::Daili66),
            _ => None,
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Trust tier of a source. Declaration order is priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceTier {
    Primary,
    Secondary,
}

/// Two-letter region code, or `XX` when the region is unknown
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct RegionCode(String);

impl RegionCode {
    pub const UNKNOWN: &'static str = "XX";

    pub fn unknown() -> Self {
        Self(Self::UNKNOWN.to_string())
    }

    /// Normalize any input to a valid code; anything that is not two ASCII
    /// letters collapses to the unknown sentinel.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if s.len() == 2 && s.chars().all(|c| c.is_ascii_alphabetic()) {
            Self(s.to_ascii_uppercase())
        } else {
            Self::unknown()
        }
    }

    /// Strict variant of [`RegionCode::parse`] for user input
    pub fn try_new(s: &str) -> Result<Self> {
        let code = Self::parse(s);
        if code.is_unknown() && !s.trim().eq_ignore_ascii_case(Self::UNKNOWN) {
            return Err(Error::InvalidRegion(s.to_string()));
        }
        Ok(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == Self::UNKNOWN
    }
}

impl Default for RegionCode {
    fn default() -> Self {
        Self::unknown()
    }
}

impl From<String> for RegionCode {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<RegionCode> for String {
    fn from(code: RegionCode) -> Self {
        code.0
    }
}

impl fmt::Display for RegionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An unverified proxy harvested from a source. Identity is `(host, port)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub host: String,
    pub port: u16,
    pub source: SourceTag,
}

impl Candidate {
    pub fn new(host: impl Into<String>, port: u16, source: SourceTag) -> Self {
        Self {
            host: host.into(),
            port,
            source,
        }
    }

    pub fn key(&self) -> (&str, u16) {
        (&self.host, self.port)
    }

    /// Forward proxy URL used by the prober
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// `host:port` form
    pub fn to_simple_string(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url())
    }
}

/// Outcome of probing a candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Ok,
    Failed(String),
    Timeout,
    /// Not probed because the run deadline passed first
    Skipped,
    /// Not probed because its tier is assigned placeholder metrics
    Untested,
}

/// A candidate after the prober has run (or deliberately not run) against it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    #[serde(flatten)]
    pub candidate: Candidate,
    pub latency_ms: i64,
    #[serde(rename = "throughputMBps")]
    pub throughput_mbps: f64,
    pub region_code: RegionCode,
    pub status: ProbeStatus,
}

impl ProbeResult {
    pub fn live(candidate: Candidate, latency_ms: u64, throughput_mbps: f64, region: RegionCode) -> Self {
        Self {
            candidate,
            // A live probe always reports a positive latency
            latency_ms: latency_ms.max(1) as i64,
            throughput_mbps: throughput_mbps.max(0.0),
            region_code: region,
            status: ProbeStatus::Ok,
        }
    }

    pub fn unreachable(candidate: Candidate, region: RegionCode, status: ProbeStatus) -> Self {
        Self {
            candidate,
            latency_ms: UNREACHABLE_LATENCY,
            throughput_mbps: 0.0,
            region_code: region,
            status,
        }
    }

    /// Placeholder metrics for tiers that are not probed
    pub fn untested(candidate: Candidate, latency_ms: u64, throughput_mbps: f64, region: RegionCode) -> Self {
        Self {
            status: ProbeStatus::Untested,
            ..Self::live(candidate, latency_ms, throughput_mbps, region)
        }
    }

    pub fn is_live(&self) -> bool {
        self.latency_ms > 0
    }
}

/// A live probe result with its rank score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredProxy {
    #[serde(flatten)]
    pub probe: ProbeResult,
    pub score: u64,
}

impl ScoredProxy {
    pub fn region(&self) -> &RegionCode {
        &self.probe.region_code
    }

    pub fn source(&self) -> SourceTag {
        self.probe.candidate.source
    }
}

/// Final list entry, named by the ranker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedProxy {
    pub display_name: String,
    #[serde(flatten)]
    pub scored: ScoredProxy,
}

impl RankedProxy {
    pub fn host(&self) -> &str {
        &self.scored.probe.candidate.host
    }

    pub fn port(&self) -> u16 {
        self.scored.probe.candidate.port
    }

    pub fn source(&self) -> SourceTag {
        self.scored.source()
    }

    pub fn region(&self) -> &RegionCode {
        self.scored.region()
    }

    pub fn latency_ms(&self) -> i64 {
        self.scored.probe.latency_ms
    }

    pub fn throughput_mbps(&self) -> f64 {
        self.scored.probe.throughput_mbps
    }

    pub fn score(&self) -> u64 {
        self.scored.score
    }

    /// Output record consumed by list renderers
    pub fn to_record(&self) -> ProxyRecord {
        ProxyRecord {
            display_name: self.display_name.clone(),
            host: self.host().to_string(),
            port: self.port(),
            protocol_type: "http",
            latency_ms: (self.latency_ms() > 0).then_some(self.latency_ms()),
            throughput_mbps: (self.throughput_mbps() > 0.0).then_some(self.throughput_mbps()),
            region_code: self.region().clone(),
            source: self.source(),
        }
    }
}

/// Serialized shape of one entry of the ranked list
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRecord {
    pub display_name: String,
    pub host: String,
    pub port: u16,
    pub protocol_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<i64>,
    #[serde(rename = "throughputMBps", skip_serializing_if = "Option::is_none")]
    pub throughput_mbps: Option<f64>,
    pub region_code: RegionCode,
    pub source: SourceTag,
}
