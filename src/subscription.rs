//! Filtering and rendering of the ranked list for proxy clients

use crate::proxy::{ProxyRecord, RankedProxy, SourceTag};
use crate::{Error, Result};
use chrono::{DateTime, Utc};

/// Name of the selector group in the text subscription
const GROUP_NAME: &str = "auto-proxy";

/// Selection applied to a ranked list before rendering
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    /// Keep only this source tag; `None` keeps every source
    pub source: Option<SourceTag>,
    /// Keep only this region code
    pub region: Option<String>,
    /// Maximum number of entries, 0 for no limit
    pub limit: usize,
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts a tag label, or `all` for no source filter
    pub fn with_source(mut self, source: &str) -> Result<Self> {
        let source = source.trim();
        self.source = if source.eq_ignore_ascii_case("all") {
            None
        } else {
            let tag = SourceTag::from_label(source)
                .ok_or_else(|| Error::Config(format!("unknown source tag {:?}", source)))?;
            Some(tag)
        };
        Ok(self)
    }

    pub fn with_region(mut self, region: &str) -> Self {
        self.region = Some(region.trim().to_ascii_uppercase());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn apply(&self, proxies: &[RankedProxy]) -> Vec<RankedProxy> {
        let filtered = proxies
            .iter()
            .filter(|p| self.source.map_or(true, |s| p.source() == s))
            .filter(|p| {
                self.region
                    .as_deref()
                    .map_or(true, |r| p.region().as_str() == r)
            })
            .cloned();

        if self.limit > 0 {
            filtered.take(self.limit).collect()
        } else {
            filtered.collect()
        }
    }
}

/// Render the text subscription: a proxy list followed by a selector group
/// naming every proxy of every known region plus a direct fallback.
pub fn render_clash(proxies: &[RankedProxy], generated_at: DateTime<Utc>) -> String {
    let mut out = String::new();
    out.push_str("# Free proxy subscription\n");
    out.push_str(&format!("# Updated: {}\n\n", generated_at.to_rfc3339()));

    out.push_str("proxies:\n");
    for p in proxies {
        out.push_str(&format!("  - name: \"{}\"\n", p.display_name));
        out.push_str("    type: http\n");
        out.push_str(&format!("    server: {}\n", p.host()));
        out.push_str(&format!("    port: {}\n", p.port()));
        if p.latency_ms() > 0 {
            out.push_str(&format!("    latency: {}\n", p.latency_ms()));
        }
        if p.throughput_mbps() > 0.0 {
            out.push_str(&format!("    speed: {}MB/s\n", p.throughput_mbps()));
        }
        out.push('\n');
    }

    let mut regions: Vec<&str> = Vec::new();
    for p in proxies {
        let region = p.region().as_str();
        if !p.region().is_unknown() && !regions.contains(&region) {
            regions.push(region);
        }
    }

    if !regions.is_empty() {
        out.push_str("proxy-groups:\n");
        out.push_str(&format!("  - name: \"{}\"\n", GROUP_NAME));
        out.push_str("    type: select\n");
        out.push_str("    proxies:\n");
        for region in regions {
            for p in proxies.iter().filter(|p| p.region().as_str() == region) {
                out.push_str(&format!("      - {}\n", p.display_name));
            }
        }
        out.push_str("      - DIRECT\n");
    }

    out
}

/// Render the ranked list as pretty JSON records
pub fn render_json(proxies: &[RankedProxy]) -> Result<String> {
    let records: Vec<ProxyRecord> = proxies.iter().map(RankedProxy::to_record).collect();
    Ok(serde_json::to_string_pretty(&records)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{Candidate, ProbeResult, ProbeStatus, RegionCode, ScoredProxy};

    fn ranked(name: &str, host: &str, tag: SourceTag, region: &str, throughput: f64) -> RankedProxy {
        RankedProxy {
            display_name: name.to_string(),
            scored: ScoredProxy {
                probe: ProbeResult::live(
                    Candidate::new(host, 8080, tag),
                    150,
                    throughput,
                    RegionCode::parse(region),
                ),
                score: 40,
            },
        }
    }

    fn sample() -> Vec<RankedProxy> {
        vec![
            ranked("FP-US-01", "1.1.1.1", SourceTag::Fp, "US", 2.5),
            ranked("FP-DE-01", "2.2.2.2", SourceTag::Fp, "DE", 0.0),
            ranked("FP-US-02", "3.3.3.3", SourceTag::Fp, "US", 0.0),
            ranked("66-XX-01", "4.4.4.4", SourceTag::Daili66, "XX", 1.0),
        ]
    }

    #[test]
    fn test_query_filters() {
        let list = sample();
        assert_eq!(ListQuery::new().apply(&list).len(), 4);
        assert_eq!(ListQuery::new().with_source("66").unwrap().apply(&list).len(), 1);
        assert_eq!(ListQuery::new().with_source("all").unwrap().apply(&list).len(), 4);
        assert_eq!(ListQuery::new().with_region("us").apply(&list).len(), 2);
        assert_eq!(ListQuery::new().with_limit(3).apply(&list).len(), 3);

        let us_one = ListQuery::new().with_region("US").with_limit(1).apply(&list);
        assert_eq!(us_one[0].display_name, "FP-US-01");
    }

    #[test]
    fn test_unknown_source_is_rejected() {
        let err = ListQuery::new().with_source("77").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(ListQuery::new().with_source("typo").is_err());
        assert!(ListQuery::new().with_source(" ALL ").unwrap().source.is_none());
    }

    #[test]
    fn test_render_clash() {
        let text = render_clash(&sample(), Utc::now());
        assert!(text.starts_with("# Free proxy subscription\n"));
        assert!(text.contains("  - name: \"FP-US-01\"\n    type: http\n    server: 1.1.1.1\n    port: 8080\n    latency: 150\n    speed: 2.5MB/s\n"));
        assert!(!text.contains("server: 2.2.2.2\n    port: 8080\n    latency: 150\n    speed"));

        let group = text.split("proxy-groups:\n").nth(1).unwrap();
        assert_eq!(
            group,
            "  - name: \"auto-proxy\"\n    type: select\n    proxies:\n      - FP-US-01\n      - FP-US-02\n      - FP-DE-01\n      - DIRECT\n"
        );
    }

    #[test]
    fn test_render_clash_without_known_regions() {
        let list = vec![ranked("66-XX-01", "4.4.4.4", SourceTag::Daili66, "XX", 1.0)];
        let text = render_clash(&list, Utc::now());
        assert!(text.contains("66-XX-01"));
        assert!(!text.contains("proxy-groups:"));
    }

    #[test]
    fn test_render_json() {
        let text = render_json(&sample()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        let first = &value[0];
        assert_eq!(first["displayName"], "FP-US-01");
        assert_eq!(first["protocolType"], "http");
        assert_eq!(first["latencyMs"], 150);
        assert_eq!(first["regionCode"], "US");
        assert!(value[1].get("throughputMBps").is_none());
    }

    #[test]
    fn test_failed_entries_render_without_metrics() {
        let entry = RankedProxy {
            display_name: "FP-FR-01".to_string(),
            scored: ScoredProxy {
                probe: ProbeResult::unreachable(
                    Candidate::new("5.5.5.5", 80, SourceTag::Fp),
                    RegionCode::parse("FR"),
                    ProbeStatus::Timeout,
                ),
                score: 0,
            },
        };
        let text = render_clash(&[entry], Utc::now());
        assert!(!text.contains("latency:"));
        assert!(!text.contains("speed:"));
    }
}
