//! Scoring and per-region ranking

use crate::proxy::labels;
use crate::proxy::models::{ProbeResult, ProbeStatus, RankedProxy, RegionCode, ScoredProxy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default number of proxies kept per region
const DEFAULT_MAX_PER_REGION: usize = 10;

/// Default score given to entries of an untested tier
const DEFAULT_PLACEHOLDER_SCORE: u64 = 100;

/// Rank score of a latency/throughput pair.
///
/// Decreasing in latency, increasing in throughput. The +100 offset keeps the
/// divisor positive and the +1 offset keeps a zero throughput scoring.
pub fn compute_score(latency_ms: i64, throughput_mbps: f64) -> u64 {
    let latency = latency_ms.max(0) as f64;
    let throughput = throughput_mbps.max(0.0);
    ((10_000.0 / (latency + 100.0)) * (throughput + 1.0)).round() as u64
}

/// How regions appear inside display names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LabelStyle {
    /// Raw two-letter code, e.g. `FP-US-01`
    #[default]
    Code,
    /// Localized region name, e.g. `FP-美国-01`
    Localized,
}

impl LabelStyle {
    pub fn label(&self, region: &RegionCode) -> String {
        match self {
            LabelStyle::Code => region.as_str().to_string(),
            LabelStyle::Localized => labels::localized_name(region.as_str())
                .unwrap_or(region.as_str())
                .to_string(),
        }
    }
}

fn default_max_per_region() -> usize {
    DEFAULT_MAX_PER_REGION
}

fn default_excluded_regions() -> Vec<String> {
    ["RU", "CN", "KP", "IR", "SY"].into_iter().map(String::from).collect()
}

fn default_placeholder_score() -> u64 {
    DEFAULT_PLACEHOLDER_SCORE
}

/// Configuration for scoring and ranking
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankerConfig {
    /// Maximum proxies kept per region
    #[serde(default = "default_max_per_region")]
    pub max_per_region: usize,
    /// Regions never emitted
    #[serde(default = "default_excluded_regions")]
    pub excluded_regions: Vec<String>,
    #[serde(default)]
    pub label_style: LabelStyle,
    /// Score of results that carry placeholder metrics
    #[serde(default = "default_placeholder_score")]
    pub placeholder_score: u64,
}

impl Default for RankerConfig {
    fn default() -> Self {
        Self {
            max_per_region: DEFAULT_MAX_PER_REGION,
            excluded_regions: default_excluded_regions(),
            label_style: LabelStyle::default(),
            placeholder_score: DEFAULT_PLACEHOLDER_SCORE,
        }
    }
}

impl RankerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_per_region(mut self, max: usize) -> Self {
        self.max_per_region = max;
        self
    }

    pub fn with_excluded_regions(mut self, regions: Vec<String>) -> Self {
        self.excluded_regions = regions;
        self
    }

    pub fn with_label_style(mut self, style: LabelStyle) -> Self {
        self.label_style = style;
        self
    }

    pub fn with_placeholder_score(mut self, score: u64) -> Self {
        self.placeholder_score = score;
        self
    }
}

/// Scores probe results and ranks them per region
#[derive(Debug, Clone)]
pub struct Ranker {
    config: RankerConfig,
}

impl Ranker {
    pub fn new(config: RankerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RankerConfig {
        &self.config
    }

    /// Score a probe result; failed probes have no score
    pub fn score(&self, probe: &ProbeResult) -> Option<u64> {
        if !probe.is_live() {
            return None;
        }
        Some(match probe.status {
            ProbeStatus::Untested => self.config.placeholder_score,
            _ => compute_score(probe.latency_ms, probe.throughput_mbps),
        })
    }

    /// Keep live results and attach their score
    pub fn score_all(&self, probes: Vec<ProbeResult>) -> Vec<ScoredProxy> {
        probes
            .into_iter()
            .filter_map(|probe| self.score(&probe).map(|score| ScoredProxy { probe, score }))
            .collect()
    }

    pub fn is_excluded(&self, region: &RegionCode) -> bool {
        self.config
            .excluded_regions
            .iter()
            .any(|r| r.eq_ignore_ascii_case(region.as_str()))
    }

    /// Group by region, sort each group by descending score, truncate to the
    /// per-region cap and name entries `<tag>-<region>-<rank>`.
    ///
    /// Ties keep input order. Regions are emitted in order of their best score.
    pub fn rank(&self, mut scored: Vec<ScoredProxy>) -> Vec<RankedProxy> {
        scored.sort_by(|a, b| b.score.cmp(&a.score));

        let mut order: Vec<RegionCode> = Vec::new();
        let mut groups: HashMap<RegionCode, Vec<ScoredProxy>> = HashMap::new();
        for proxy in scored {
            if self.is_excluded(proxy.region()) {
                continue;
            }
            let region = proxy.region().clone();
            if !groups.contains_key(&region) {
                order.push(region.clone());
            }
            groups.entry(region).or_default().push(proxy);
        }

        let mut ranked = Vec::new();
        for region in order {
            let Some(group) = groups.remove(&region) else {
                continue;
            };
            let label = self.config.label_style.label(&region);
            for (i, proxy) in group.into_iter().take(self.config.max_per_region).enumerate() {
                ranked.push(RankedProxy {
                    display_name: format!("{}-{}-{:02}", proxy.source().label(), label, i + 1),
                    scored: proxy,
                });
            }
        }
        ranked
    }
}

impl Default for Ranker {
    fn default() -> Self {
        Self::new(RankerConfig::default())
    }
}
