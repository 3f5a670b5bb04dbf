//! End-to-end pipeline run and cache-aware access to its output
//!
//! A run crawls every source, deduplicates and filters candidates, resolves
//! regions, probes, scores and ranks. Per-source and per-candidate failures
//! only show up in [`RunStats`]; the run itself fails only when every source
//! failed.

use crate::cache::{CacheHandle, KEY_GEO_CACHE, KEY_PROXIES, KEY_TEST_DETAILS, KEY_TEST_STATS};
use crate::config::AppConfig;
use crate::proxy::{
    dedup_candidates, Candidate, CrawlResult, GeoCache, GeoLookup, GeoResolver, ProbeResult,
    ProbeStatus, ProxyChecker, ProxyCrawler, RankedProxy, Ranker, RegionCode, SafetyFilter,
    SourceReport, SourceTier,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Latency assigned to secondary-tier entries that are not probed
const PLACEHOLDER_LATENCY_MS: u64 = 1000;

/// Throughput assigned to secondary-tier entries that are not probed
const PLACEHOLDER_THROUGHPUT_MBPS: f64 = 1.0;

/// How long a persisted geolocation cache stays valid
const GEO_CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Treatment of candidates from the secondary source tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SecondaryTierPolicy {
    /// Skip probing; assign placeholder latency, throughput and score
    #[default]
    Placeholder,
    /// Probe and score like the primary tier
    Probe,
}

/// Per-source-tag counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceCounts {
    pub found: usize,
    pub valid: usize,
    pub failed: usize,
}

/// Summary of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub run_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
    pub source_count: usize,
    /// Unique candidates after deduplication
    pub candidates_found: usize,
    /// Candidates dropped by the safety filter
    pub rejected_count: usize,
    /// Candidates actually probed
    pub tested_count: usize,
    /// Probed candidates that passed liveness
    pub valid_count: usize,
    pub failed_count: usize,
    /// Secondary-tier entries given placeholder metrics
    pub untested_count: usize,
    pub success_rate_percent: f64,
    pub per_source_counts: BTreeMap<String, SourceCounts>,
    /// Live entries per region, before region exclusion
    pub per_region_counts: BTreeMap<String, usize>,
    pub sources: Vec<SourceReport>,
}

impl RunStats {
    fn collect(
        run_id: Uuid,
        start_time: DateTime<Utc>,
        reports: Vec<SourceReport>,
        candidates_found: usize,
        rejected_count: usize,
        details: &[ProbeResult],
    ) -> Self {
        let end_time = Utc::now();
        let mut per_source_counts: BTreeMap<String, SourceCounts> = BTreeMap::new();
        let mut per_region_counts: BTreeMap<String, usize> = BTreeMap::new();
        let (mut tested, mut valid, mut untested) = (0, 0, 0);

        for result in details {
            let counts = per_source_counts
                .entry(result.candidate.source.label().to_string())
                .or_default();
            counts.found += 1;
            if result.is_live() {
                counts.valid += 1;
                *per_region_counts
                    .entry(result.region_code.to_string())
                    .or_default() += 1;
            } else {
                counts.failed += 1;
            }

            if result.status == ProbeStatus::Untested {
                untested += 1;
            } else {
                tested += 1;
                if result.is_live() {
                    valid += 1;
                }
            }
        }

        let success_rate_percent = if tested > 0 {
            (valid as f64 / tested as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };

        Self {
            run_id,
            start_time,
            end_time,
            duration_ms: (end_time - start_time).num_milliseconds().max(0) as u64,
            source_count: reports.len(),
            candidates_found,
            rejected_count,
            tested_count: tested,
            valid_count: valid,
            failed_count: tested - valid,
            untested_count: untested,
            success_rate_percent,
            per_source_counts,
            per_region_counts,
            sources: reports,
        }
    }
}

/// Everything a run produces
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub ranked: Vec<RankedProxy>,
    pub stats: RunStats,
    /// Every probe result, live or not
    pub details: Vec<ProbeResult>,
}

/// The probing and ranking pipeline
pub struct Pipeline {
    config: AppConfig,
    crawler: ProxyCrawler,
    filter: SafetyFilter,
    geo: GeoResolver,
    checker: ProxyChecker,
    ranker: Ranker,
    cache: CacheHandle,
}

impl Pipeline {
    /// Build a pipeline with the geolocation backend named in the config
    pub fn new(config: AppConfig, cache: CacheHandle) -> Result<Self> {
        let backend = config.geo.build_backend()?;
        Self::with_geo_backend(config, cache, backend)
    }

    /// Build a pipeline with an explicit geolocation backend
    pub fn with_geo_backend(
        config: AppConfig,
        cache: CacheHandle,
        backend: Arc<dyn GeoLookup>,
    ) -> Result<Self> {
        config.validate()?;
        let geo_cache = Arc::new(GeoCache::new(config.geo.cache_capacity));
        Ok(Self {
            crawler: ProxyCrawler::with_config(config.crawler.clone())?,
            filter: SafetyFilter::new(config.filter.clone()),
            geo: GeoResolver::new(backend, geo_cache, config.geo.batch_size),
            checker: ProxyChecker::with_config(config.checker.clone()),
            ranker: Ranker::new(config.ranker.clone()),
            config,
            cache,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Run the whole pipeline once
    pub async fn run(&self) -> Result<RunOutput> {
        let run_id = Uuid::new_v4();
        let start_time = Utc::now();
        let clock = Instant::now();
        info!(%run_id, "pipeline run started with {} sources", self.config.sources.len());

        self.load_geo_cache().await;

        let crawled = self.crawler.crawl_sources_with_results(&self.config.sources).await;
        if !crawled.is_empty() && crawled.iter().all(|r| !r.is_success()) {
            warn!(%run_id, "every source failed");
            return Err(Error::AllSourcesFailed(crawled.len()));
        }
        let reports: Vec<SourceReport> = crawled.iter().map(CrawlResult::report).collect();
        let harvested: Vec<Candidate> = crawled.into_iter().flat_map(|r| r.candidates).collect();

        let harvested_count = harvested.len();
        let unique = dedup_candidates(harvested);
        let candidates_found = unique.len();
        let (allowed, rejected) = self.filter.apply(unique);
        info!(
            "{} harvested, {} unique, {} rejected by safety filter",
            harvested_count, candidates_found, rejected
        );

        let hosts: Vec<String> = allowed.iter().map(|c| c.host.clone()).collect();
        let regions = self.geo.resolve(&hosts).await;

        let (to_probe, untested) = self.split_by_tier(allowed, &regions);
        let deadline = self.config.checker.run_deadline.and_then(|d| clock.checked_add(d));
        let mut details = self.checker.probe_all_until(to_probe, deadline).await;
        details.extend(untested);

        let scored = self.ranker.score_all(details.clone());
        let ranked = self.ranker.rank(scored);

        let stats = RunStats::collect(run_id, start_time, reports, candidates_found, rejected, &details);
        info!(
            %run_id,
            "run finished in {}ms: tested {}, valid {}, failed {}, ranked {}",
            stats.duration_ms,
            stats.tested_count,
            stats.valid_count,
            stats.failed_count,
            ranked.len()
        );

        self.save_geo_cache().await;

        Ok(RunOutput {
            ranked,
            stats,
            details,
        })
    }

    /// Pair each candidate with its region and separate the ones that get
    /// placeholder metrics instead of a probe
    fn split_by_tier(
        &self,
        candidates: Vec<Candidate>,
        regions: &HashMap<String, RegionCode>,
    ) -> (Vec<(Candidate, RegionCode)>, Vec<ProbeResult>) {
        let mut to_probe = Vec::new();
        let mut untested = Vec::new();
        for candidate in candidates {
            let region = regions.get(&candidate.host).cloned().unwrap_or_default();
            let skip_probe = candidate.source.tier() == SourceTier::Secondary
                && self.config.secondary_tier == SecondaryTierPolicy::Placeholder;
            if skip_probe {
                untested.push(ProbeResult::untested(
                    candidate,
                    PLACEHOLDER_LATENCY_MS,
                    PLACEHOLDER_THROUGHPUT_MBPS,
                    region,
                ));
            } else {
                to_probe.push((candidate, region));
            }
        }
        debug!("{} to probe, {} with placeholder metrics", to_probe.len(), untested.len());
        (to_probe, untested)
    }

    /// Run and persist the ranked list, statistics and probe details
    pub async fn refresh(&self) -> Result<RunOutput> {
        let output = self.run().await?;
        let ttl = self.config.cache_ttl;
        self.cache.put_json(KEY_PROXIES, &output.ranked, ttl).await;
        self.cache.put_json(KEY_TEST_STATS, &output.stats, ttl).await;
        self.cache.put_json(KEY_TEST_DETAILS, &output.details, ttl).await;
        Ok(output)
    }

    /// Cached ranked list, refreshing when absent or expired
    pub async fn proxies(&self) -> Result<Vec<RankedProxy>> {
        if let Some(ranked) = self.cache.get_json::<Vec<RankedProxy>>(KEY_PROXIES).await {
            debug!("serving {} proxies from cache", ranked.len());
            return Ok(ranked);
        }
        Ok(self.refresh().await?.ranked)
    }

    /// Statistics of the last persisted run
    pub async fn stats(&self) -> Option<RunStats> {
        self.cache.get_json(KEY_TEST_STATS).await
    }

    /// Probe results of the last persisted run
    pub async fn details(&self) -> Option<Vec<ProbeResult>> {
        self.cache.get_json(KEY_TEST_DETAILS).await
    }

    async fn load_geo_cache(&self) {
        if let Some(snapshot) = self
            .cache
            .get_json::<HashMap<String, RegionCode>>(KEY_GEO_CACHE)
            .await
        {
            let added = self.geo.cache().seed(snapshot).await;
            debug!("seeded geo cache with {} entries", added);
        }
    }

    async fn save_geo_cache(&self) {
        if !self.cache.is_enabled() {
            return;
        }
        let snapshot = self.geo.cache().snapshot().await;
        self.cache.put_json(KEY_GEO_CACHE, &snapshot, GEO_CACHE_TTL).await;
    }
}
