//! Proxy checker module for live probing of candidates
//!
//! Candidates are probed in fixed-size batches: every probe of a batch runs
//! concurrently, the next batch starts only once the whole batch settled, and
//! a short pause separates batches. Each probe carries its own timeout.

use crate::proxy::models::{Candidate, ProbeResult, ProbeStatus, RegionCode};
use crate::Result;
use futures::future::join_all;
use reqwest::{Client, Proxy as ReqwestProxy};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default timeout for each probe in milliseconds
const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Default number of probes per batch
const DEFAULT_CONCURRENCY: usize = 20;

/// Default pause between batches in milliseconds
const DEFAULT_BATCH_PAUSE_MS: u64 = 100;

/// Default bound on the whole probing phase in seconds
const DEFAULT_RUN_DEADLINE_SECS: u64 = 600;

/// Default URL to test proxies against
const DEFAULT_TEST_URL: &str = "https://httpbin.org/get";

/// Default payload used for the throughput probe (1 MB)
const DEFAULT_THROUGHPUT_URL: &str = "https://speed.cloudflare.com/__down?bytes=1000000";

fn default_timeout() -> Duration {
    Duration::from_millis(DEFAULT_TIMEOUT_MS)
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_batch_pause() -> Duration {
    Duration::from_millis(DEFAULT_BATCH_PAUSE_MS)
}

fn default_run_deadline() -> Option<Duration> {
    Some(Duration::from_secs(DEFAULT_RUN_DEADLINE_SECS))
}

fn default_test_url() -> String {
    DEFAULT_TEST_URL.to_string()
}

fn default_throughput_url() -> Option<String> {
    Some(DEFAULT_THROUGHPUT_URL.to_string())
}

/// Configuration for proxy checker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckerConfig {
    /// Timeout for each liveness probe
    #[serde(default = "default_timeout", with = "crate::config::duration_ms")]
    pub timeout: Duration,
    /// Timeout for each throughput probe
    #[serde(default = "default_timeout", with = "crate::config::duration_ms")]
    pub throughput_timeout: Duration,
    /// Number of probes per batch
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Pause between two batches
    #[serde(default = "default_batch_pause", with = "crate::config::duration_ms")]
    pub batch_pause: Duration,
    /// Bound on the whole probing phase; candidates not started by then are
    /// recorded as skipped
    #[serde(default = "default_run_deadline", with = "crate::config::opt_duration_ms")]
    pub run_deadline: Option<Duration>,
    /// URL requested through each candidate for the liveness probe
    #[serde(default = "default_test_url")]
    pub test_url: String,
    /// Payload downloaded through live candidates; `None` disables the
    /// throughput probe
    #[serde(default = "default_throughput_url")]
    pub throughput_url: Option<String>,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            throughput_timeout: default_timeout(),
            concurrency: DEFAULT_CONCURRENCY,
            batch_pause: default_batch_pause(),
            run_deadline: default_run_deadline(),
            test_url: default_test_url(),
            throughput_url: default_throughput_url(),
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_throughput_timeout(mut self, timeout: Duration) -> Self {
        self.throughput_timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_batch_pause(mut self, pause: Duration) -> Self {
        self.batch_pause = pause;
        self
    }

    pub fn with_run_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.run_deadline = deadline;
        self
    }

    pub fn with_test_url(mut self, url: String) -> Self {
        self.test_url = url;
        self
    }

    pub fn with_throughput_url(mut self, url: Option<String>) -> Self {
        self.throughput_url = url;
        self
    }
}

/// Proxy checker performing liveness and throughput probes
#[derive(Debug, Clone)]
pub struct ProxyChecker {
    config: CheckerConfig,
}

impl ProxyChecker {
    /// Create a new proxy checker with default configuration
    pub fn new() -> Self {
        Self::with_config(CheckerConfig::default())
    }

    /// Create a new proxy checker with custom configuration
    pub fn with_config(config: CheckerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Probe a single candidate. Never fails: errors become an unreachable
    /// result.
    ///
    /// Only a 2xx answer to the test URL counts as live; any other status
    /// relayed by the proxy is recorded as `Failed`. A failed or slow
    /// throughput download keeps the candidate live with throughput 0.
    pub async fn probe(&self, candidate: Candidate, region: RegionCode) -> ProbeResult {
        let client = match self.create_client(&candidate) {
            Ok(client) => client,
            Err(e) => {
                return ProbeResult::unreachable(candidate, region, ProbeStatus::Failed(e.to_string()))
            }
        };

        let start = Instant::now();
        let liveness = tokio::time::timeout(
            self.config.timeout,
            client.get(&self.config.test_url).send(),
        )
        .await;

        let latency_ms = match liveness {
            Ok(Ok(response)) if response.status().is_success() => start.elapsed().as_millis() as u64,
            Ok(Ok(response)) => {
                let status = ProbeStatus::Failed(format!("HTTP status: {}", response.status()));
                return ProbeResult::unreachable(candidate, region, status);
            }
            Ok(Err(e)) if e.is_timeout() => {
                return ProbeResult::unreachable(candidate, region, ProbeStatus::Timeout)
            }
            Ok(Err(e)) => {
                return ProbeResult::unreachable(candidate, region, ProbeStatus::Failed(e.to_string()))
            }
            Err(_) => return ProbeResult::unreachable(candidate, region, ProbeStatus::Timeout),
        };

        let throughput = match &self.config.throughput_url {
            Some(url) => self.measure_throughput(&client, url).await.unwrap_or_else(|e| {
                debug!(proxy = %candidate, "throughput probe failed: {}", e);
                0.0
            }),
            None => 0.0,
        };

        ProbeResult::live(candidate, latency_ms, throughput, region)
    }

    /// Download the throughput payload through the proxy, in MB/s rounded
    /// to one decimal
    async fn measure_throughput(&self, client: &Client, url: &str) -> Result<f64> {
        let start = Instant::now();
        let download = async {
            let response = client.get(url).send().await?.error_for_status()?;
            response.bytes().await
        };

        let bytes = match tokio::time::timeout(self.config.throughput_timeout, download).await {
            Ok(result) => result?,
            Err(_) => return Ok(0.0),
        };

        Ok(throughput_mbps(bytes.len(), start.elapsed()))
    }

    /// Probe every candidate, batch by batch, with the configured run deadline
    pub async fn probe_all(&self, candidates: Vec<(Candidate, RegionCode)>) -> Vec<ProbeResult> {
        let deadline = self.config.run_deadline.and_then(|d| Instant::now().checked_add(d));
        self.probe_all_until(candidates, deadline).await
    }

    /// Probe every candidate, batch by batch. Batches that would start after
    /// `deadline` are not probed; their candidates are recorded as skipped.
    pub async fn probe_all_until(
        &self,
        candidates: Vec<(Candidate, RegionCode)>,
        deadline: Option<Instant>,
    ) -> Vec<ProbeResult> {
        let total = candidates.len();
        let width = self.config.concurrency.max(1);
        let mut results = Vec::with_capacity(total);
        let mut batches = candidates.chunks(width).peekable();

        while let Some(batch) = batches.next() {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                let remaining = total - results.len();
                warn!("probe deadline reached, skipping {} candidates", remaining);
                results.extend(batch.iter().cloned().map(|(c, r)| {
                    ProbeResult::unreachable(c, r, ProbeStatus::Skipped)
                }));
                for rest in batches.by_ref() {
                    results.extend(rest.iter().cloned().map(|(c, r)| {
                        ProbeResult::unreachable(c, r, ProbeStatus::Skipped)
                    }));
                }
                break;
            }

            let tested = join_all(
                batch
                    .iter()
                    .cloned()
                    .map(|(candidate, region)| self.probe(candidate, region)),
            )
            .await;
            results.extend(tested);

            info!("tested {}/{}", results.len(), total);

            if batches.peek().is_some() && !self.config.batch_pause.is_zero() {
                tokio::time::sleep(self.config.batch_pause).await;
            }
        }

        results
    }

    /// Create a reqwest client routed through the candidate
    fn create_client(&self, candidate: &Candidate) -> Result<Client> {
        let proxy = ReqwestProxy::all(candidate.url())?;

        let client = Client::builder()
            .proxy(proxy)
            .timeout(self.config.timeout.max(self.config.throughput_timeout))
            .build()?;

        Ok(client)
    }
}

impl Default for ProxyChecker {
    fn default() -> Self {
        Self::new()
    }
}

/// Convert a transfer to MB/s, rounded to one decimal
pub fn throughput_mbps(bytes: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if bytes == 0 || secs <= 0.0 {
        return 0.0;
    }
    let mbps = bytes as f64 / 1_000_000.0 / secs;
    (mbps * 10.0).round() / 10.0
}
