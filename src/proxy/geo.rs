//! Geolocation module for resolving proxy hosts to region codes
//!
//! Lookups go through a [`GeoCache`] first; only uncached hosts reach a
//! [`GeoLookup`] backend, in batches. Any host a backend fails to answer
//! resolves to the unknown region instead of failing the run.

use crate::proxy::models::RegionCode;
use crate::{Error, Result};
use async_trait::async_trait;
use maxminddb::{geoip2, Reader};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Default ip-api.com batch endpoint
const DEFAULT_IP_API_ENDPOINT: &str = "http://ip-api.com/batch";

/// ip-api.com accepts at most 100 queries per batch request
const DEFAULT_BATCH_SIZE: usize = 100;

const DEFAULT_TIMEOUT_SECS: u64 = 10;

const DEFAULT_CACHE_CAPACITY: usize = 50_000;

/// Host address to region mapping shared across probes and runs.
///
/// Each key is written at most once. Once `capacity` entries are held, new
/// hosts are no longer cached and are simply looked up again next time.
#[derive(Debug)]
pub struct GeoCache {
    entries: RwLock<HashMap<String, RegionCode>>,
    capacity: usize,
}

impl GeoCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    pub async fn get(&self, host: &str) -> Option<RegionCode> {
        self.entries.read().await.get(host).cloned()
    }

    /// Insert a resolved region. Returns false when the host was already
    /// cached or the cache is full.
    pub async fn insert(&self, host: String, region: RegionCode) -> bool {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&host) || entries.len() >= self.capacity {
            return false;
        }
        entries.insert(host, region);
        true
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Copy of every cached entry, for persistence
    pub async fn snapshot(&self) -> HashMap<String, RegionCode> {
        self.entries.read().await.clone()
    }

    /// Seed from a persisted snapshot without overwriting existing entries
    pub async fn seed(&self, snapshot: HashMap<String, RegionCode>) -> usize {
        let mut added = 0;
        for (host, region) in snapshot {
            if self.insert(host, region).await {
                added += 1;
            }
        }
        added
    }
}

impl Default for GeoCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

/// A backend able to resolve many hosts in one call
#[async_trait]
pub trait GeoLookup: Send + Sync {
    /// Resolve a batch of hosts. Hosts missing from the returned map are
    /// treated as unresolved.
    async fn lookup_batch(&self, hosts: &[String]) -> Result<HashMap<String, RegionCode>>;
}

#[derive(Debug, Serialize)]
struct IpApiQuery<'a> {
    query: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiEntry {
    query: String,
    #[serde(default)]
    country_code: Option<String>,
}

/// ip-api.com batch lookup
pub struct IpApiLookup {
    client: Client,
    endpoint: String,
}

impl IpApiLookup {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl GeoLookup for IpApiLookup {
    async fn lookup_batch(&self, hosts: &[String]) -> Result<HashMap<String, RegionCode>> {
        let body: Vec<IpApiQuery<'_>> = hosts.iter().map(|h| IpApiQuery { query: h }).collect();
        let entries: Vec<IpApiEntry> = self
            .client
            .post(&self.endpoint)
            .query(&[("fields", "query,countryCode")])
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(entries
            .into_iter()
            .map(|e| {
                let region = e
                    .country_code
                    .as_deref()
                    .map(RegionCode::parse)
                    .unwrap_or_default();
                (e.query, region)
            })
            .collect())
    }
}

/// GeoLocator for looking up IP addresses in MMDB databases
pub struct GeoLocator {
    reader: Arc<Reader<Vec<u8>>>,
}

impl GeoLocator {
    /// Create a new GeoLocator from an MMDB file path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = Reader::open_readfile(path).map_err(|e| Error::Geo(e.to_string()))?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }

    /// Look up the region for an IP address string
    pub fn lookup(&self, ip_str: &str) -> Result<RegionCode> {
        let ip: IpAddr = ip_str.parse()?;
        self.lookup_ip(ip)
    }

    /// Look up the region for an IpAddr
    pub fn lookup_ip(&self, ip: IpAddr) -> Result<RegionCode> {
        let lookup_result = self.reader.lookup(ip).map_err(|e| Error::Geo(e.to_string()))?;
        let city: Option<geoip2::City> = lookup_result
            .decode()
            .map_err(|e| Error::Geo(e.to_string()))?;

        Ok(city
            .and_then(|c| c.country.iso_code.map(RegionCode::parse))
            .unwrap_or_default())
    }
}

impl Clone for GeoLocator {
    fn clone(&self) -> Self {
        Self {
            reader: Arc::clone(&self.reader),
        }
    }
}

#[async_trait]
impl GeoLookup for GeoLocator {
    async fn lookup_batch(&self, hosts: &[String]) -> Result<HashMap<String, RegionCode>> {
        Ok(hosts
            .iter()
            .filter_map(|h| match self.lookup(h) {
                Ok(region) => Some((h.clone(), region)),
                Err(e) => {
                    debug!(host = %h, "mmdb lookup failed: {}", e);
                    None
                }
            })
            .collect())
    }
}

/// Which lookup backend to use
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum GeoBackend {
    IpApi { endpoint: String },
    Mmdb { path: String },
}

impl Default for GeoBackend {
    fn default() -> Self {
        GeoBackend::IpApi {
            endpoint: DEFAULT_IP_API_ENDPOINT.to_string(),
        }
    }
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_timeout() -> Duration {
    Duration::from_secs(DEFAULT_TIMEOUT_SECS)
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

/// Configuration for geolocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoConfig {
    #[serde(default)]
    pub backend: GeoBackend,
    /// Maximum hosts per backend call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Timeout of a single backend call
    #[serde(default = "default_timeout", with = "crate::config::duration_ms")]
    pub timeout: Duration,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            backend: GeoBackend::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            timeout: default_timeout(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl GeoConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend: GeoBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the configured backend
    pub fn build_backend(&self) -> Result<Arc<dyn GeoLookup>> {
        Ok(match &self.backend {
            GeoBackend::IpApi { endpoint } => Arc::new(IpApiLookup::new(endpoint, self.timeout)?),
            GeoBackend::Mmdb { path } => Arc::new(GeoLocator::from_path(path)?),
        })
    }
}

/// Cached, batched host to region resolution
#[derive(Clone)]
pub struct GeoResolver {
    backend: Arc<dyn GeoLookup>,
    cache: Arc<GeoCache>,
    batch_size: usize,
}

impl GeoResolver {
    pub fn new(backend: Arc<dyn GeoLookup>, cache: Arc<GeoCache>, batch_size: usize) -> Self {
        Self {
            backend,
            cache,
            batch_size: batch_size.max(1),
        }
    }

    pub fn cache(&self) -> &Arc<GeoCache> {
        &self.cache
    }

    /// Resolve every host, returning a region for each (unknown on failure)
    pub async fn resolve(&self, hosts: &[String]) -> HashMap<String, RegionCode> {
        let mut seen = HashSet::new();
        let mut uncached = Vec::new();
        for host in hosts {
            if seen.insert(host.as_str()) && self.cache.get(host).await.is_none() {
                uncached.push(host.clone());
            }
        }

        if !uncached.is_empty() {
            info!(
                "resolving {} uncached hosts in batches of {}",
                uncached.len(),
                self.batch_size
            );
        }

        let mut resolved = HashMap::new();
        for batch in uncached.chunks(self.batch_size) {
            match self.backend.lookup_batch(batch).await {
                Ok(regions) => {
                    for (host, region) in regions {
                        self.cache.insert(host.clone(), region.clone()).await;
                        resolved.insert(host, region);
                    }
                }
                Err(e) => warn!("geo batch of {} hosts failed: {}", batch.len(), e),
            }
        }

        let mut result = HashMap::with_capacity(seen.len());
        for host in seen {
            let region = match self.cache.get(host).await {
                Some(region) => region,
                None => resolved.get(host).cloned().unwrap_or_default(),
            };
            result.insert(host.to_string(), region);
        }
        result
    }
}
