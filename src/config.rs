//! Application configuration
//!
//! Every field has a default, so an empty JSON object (or no file at all)
//! yields a working configuration.

use crate::pipeline::SecondaryTierPolicy;
use crate::proxy::{
    CheckerConfig, CrawlerConfig, FilterConfig, GeoConfig, ProxySource, RankerConfig, RegionCode,
};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Default lifetime of cached pipeline output in seconds
const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

fn default_cache_ttl() -> Duration {
    Duration::from_secs(DEFAULT_CACHE_TTL_SECS)
}

/// Full application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default = "ProxySource::defaults")]
    pub sources: Vec<ProxySource>,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub checker: CheckerConfig,
    #[serde(default)]
    pub geo: GeoConfig,
    #[serde(default)]
    pub ranker: RankerConfig,
    #[serde(default)]
    pub secondary_tier: SecondaryTierPolicy,
    /// Lifetime of cached lists and statistics
    #[serde(default = "default_cache_ttl", with = "duration_secs")]
    pub cache_ttl: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sources: ProxySource::defaults(),
            crawler: CrawlerConfig::default(),
            filter: FilterConfig::default(),
            checker: CheckerConfig::default(),
            geo: GeoConfig::default(),
            ranker: RankerConfig::default(),
            secondary_tier: SecondaryTierPolicy::default(),
            cache_ttl: default_cache_ttl(),
        }
    }
}

impl AppConfig {
    /// Parse and validate a JSON configuration document
    pub fn from_json(text: &str) -> Result<Self> {
        let config: AppConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file; a missing file falls back to defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!("config {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json(&text)?;
        info!("loaded config from {} ({} sources)", path.display(), config.sources.len());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(Error::Config("at least one source is required".to_string()));
        }
        if self.checker.concurrency == 0 {
            return Err(Error::Config("checker.concurrency must be positive".to_string()));
        }
        if self.geo.batch_size == 0 {
            return Err(Error::Config("geo.batchSize must be positive".to_string()));
        }
        for region in &self.ranker.excluded_regions {
            RegionCode::try_new(region)?;
        }
        Ok(())
    }
}

/// `Duration` as integer milliseconds
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// `Option<Duration>` as integer milliseconds or null
pub mod opt_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

/// `Duration` as integer seconds
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
