//! Proxy Sub - free proxy aggregator
//!
//! Harvests candidates from public proxy lists, probes them, resolves their
//! regions and publishes a ranked, region-grouped subscription list.

pub mod cache;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod proxy;
pub mod subscription;

pub use cache::{CacheHandle, CacheStore, MemoryCacheStore, SqliteCacheStore};
pub use config::AppConfig;
pub use error::Error;
pub use pipeline::{Pipeline, RunOutput, RunStats, SecondaryTierPolicy};
pub use proxy::*;
pub use subscription::{render_clash, render_json, ListQuery};

/// Application result type
pub type Result<T> = std::result::Result<T, Error>;
