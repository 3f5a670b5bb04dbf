//! Candidate deduplication and safety filtering
//!
//! Both run before any network probe, so internal addresses are never
//! contacted and probe budget is not spent on duplicates.

use crate::proxy::models::Candidate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::IpAddr;

/// Collapse candidates to one per `(host, port)`.
///
/// Higher-trust tiers are considered first so an address accepted by a
/// primary source is never re-added under a secondary tag. Within a tier the
/// first occurrence wins and first-seen order is preserved.
pub fn dedup_candidates(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    // stable: keeps first-seen order inside each tier
    candidates.sort_by_key(|c| c.source.tier());

    let mut seen = HashSet::with_capacity(candidates.len());
    candidates.retain(|c| seen.insert((c.host.clone(), c.port)));
    candidates
}

fn default_blocked_prefixes() -> Vec<String> {
    ["192.168.", "10.", "172.16.", "127.", "localhost"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_true() -> bool {
    true
}

/// Configuration for the safety filter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterConfig {
    /// Host prefixes that are never probed
    #[serde(default = "default_blocked_prefixes")]
    pub blocked_prefixes: Vec<String>,
    /// Also reject literal IPs in private, loopback, link-local or
    /// unspecified ranges
    #[serde(default = "default_true")]
    pub block_private_ranges: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            blocked_prefixes: default_blocked_prefixes(),
            block_private_ranges: true,
        }
    }
}

impl FilterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blocked_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.blocked_prefixes = prefixes;
        self
    }

    pub fn with_block_private_ranges(mut self, block: bool) -> Self {
        self.block_private_ranges = block;
        self
    }
}

/// Predicate rejecting candidates that must never be probed
#[derive(Debug, Clone)]
pub struct SafetyFilter {
    config: FilterConfig,
}

impl SafetyFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    pub fn allows(&self, candidate: &Candidate) -> bool {
        let host = candidate.host.trim();
        if host.is_empty() || candidate.port == 0 {
            return false;
        }

        let lower = host.to_ascii_lowercase();
        if self
            .config
            .blocked_prefixes
            .iter()
            .any(|prefix| lower.starts_with(&prefix.to_ascii_lowercase()))
        {
            return false;
        }

        if self.config.block_private_ranges {
            if let Ok(ip) = host.parse::<IpAddr>() {
                return !is_internal(&ip);
            }
        }

        true
    }

    /// Split candidates into `(allowed, rejected_count)`
    pub fn apply(&self, candidates: Vec<Candidate>) -> (Vec<Candidate>, usize) {
        let before = candidates.len();
        let allowed: Vec<Candidate> = candidates.into_iter().filter(|c| self.allows(c)).collect();
        let rejected = before - allowed.len();
        (allowed, rejected)
    }
}

impl Default for SafetyFilter {
    fn default() -> Self {
        Self::new(FilterConfig::default())
    }
}

fn is_internal(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local, fe80::/10 link local
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}
