//! Proxy parser module for decoding source payloads into candidates
//!
//! Three encodings are understood:
//! - plain text lists, one `host:port` (optionally `http://host:port`) per line
//! - free-proxy-list style HTML tables
//! - the 66daili JSON API payload (`{code, data: [{ip, port}]}`)

use crate::proxy::crawler::SourceFormat;
use crate::proxy::models::{Candidate, SourceTag};
use crate::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use tracing::{debug, warn};

/// `scheme://host:port` lines
static URL_LINE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:https?|socks[45])://([^:/\s@]+):(\d+)/?$").expect("Invalid URL line regex")
});

/// Loose `IP:PORT` occurrences anywhere in a document
static IP_PORT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}):(\d{1,5})\b")
        .expect("Invalid IP:PORT regex")
});

/// Dotted DNS name ending in an alphabetic TLD
static HOSTNAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?\.)+[A-Za-z]{2,63}$")
        .expect("Invalid hostname regex")
});

/// One table row: ip, port, country code, optional country name, anonymity,
/// google flag, https flag.
static TABLE_ROW_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"<tr>\s*<td>([\d.]+)</td>\s*<td>(\d+)</td>\s*<td>([A-Za-z]{2})</td>\s*",
        r#"(?:<td class=['"]hm['"]>[^<]*</td>\s*)?"#,
        r"<td>([^<]+)</td>\s*<td[^>]*>([^<]*)</td>\s*<td[^>]*>([^<]*)</td>",
    ))
    .expect("Invalid table row regex")
});

/// A row of a free-proxy-list style HTML table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlRow {
    pub ip: String,
    pub port: u16,
    pub country: String,
    pub anonymity: String,
    pub google: bool,
    pub https: bool,
}

#[derive(Debug, Deserialize)]
struct ApiPayload {
    code: i64,
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

/// Proxy parser for decoding source payloads
pub struct ProxyParser;

impl ProxyParser {
    /// Parse a single proxy line
    ///
    /// Supports formats:
    /// - HOST:PORT
    /// - scheme://HOST:PORT
    pub fn parse_line(line: &str, tag: SourceTag) -> Option<Candidate> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let (host, port) = match URL_LINE_REGEX.captures(line) {
            Some(caps) => (caps.get(1)?.as_str(), caps.get(2)?.as_str()),
            None => line.split_once(':')?,
        };
        if !is_valid_host(host) {
            return None;
        }
        let port: u16 = port.parse().ok()?;
        Some(Candidate::new(host, port, tag))
    }

    /// Parse candidates from a string (multiple lines)
    pub fn parse_string(content: &str, tag: SourceTag) -> Vec<Candidate> {
        content
            .lines()
            .filter_map(|line| Self::parse_line(line, tag))
            .collect()
    }

    /// Line parsing, falling back to loose IP:PORT extraction when no line
    /// parses on its own
    pub fn parse_text(content: &str, tag: SourceTag) -> Vec<Candidate> {
        let candidates = Self::parse_string(content, tag);
        if !candidates.is_empty() {
            return candidates;
        }
        Self::extract_with_regex(content, tag)
    }

    /// Extract candidates using regex pattern matching
    pub fn extract_with_regex(content: &str, tag: SourceTag) -> Vec<Candidate> {
        IP_PORT_REGEX
            .captures_iter(content)
            .filter_map(|cap| {
                let host = cap.get(1)?.as_str();
                let port: u16 = cap.get(2)?.as_str().parse().ok()?;

                // Validate IP address parts
                for part in host.split('.') {
                    let num: u32 = part.parse().ok()?;
                    if num > 255 {
                        return None;
                    }
                }

                Some(Candidate::new(host, port, tag))
            })
            .collect()
    }

    /// Extract every table row, regardless of its flags
    pub fn parse_html_rows(content: &str) -> Vec<HtmlRow> {
        TABLE_ROW_REGEX
            .captures_iter(content)
            .filter_map(|caps| {
                Some(HtmlRow {
                    ip: caps[1].to_string(),
                    port: caps[2].parse().ok()?,
                    country: caps[3].to_ascii_uppercase(),
                    anonymity: caps[4].trim().to_string(),
                    google: is_yes(&caps[5]),
                    https: is_yes(&caps[6]),
                })
            })
            .collect()
    }

    /// Parse an HTML proxy table, keeping only rows that are reachable through
    /// Google. A body without any matching row is treated as a plain list.
    pub fn parse_html(content: &str, tag: SourceTag) -> Vec<Candidate> {
        let rows = Self::parse_html_rows(content);
        if rows.is_empty() {
            debug!("no table rows found, parsing body as a plain list");
            return Self::parse_text(content, tag);
        }

        let total = rows.len();
        let candidates: Vec<Candidate> = rows
            .into_iter()
            .filter(|row| row.google)
            .map(|row| Candidate::new(row.ip, row.port, tag))
            .collect();
        debug!("kept {} of {} table rows flagged google-accessible", candidates.len(), total);
        candidates
    }

    /// Parse a JSON API payload. A non-zero `code` yields no candidates; a body
    /// that is not a payload at all is an error.
    pub fn parse_json_api(content: &str, tag: SourceTag) -> Result<Vec<Candidate>> {
        let payload: ApiPayload = serde_json::from_str(content)?;
        if payload.code != 0 {
            warn!("json api returned code {}, ignoring payload", payload.code);
            return Ok(Vec::new());
        }

        Ok(payload
            .data
            .iter()
            .filter_map(|entry| {
                let ip = entry.get("ip")?.as_str()?.trim();
                let port = match entry.get("port")? {
                    serde_json::Value::Number(n) => n.as_u64()?,
                    serde_json::Value::String(s) => s.trim().parse().ok()?,
                    _ => return None,
                };
                let port = u16::try_from(port).ok()?;
                (!ip.is_empty()).then(|| Candidate::new(ip, port, tag))
            })
            .collect())
    }

    /// Decode a saved source payload with the format's default tag
    pub fn parse_file<P: AsRef<Path>>(path: P, format: SourceFormat) -> Result<Vec<Candidate>> {
        let content = fs::read_to_string(path)?;
        format.decode(&content, format.default_tag())
    }
}

/// Literal IP or dotted hostname
fn is_valid_host(host: &str) -> bool {
    host.parse::<IpAddr>().is_ok() || HOSTNAME_REGEX.is_match(host)
}

fn is_yes(flag: &str) -> bool {
    flag.trim().eq_ignore_ascii_case("yes")
}
