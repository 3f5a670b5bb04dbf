//! Error types shared by every pipeline stage

use thiserror::Error;

/// Errors produced by the proxy pipeline
#[derive(Debug, Error)]
pub enum Error {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("geolocation error: {0}")]
    Geo(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// A single source could not be fetched or decoded
    #[error("source {source_addr} failed: {message}")]
    Source {
        source_addr: String,
        message: String,
    },

    /// Every configured source failed, so the run has nothing to work with
    #[error("all {0} sources failed")]
    AllSourcesFailed(usize),

    #[error("invalid region code: {0:?}")]
    InvalidRegion(String),
}

impl Error {
    pub fn source_failed(addr: &str, message: impl Into<String>) -> Self {
        Error::Source {
            source_addr: addr.to_string(),
            message: message.into(),
        }
    }
}

impl From<std::net::AddrParseError> for Error {
    fn from(e: std::net::AddrParseError) -> Self {
        Error::Geo(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_error_display() {
        let err = Error::source_failed("https://example.com/list.txt", "timed out");
        assert_eq!(
            err.to_string(),
            "source https://example.com/list.txt failed: timed out"
        );
    }

    #[test]
    fn test_all_sources_failed_display() {
        assert_eq!(Error::AllSourcesFailed(5).to_string(), "all 5 sources failed");
    }
}
