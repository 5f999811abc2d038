//! Error types for the crawler core
//!
//! Simple, flat error hierarchy. Anything raised inside a browser download
//! ends up in a failure response, never in the caller's `?`.

use std::time::Duration;
use thiserror::Error;

use browser::BrowserError;

pub type Result<T> = std::result::Result<T, CrawlError>;

#[derive(Debug, Error)]
pub enum CrawlError {
    /// The request can be dropped; the crawl goes on
    #[error("Request ignored: {0}")]
    IgnoreRequest(String),

    #[error("Browser access is not configured: {0}")]
    NotConfigured(String),

    #[error("Not supported: {0}")]
    NotSupported(&'static str),

    #[error("Loading {url} took more than the hang timeout ({timeout:?})")]
    HangTimeout { url: String, timeout: Duration },

    #[error("Invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid settings: {0}")]
    Config(String),

    #[error("Download worker failed: {0}")]
    Worker(String),
}

impl CrawlError {
    /// After these the cached browser session must not be reused
    pub fn is_terminal(&self) -> bool {
        match self {
            CrawlError::HangTimeout { .. } => true,
            CrawlError::Browser(e) => e.is_fatal(),
            _ => false,
        }
    }
}
