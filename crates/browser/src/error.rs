//! Error types for browser operations
//!
//! Flat on purpose: the crawler only needs to tell a dead browser from a
//! failed page.

use std::time::Duration;
use thiserror::Error;

use crate::cdp::CdpError;

pub type Result<T> = std::result::Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error(transparent)]
    Cdp(#[from] CdpError),

    #[error("Failed to launch {executable}: {reason}")]
    Launch { executable: String, reason: String },

    #[error("Browser did not announce a DevTools endpoint within {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BrowserError {
    /// True when the browser process or its connection cannot be reused
    pub fn is_fatal(&self) -> bool {
        match self {
            BrowserError::Cdp(e) => e.is_disconnect(),
            BrowserError::Launch { .. } | BrowserError::Timeout(_) | BrowserError::Io(_) => true,
        }
    }
}
