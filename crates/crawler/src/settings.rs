//! Crawler settings
//!
//! Loaded from JSON; every field has a default so an empty object is a
//! valid (disabled) configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use browser::LaunchOptions;

use crate::error::{CrawlError, Result};

/// Which browser drives the resource-bound requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    Chrome,
    Chromium,
}

impl BrowserKind {
    fn default_executable(self) -> &'static str {
        match self {
            BrowserKind::Chrome => "google-chrome",
            BrowserKind::Chromium => "chromium",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `None` routes every request to the fallback downloader
    pub browser: Option<BrowserKind>,

    /// Bound for a single browser call or page load
    pub timeout_secs: u64,

    /// Wall-clock limit for one browser download; 0 or absent disables it
    pub hang_timeout_secs: Option<u64>,

    pub executable: Option<String>,
    pub headless: bool,
    pub user_data_dir: Option<PathBuf>,
    pub user_agent: Option<String>,
    pub extra_args: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            browser: None,
            timeout_secs: 30,
            hang_timeout_secs: None,
            executable: None,
            headless: true,
            user_data_dir: None,
            user_agent: None,
            extra_args: Vec::new(),
        }
    }
}

impl Settings {
    pub fn from_json(text: &str) -> Result<Self> {
        let settings: Settings =
            serde_json::from_str(text).map_err(|e| CrawlError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(CrawlError::Config("timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    pub fn enabled(&self) -> bool {
        self.browser.is_some()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn hang_timeout(&self) -> Option<Duration> {
        self.hang_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn launch_options(&self) -> LaunchOptions {
        let executable = self.executable.clone().unwrap_or_else(|| {
            self.browser
                .unwrap_or(BrowserKind::Chrome)
                .default_executable()
                .to_string()
        });

        LaunchOptions {
            executable,
            headless: self.headless,
            user_data_dir: self.user_data_dir.clone(),
            user_agent: self.user_agent.clone(),
            extra_args: self.extra_args.clone(),
            call_timeout: self.timeout(),
        }
    }
}
