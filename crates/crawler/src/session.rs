//! Browser session seam
//!
//! The access manager only needs a handful of operations from whatever
//! automation session sits behind it. Chrome over CDP is the real one;
//! tests plug in scripted sessions.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use browser::{Chrome, LaunchOptions};

use crate::error::Result;

/// One live automation session (browser process + page)
#[async_trait]
pub trait Session: Send + Sync {
    /// Load `url` in the page, returning once it has loaded
    async fn get(&self, url: &str) -> Result<()>;

    /// HTML of the currently loaded document
    async fn page_source(&self) -> Result<String>;

    /// Run a script in the page and return its JSON value
    async fn evaluate(&self, script: &str) -> Result<Value>;

    /// Process group leader to signal on a forced reset
    fn process_id(&self) -> Option<u32>;

    async fn close(&self) -> Result<()>;
}

/// Creates sessions on demand
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn Session>>;
}

/// Chrome sessions built from launch options
pub struct ChromeFactory {
    options: LaunchOptions,
}

impl ChromeFactory {
    pub fn new(options: LaunchOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl SessionFactory for ChromeFactory {
    async fn launch(&self) -> Result<Arc<dyn Session>> {
        let chrome = Chrome::launch(&self.options).await?;
        Ok(Arc::new(chrome))
    }
}

#[async_trait]
impl Session for Chrome {
    async fn get(&self, url: &str) -> Result<()> {
        self.page().navigate(url).await.map_err(browser::BrowserError::from)?;
        Ok(())
    }

    async fn page_source(&self) -> Result<String> {
        let html = self.page().content().await.map_err(browser::BrowserError::from)?;
        Ok(html)
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        let value = self.page().evaluate(script).await.map_err(browser::BrowserError::from)?;
        Ok(value)
    }

    fn process_id(&self) -> Option<u32> {
        self.pid()
    }

    async fn close(&self) -> Result<()> {
        Chrome::close(self).await?;
        Ok(())
    }
}
