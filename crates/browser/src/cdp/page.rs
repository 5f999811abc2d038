//! CDP Page - the single tab a crawler drives
//!
//! All pages share the browser WebSocket; a page is just a target plus the
//! flatten-mode session id used to address it.

use super::client::{CdpClient, CdpError, Result};
use super::protocol::{
    AttachToTargetResult, CreateTargetResult, NavigateResult, SessionId, TargetId,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

const LOAD_EVENT: &str = "Page.loadEventFired";

/// Page bound to one target
#[derive(Clone)]
pub struct Page {
    client: Arc<CdpClient>,

    pub target_id: TargetId,

    pub session_id: SessionId,
}

impl Page {
    /// Open a blank target and attach to it
    pub async fn attach(client: Arc<CdpClient>) -> Result<Self> {
        let created = client
            .call(
                "Target.createTarget",
                Some(json!({ "url": "about:blank" })),
                None,
            )
            .await?;
        let created: CreateTargetResult = serde_json::from_value(created)?;

        let attached = client
            .call(
                "Target.attachToTarget",
                Some(json!({
                    "targetId": created.target_id,
                    "flatten": true,
                })),
                None,
            )
            .await?;
        let attached: AttachToTargetResult = serde_json::from_value(attached)?;

        let page = Self {
            client,
            target_id: created.target_id,
            session_id: attached.session_id,
        };

        // Both are needed: Page for load events, Runtime for evaluate
        let (page_enabled, runtime_enabled) =
            tokio::join!(page.send("Page.enable", None), page.send("Runtime.enable", None));
        page_enabled?;
        runtime_enabled?;

        tracing::debug!("Attached page {} ({})", page.target_id, page.session_id);
        Ok(page)
    }

    /// Send command within this page's session
    pub async fn send(&self, method: impl Into<String>, params: Option<Value>) -> Result<Value> {
        self.client
            .call(method, params, Some(self.session_id.clone()))
            .await
    }

    /// Navigate and wait for the load event
    pub async fn navigate(&self, url: &str) -> Result<()> {
        // Subscribe before navigating so a fast load is not missed
        let mut events = self.client.events();

        let result = self.send("Page.navigate", Some(json!({ "url": url }))).await?;
        let result: NavigateResult = serde_json::from_value(result)?;
        if let Some(reason) = result.error_text {
            return Err(CdpError::Navigation {
                url: url.to_string(),
                reason,
            });
        }

        let timeout = self.client.call_timeout();
        let wait = async {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if event.method == LOAD_EVENT
                            && event.session_id.as_deref() == Some(self.session_id.as_str())
                        {
                            return Ok(());
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!("Page event stream lagged by {}", skipped);
                    }
                    Err(RecvError::Closed) => return Err(CdpError::Closed),
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| CdpError::Timeout {
                method: LOAD_EVENT.to_string(),
                timeout,
            })?
    }

    /// Evaluate JavaScript and return its value
    pub async fn evaluate(&self, expression: impl Into<String>) -> Result<Value> {
        let result = self
            .send(
                "Runtime.evaluate",
                Some(json!({
                    "expression": expression.into(),
                    "returnByValue": true,
                    "awaitPromise": true,
                })),
            )
            .await?;

        if let Some(details) = result.get("exceptionDetails") {
            let text = details["exception"]["description"]
                .as_str()
                .or_else(|| details["text"].as_str())
                .unwrap_or("uncaught exception");
            return Err(CdpError::Script(text.to_string()));
        }

        Ok(result["result"]["value"].clone())
    }

    /// Outer HTML of the loaded document
    pub async fn content(&self) -> Result<String> {
        let value = self.evaluate("document.documentElement.outerHTML").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }
}
