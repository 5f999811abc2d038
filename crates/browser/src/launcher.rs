//! Chrome launcher
//!
//! Spawns Chrome in its own process group so the whole tree (browser,
//! renderers, GPU helper) can be signalled at once, then connects over CDP.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::cdp::{CdpClient, Page};
use crate::error::{BrowserError, Result};

const DEVTOOLS_PREFIX: &str = "DevTools listening on ";

/// How to start the browser
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchOptions {
    pub executable: String,
    pub headless: bool,
    /// Profile directory; a fresh temporary one per launch when unset
    pub user_data_dir: Option<PathBuf>,
    pub user_agent: Option<String>,
    pub extra_args: Vec<String>,
    /// Bound for every CDP call and page load
    pub call_timeout: Duration,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            executable: "google-chrome".to_string(),
            headless: true,
            user_data_dir: None,
            user_agent: None,
            extra_args: Vec::new(),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl LaunchOptions {
    fn args(&self) -> Vec<String> {
        let profile = self.user_data_dir.clone().unwrap_or_else(|| {
            std::env::temp_dir().join(format!("crawler-profile-{}", Uuid::now_v7()))
        });

        let mut args = vec![
            "--remote-debugging-port=0".to_string(),
            format!("--user-data-dir={}", profile.display()),
            "--no-first-run".to_string(),
            "--no-default-browser-check".to_string(),
            "--disable-background-networking".to_string(),
        ];
        if self.headless {
            args.push("--headless=new".to_string());
        }
        if let Some(agent) = &self.user_agent {
            args.push(format!("--user-agent={}", agent));
        }
        args.extend(self.extra_args.iter().cloned());
        args.push("about:blank".to_string());
        args
    }
}

/// A running Chrome with one attached page
pub struct Chrome {
    child: Mutex<Child>,
    pid: Option<u32>,
    client: Arc<CdpClient>,
    page: Page,
}

impl Chrome {
    pub async fn launch(options: &LaunchOptions) -> Result<Self> {
        let launch_error = |reason: String| BrowserError::Launch {
            executable: options.executable.clone(),
            reason,
        };

        let mut command = Command::new(&options.executable);
        command
            .args(options.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| launch_error(e.to_string()))?;
        let pid = child.id();
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| launch_error("stderr not captured".to_string()))?;

        let mut lines = BufReader::new(stderr).lines();
        let announce = async {
            while let Some(line) = lines.next_line().await? {
                if let Some(url) = line.strip_prefix(DEVTOOLS_PREFIX) {
                    return Ok(Some(url.trim().to_string()));
                }
                tracing::trace!("chrome: {}", line);
            }
            Ok::<_, std::io::Error>(None)
        };

        let ws_url = match tokio::time::timeout(options.call_timeout, announce).await {
            Ok(Ok(Some(url))) => url,
            Ok(Ok(None)) => {
                return Err(launch_error(
                    "exited before announcing a DevTools endpoint".to_string(),
                ))
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(BrowserError::Timeout(options.call_timeout)),
        };

        // Keep draining stderr so Chrome never blocks on a full pipe
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::trace!("chrome: {}", line);
            }
        });

        tracing::info!("Chrome started (pid {:?}) at {}", pid, ws_url);

        let client = CdpClient::connect(&ws_url, options.call_timeout).await?;
        let page = Page::attach(client.clone()).await?;

        Ok(Self {
            child: Mutex::new(child),
            pid,
            client,
            page,
        })
    }

    /// OS pid of the browser; also its process group id
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn is_connected(&self) -> bool {
        !self.client.is_closed()
    }

    /// Ask the browser to exit, killing it if it does not
    pub async fn close(&self) -> Result<()> {
        if let Err(e) = self.client.call("Browser.close", None, None).await {
            tracing::debug!("Browser.close failed: {}", e);
        }

        let mut child = self.child.lock().await;
        match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
            Ok(status) => {
                tracing::debug!("Chrome exited: {:?}", status?);
            }
            Err(_) => {
                tracing::warn!("Chrome (pid {:?}) ignored Browser.close, killing", self.pid);
                child.kill().await?;
            }
        }
        Ok(())
    }
}
