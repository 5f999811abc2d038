//! Scripted in-memory sessions
//!
//! Stand-ins for a real browser: each URL can be told to load, fail, hang
//! or load slowly. Used by this crate's tests and handy for embedders
//! testing their own spiders without Chrome.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use browser::{BrowserError, CdpError};

use crate::error::{CrawlError, Result};
use crate::session::{Session, SessionFactory};

/// What a scripted session does when asked to load a URL
#[derive(Debug, Clone, PartialEq)]
pub enum Script {
    Load,
    Fail(String),
    /// Never returns
    Hang,
    /// Loads after a delay
    Slow(Duration),
    /// The connection drops, as when the browser died
    Disconnect,
}

#[derive(Default)]
struct Shared {
    scripts: HashMap<String, Script>,
    evaluate_result: Value,
    loads: Vec<String>,
    evaluated: Vec<String>,
    relaunch_delay: Option<Duration>,
}

/// Factory handing out scripted sessions that share one script book
#[derive(Clone, Default)]
pub struct ScriptedFactory {
    shared: Arc<Mutex<Shared>>,
    launches: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behavior for an exact URL; unscripted URLs load normally
    pub fn script(&self, url: &str, script: Script) -> &Self {
        self.lock().scripts.insert(url.to_string(), script);
        self
    }

    /// Value every `evaluate` call returns
    pub fn evaluate_returns(&self, value: Value) -> &Self {
        self.lock().evaluate_result = value;
        self
    }

    /// Every launch after the first takes this long, like a browser
    /// restarting after a crash
    pub fn relaunch_delay(&self, delay: Duration) -> &Self {
        self.lock().relaunch_delay = Some(delay);
        self
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Most page loads ever running at the same time
    pub fn max_concurrent_loads(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// URLs whose load started, in order, across all sessions
    pub fn loads(&self) -> Vec<String> {
        self.lock().loads.clone()
    }

    /// Scripts passed to `evaluate`, in order
    pub fn evaluated(&self) -> Vec<String> {
        self.lock().evaluated.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        // A panicking test thread must not hide the script book from others
        self.shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SessionFactory for ScriptedFactory {
    async fn launch(&self) -> Result<Arc<dyn Session>> {
        let generation = self.launches.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = self.lock().relaunch_delay;
        if let Some(delay) = delay.filter(|_| generation > 1) {
            tokio::time::sleep(delay).await;
        }
        Ok(Arc::new(ScriptedSession {
            factory: self.clone(),
            generation,
            current: Mutex::new(None),
        }))
    }
}

/// Counts a load as running until dropped, abandoned loads included
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn start(factory: &ScriptedFactory) -> Self {
        let now = factory.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        factory.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(factory.in_flight.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct ScriptedSession {
    factory: ScriptedFactory,
    generation: usize,
    current: Mutex<Option<String>>,
}

impl ScriptedSession {
    /// 1 for the first launched session, 2 for the next, ...
    pub fn generation(&self) -> usize {
        self.generation
    }
}

#[async_trait]
impl Session for ScriptedSession {
    async fn get(&self, url: &str) -> Result<()> {
        let script = {
            let mut shared = self.factory.lock();
            shared.loads.push(url.to_string());
            shared.scripts.get(url).cloned().unwrap_or(Script::Load)
        };
        let _running = InFlight::start(&self.factory);

        match script {
            Script::Load => {}
            Script::Slow(delay) => tokio::time::sleep(delay).await,
            Script::Hang => std::future::pending::<()>().await,
            Script::Fail(reason) => {
                return Err(CrawlError::Browser(BrowserError::Cdp(CdpError::Navigation {
                    url: url.to_string(),
                    reason,
                })))
            }
            Script::Disconnect => return Err(CrawlError::Browser(BrowserError::Cdp(CdpError::Closed))),
        }

        if let Ok(mut current) = self.current.lock() {
            *current = Some(url.to_string());
        }
        Ok(())
    }

    async fn page_source(&self) -> Result<String> {
        let current = self
            .current
            .lock()
            .map(|current| current.clone())
            .unwrap_or_default();
        Ok(match current {
            Some(url) => format!(
                "<html><head><title>{}</title></head><body>session {}</body></html>",
                url, self.generation
            ),
            None => crate::http::EMPTY_DOCUMENT.to_string(),
        })
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        let mut shared = self.factory.lock();
        shared.evaluated.push(script.to_string());
        Ok(shared.evaluate_result.clone())
    }

    fn process_id(&self) -> Option<u32> {
        None
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
