//! Download dispatcher
//!
//! Browser page loads run on their own task so the crawl loop never waits
//! on the browser. Every browser download ends in a response, success or
//! failure, and releases the lock on the way out; ordinary requests go to
//! the fallback downloader untouched.
//!
//! With a hang timeout configured, each load races a [`HangGuard`]. When the
//! guard wins, its callback SIGTERMs the browser process group, force-frees
//! the lock and drops the session; the load is abandoned and finishes
//! through the normal failure path, whose own release is then a no-op.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{CrawlError, Result};
use crate::events::AccessEvent;
use crate::http::{BrowserResponse, HttpResponse, Request, RequestKind, Response};
use crate::manager::AccessManager;
use crate::session::Session;
use crate::settings::Settings;
use crate::watchdog::HangGuard;

/// Downloader for requests that do not need the browser
#[async_trait]
pub trait Fallback: Send + Sync {
    async fn download_request(&self, request: Request) -> Result<Response>;
}

/// Plain HTTP GET via reqwest
pub struct HttpFallback {
    client: reqwest::Client,
}

impl HttpFallback {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fallback for HttpFallback {
    async fn download_request(&self, request: Request) -> Result<Response> {
        tracing::debug!("Downloading {} over HTTP", request.url());
        let response = self.client.get(request.url().clone()).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(Response::Http(HttpResponse {
            request,
            status,
            body,
        }))
    }
}

pub struct DownloadDispatcher {
    manager: Arc<AccessManager>,
    fallback: Arc<dyn Fallback>,
    enabled: bool,
    hang_timeout: Option<Duration>,
}

impl DownloadDispatcher {
    pub fn new(manager: Arc<AccessManager>, settings: &Settings, fallback: Arc<dyn Fallback>) -> Self {
        Self {
            manager,
            fallback,
            enabled: settings.enabled(),
            hang_timeout: settings.hang_timeout(),
        }
    }

    /// Dispatcher with the HTTP fallback
    pub fn from_settings(manager: Arc<AccessManager>, settings: &Settings) -> Result<Self> {
        let fallback = Arc::new(HttpFallback::new(settings.timeout())?);
        Ok(Self::new(manager, settings, fallback))
    }

    /// Browser requests come back as a response whatever happens; errors
    /// are only those of the fallback path
    pub async fn download_request(&self, request: Request) -> Result<Response> {
        if !self.enabled || !request.is_browser() {
            return self.fallback.download_request(request).await;
        }

        match request.kind() {
            RequestKind::Action(_) => {
                // Replaying actions on a loaded page is not implemented
                tracing::error!("Browser actions are not supported ({})", request.url());
                self.manager.release(request.id()).await;
                Ok(Response::Browser(BrowserResponse::failed(
                    request,
                    CrawlError::NotSupported("browser actions on a loaded page"),
                )))
            }
            RequestKind::Simple => {
                let worker = tokio::spawn(fetch(
                    self.manager.clone(),
                    request.clone(),
                    self.hang_timeout,
                ));
                match worker.await {
                    Ok(response) => Ok(Response::Browser(response)),
                    Err(e) => {
                        tracing::error!("Browser download worker for {} died: {}", request.url(), e);
                        self.manager.release(request.id()).await;
                        Ok(Response::Browser(BrowserResponse::failed(
                            request,
                            CrawlError::Worker(e.to_string()),
                        )))
                    }
                }
            }
        }
    }

    /// Shut the browser down
    pub async fn close(&self) -> Result<()> {
        self.manager.handle().shutdown().await
    }
}

fn same_session(a: &Arc<dyn Session>, b: &Arc<dyn Session>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

fn arm_hang_guard(manager: Arc<AccessManager>, request: &Request, timeout: Duration) -> HangGuard {
    let id = request.id().clone();
    let url = request.url().to_string();
    HangGuard::arm(timeout, move || async move {
        manager.handle().terminate().await;
        manager.force_release_and_reset().await;
        tracing::warn!(
            "Browser load of {} took more than the hang timeout ({:?}), browser reset",
            url,
            timeout
        );
        manager.events().publish(AccessEvent::HangDetected { id });
    })
}

/// Load one page in the shared browser; runs on a worker task
async fn fetch(
    manager: Arc<AccessManager>,
    request: Request,
    hang_timeout: Option<Duration>,
) -> BrowserResponse {
    tracing::debug!("Downloading {} with browser", request.url());

    let mut guard = hang_timeout.map(|timeout| arm_hang_guard(manager.clone(), &request, timeout));
    let mut used: Option<Arc<dyn Session>> = None;

    let load = async {
        let session = manager.session().await?;
        used = Some(session.clone());
        session.get(request.url().as_str()).await?;
        Ok::<_, CrawlError>(session)
    };

    let result = match guard.as_mut() {
        Some(guard) => {
            let timeout = guard.timeout();
            tokio::select! {
                result = load => result,
                _ = guard.fired() => Err(CrawlError::HangTimeout {
                    url: request.url().to_string(),
                    timeout,
                }),
            }
        }
        None => load.await,
    };

    if let Some(guard) = guard {
        guard.disarm();
    }

    // Only the watchdog produces HangTimeout, and it already freed the lock
    // that someone else may hold by now
    let hung = matches!(result, Err(CrawlError::HangTimeout { .. }));

    let response = match result {
        Ok(session) => BrowserResponse::loaded(request.clone(), session),
        Err(error) => {
            tracing::error!("Error while downloading {} with browser ({})", request.url(), error);

            // A hang was already reset by the watchdog; anything else fatal
            // drops the session it happened on, and only that one
            if error.is_terminal() && !hung {
                if let Some(broken) = &used {
                    let cached = manager.handle().current().await;
                    if cached.as_ref().is_some_and(|s| same_session(s, broken)) {
                        manager.handle().invalidate().await;
                    }
                }
            }

            // Relaunch now rather than on the next request
            if let Err(e) = manager.session().await {
                tracing::warn!("Browser relaunch after failure did not succeed: {}", e);
            }

            BrowserResponse::failed(request.clone(), error)
        }
    };

    if !hung {
        manager.release(request.id()).await;
    }
    response
}
