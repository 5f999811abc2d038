//! Request router - admission and requeue around spider callbacks
//!
//! Browser requests only reach the scheduler once they hold the browser
//! lock. The rest wait in the access manager and are put back into the
//! crawl, one at a time, each time a browser page has been parsed (or its
//! parsing failed). The dispatcher usually freed the lock already when the
//! download ended, so the release here is mostly a logged no-op; the
//! hand-over to the next waiter is what keeps the queue moving.

use std::sync::Arc;

use crate::error::{CrawlError, Result};
use crate::http::{Output, Request, Response};
use crate::manager::{AccessManager, Admission};
use crate::settings::Settings;

pub struct RequestRouter {
    manager: Arc<AccessManager>,
}

impl RequestRouter {
    pub fn new(manager: Arc<AccessManager>) -> Self {
        Self { manager }
    }

    pub fn from_settings(settings: &Settings, manager: Arc<AccessManager>) -> Result<Self> {
        if !settings.enabled() {
            return Err(CrawlError::NotConfigured("no browser selected".to_string()));
        }
        settings.validate()?;
        Ok(Self::new(manager))
    }

    pub fn manager(&self) -> &Arc<AccessManager> {
        &self.manager
    }

    /// Start requests, minus the browser requests that have to wait
    ///
    /// Action requests need a page that is already loaded, so they cannot
    /// start a crawl; a batch containing one is rejected before anything in
    /// it is admitted.
    pub async fn process_start_requests<T>(&self, start: Vec<Output<T>>) -> Result<Vec<Output<T>>> {
        if let Some(request) = start
            .iter()
            .filter_map(Output::as_request)
            .find(|r| r.is_browser() && r.is_action())
        {
            return Err(CrawlError::IgnoreRequest(format!(
                "browser action request {} can't be a start request",
                request.url()
            )));
        }

        Ok(self.admit(start).await)
    }

    /// Spider output for `request`, then the next waiter if `request` was
    /// holding the browser
    pub async fn process_spider_output<T>(
        &self,
        request: &Request,
        result: Vec<Output<T>>,
    ) -> Vec<Output<T>> {
        let mut output = self.admit(result).await;
        if request.is_browser() {
            if let Some(next) = self.hand_over(request).await {
                output.push(Output::Request(next));
            }
        }
        output
    }

    /// Parsing `request`'s response failed: free the browser and return
    /// the one request to dispatch next, if any
    pub async fn process_spider_exception(
        &self,
        request: &Request,
        error: &CrawlError,
    ) -> Option<Request> {
        if !request.is_browser() {
            return None;
        }
        tracing::debug!("Parsing {} failed ({}), handing the browser over", request.url(), error);
        self.hand_over(request).await
    }

    /// Log failed browser downloads; the response always goes on, parsers
    /// are expected to notice the failure themselves
    pub fn process_response(&self, response: Response) -> Response {
        if let Response::Browser(browser) = &response {
            if let Some(failure) = browser.failure() {
                tracing::error!(
                    "Error while downloading {} with browser ({})",
                    browser.url(),
                    failure.error
                );
            }
        }
        response
    }

    async fn hand_over(&self, request: &Request) -> Option<Request> {
        self.manager.release(request.id()).await;
        self.manager
            .acquire_next()
            .await
            .into_request()
            .map(Request::replace_dont_filter)
    }

    /// Forward everything except browser requests that were queued
    async fn admit<T>(&self, items: Vec<Output<T>>) -> Vec<Output<T>> {
        let mut admitted = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Output::Request(request) if request.is_browser() => {
                    match self.manager.acquire(request).await {
                        Admission::Admitted(request) => admitted.push(Output::Request(request)),
                        Admission::Waiting => {}
                    }
                }
                other => admitted.push(other),
            }
        }
        admitted
    }
}
