//! Requests and responses flowing through the crawler
//!
//! A request is either served by the shared browser (`browser = true`) or by
//! the ordinary HTTP path. Browser requests come in two kinds, decided at
//! construction: a plain page load, or a list of actions to replay against
//! the page that is already loaded.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use url::Url;

use crate::error::{CrawlError, Result};
use crate::selector::Selector;
use crate::session::Session;

/// Body handed to parsers when a browser download failed
pub const EMPTY_DOCUMENT: &str = "<html><head></head><body></body></html>";

/// Identity of a request: its normalized URL
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    /// Drops the fragment and sorts query pairs, so equivalent URLs share
    /// one identity. Scheme and host case is already normalized by parsing.
    pub fn from_url(url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);

        let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        if pairs.is_empty() {
            url.set_query(None);
        } else {
            pairs.sort();
            url.query_pairs_mut().clear().extend_pairs(pairs);
        }

        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One operation against an already loaded page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Click { selector: String },
    SendKeys { selector: String, text: String },
    Scroll { x: i64, y: i64 },
    Wait { millis: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestKind {
    /// Load the URL in the browser
    Simple,
    /// Replay actions on the page loaded for the URL
    Action(Vec<Action>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    url: Url,
    id: RequestId,
    kind: RequestKind,
    browser: bool,
    /// Bypass the scheduler's duplicate filter
    pub dont_filter: bool,
    pub meta: BTreeMap<String, Value>,
}

impl Request {
    fn parse(url: &str, kind: RequestKind, browser: bool) -> Result<Self> {
        let url = Url::parse(url).map_err(|source| CrawlError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        let id = RequestId::from_url(&url);
        Ok(Self {
            url,
            id,
            kind,
            browser,
            dont_filter: false,
            meta: BTreeMap::new(),
        })
    }

    /// Page load through the shared browser
    pub fn browser(url: &str) -> Result<Self> {
        Self::parse(url, RequestKind::Simple, true)
    }

    /// Actions against the page already loaded in the shared browser
    pub fn action(url: &str, actions: Vec<Action>) -> Result<Self> {
        Self::parse(url, RequestKind::Action(actions), true)
    }

    /// Ordinary download, never touches the browser
    pub fn http(url: &str) -> Result<Self> {
        Self::parse(url, RequestKind::Simple, false)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn kind(&self) -> &RequestKind {
        &self.kind
    }

    pub fn is_browser(&self) -> bool {
        self.browser
    }

    pub fn is_action(&self) -> bool {
        matches!(self.kind, RequestKind::Action(_))
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    /// Copy marked for re-scheduling even though its URL was seen before
    pub fn replace_dont_filter(mut self) -> Self {
        self.dont_filter = true;
        self
    }
}

/// What a parse callback yields: scraped items or follow-up requests
#[derive(Debug, Clone, PartialEq)]
pub enum Output<T> {
    Item(T),
    Request(Request),
}

impl<T> Output<T> {
    pub fn as_request(&self) -> Option<&Request> {
        match self {
            Output::Request(request) => Some(request),
            Output::Item(_) => None,
        }
    }
}

/// A browser download that did not produce a page
#[derive(Debug)]
pub struct DownloadFailure {
    pub error: CrawlError,
    /// Placeholder document so parsers have something to chew on
    pub page_source: String,
}

pub enum Outcome {
    /// Page loaded; the session still shows it
    Loaded(Arc<dyn Session>),
    Failed(DownloadFailure),
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Loaded(session) => f
                .debug_tuple("Loaded")
                .field(&session.process_id())
                .finish(),
            Outcome::Failed(failure) => f.debug_tuple("Failed").field(failure).finish(),
        }
    }
}

#[derive(Debug)]
pub struct BrowserResponse {
    request: Request,
    outcome: Outcome,
}

impl BrowserResponse {
    pub fn loaded(request: Request, session: Arc<dyn Session>) -> Self {
        Self {
            request,
            outcome: Outcome::Loaded(session),
        }
    }

    pub fn failed(request: Request, error: CrawlError) -> Self {
        Self {
            request,
            outcome: Outcome::Failed(DownloadFailure {
                error,
                page_source: EMPTY_DOCUMENT.to_string(),
            }),
        }
    }

    pub fn url(&self) -> &Url {
        self.request.url()
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    pub fn session(&self) -> Option<&Arc<dyn Session>> {
        match &self.outcome {
            Outcome::Loaded(session) => Some(session),
            Outcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&DownloadFailure> {
        match &self.outcome {
            Outcome::Failed(failure) => Some(failure),
            Outcome::Loaded(_) => None,
        }
    }

    /// Live page source, or the placeholder for a failed download
    pub async fn body(&self) -> Result<String> {
        match &self.outcome {
            Outcome::Loaded(session) => session.page_source().await,
            Outcome::Failed(failure) => Ok(failure.page_source.clone()),
        }
    }

    /// Selector over the live page; `None` when the download failed
    pub fn selector(&self) -> Option<Selector> {
        self.session().map(|session| Selector::new(session.clone()))
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub request: Request,
    pub status: u16,
    pub body: String,
}

#[derive(Debug)]
pub enum Response {
    Browser(BrowserResponse),
    Http(HttpResponse),
}

impl Response {
    pub fn request(&self) -> &Request {
        match self {
            Response::Browser(response) => response.request(),
            Response::Http(response) => &response.request,
        }
    }

    pub fn url(&self) -> &Url {
        self.request().url()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identity_normalizes_url() {
        let a = Request::browser("HTTPS://Example.COM/list?b=2&a=1#top").unwrap();
        let b = Request::browser("https://example.com/list?a=1&b=2").unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(a.id().as_str(), "https://example.com/list?a=1&b=2");

        let c = Request::browser("https://example.com/list?").unwrap();
        assert_eq!(c.id().as_str(), "https://example.com/list");
    }

    #[test]
    fn test_kind_decided_at_construction() {
        let page = Request::browser("https://example.com/").unwrap();
        assert!(page.is_browser());
        assert!(!page.is_action());

        let action = Request::action(
            "https://example.com/",
            vec![Action::Click {
                selector: "#more".to_string(),
            }],
        )
        .unwrap();
        assert!(action.is_browser());
        assert!(action.is_action());

        assert!(!Request::http("https://example.com/").unwrap().is_browser());
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(
            Request::browser("not a url"),
            Err(CrawlError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_replace_dont_filter_keeps_data() {
        let request = Request::browser("https://example.com/a")
            .unwrap()
            .with_meta("depth", json!(2));
        let replayed = request.clone().replace_dont_filter();

        assert!(replayed.dont_filter);
        assert_eq!(replayed.id(), request.id());
        assert_eq!(replayed.meta["depth"], json!(2));
    }

    #[test]
    fn test_action_serde_shape() {
        let action: Action =
            serde_json::from_value(json!({ "type": "send_keys", "selector": "#q", "text": "rust" }))
                .unwrap();
        assert_eq!(
            action,
            Action::SendKeys {
                selector: "#q".to_string(),
                text: "rust".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_failed_response_has_placeholder_body() {
        let request = Request::browser("https://example.com/").unwrap();
        let response = BrowserResponse::failed(request, CrawlError::NotSupported("test"));

        assert!(response.session().is_none());
        assert!(response.selector().is_none());
        assert_eq!(response.body().await.unwrap(), EMPTY_DOCUMENT);
    }
}
