//! Crawler - serialized access to one shared browser
//!
//! Many requests, one browser. Browser-bound requests either get the
//! browser lock or wait for it in a FIFO queue. The holder keeps the lock
//! for its page load: the dispatcher frees it as soon as the download ends,
//! and once the response is parsed the router hands the browser to the
//! oldest waiter. Parsing reads the live session without holding the lock,
//! so the next load may already have replaced the page. A browser that
//! stops responding is killed and replaced instead of stalling the crawl.
//!
//! ```text
//! spider output ─▶ RequestRouter ──acquire──▶ AccessManager ◀─release/next─┐
//!                      │ admitted                  │ ResourceHandle         │
//!                      ▼                           ▼                        │
//!               DownloadDispatcher ─worker─▶ Session::get (HangGuard)       │
//!                      │                                                    │
//!                      └────────── Response ─▶ parse ─▶ RequestRouter ──────┘
//! ```
//!
//! Requests that do not need the browser go straight to the fallback
//! downloader and never touch the lock.

pub mod dispatcher;
pub mod error;
pub mod events;
pub mod handle;
pub mod http;
pub mod manager;
pub mod router;
pub mod selector;
pub mod session;
pub mod settings;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod watchdog;

pub use dispatcher::{DownloadDispatcher, Fallback, HttpFallback};
pub use error::{CrawlError, Result};
pub use events::{AccessEvent, EventBus};
pub use handle::ResourceHandle;
pub use http::{Action, BrowserResponse, Output, Request, RequestId, RequestKind, Response};
pub use manager::{AccessManager, Admission};
pub use router::RequestRouter;
pub use selector::{Query, Selector};
pub use session::{ChromeFactory, Session, SessionFactory};
pub use settings::{BrowserKind, Settings};
pub use watchdog::HangGuard;
