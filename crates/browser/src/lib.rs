//! Browser - a Chrome process driven over CDP
//!
//! The crawler treats a browser as one scarce, stateful resource: a single
//! process tree with a single page. This crate launches it, talks to it and
//! lets the caller tear it down.
//!
//! ```text
//! Chrome::launch ─ spawn (own process group) ─ DevTools ws URL
//!        └─ CdpClient ─ Page (navigate / evaluate / content)
//! ```

pub mod cdp;
pub mod error;
pub mod launcher;

pub use cdp::{CdpClient, CdpError, Page};
pub use error::{BrowserError, Result};
pub use launcher::{Chrome, LaunchOptions};
