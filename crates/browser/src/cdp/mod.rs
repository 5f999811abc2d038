//! CDP (Chrome DevTools Protocol) plumbing
//!
//! Single WebSocket connection, one attached page per browser.

pub mod client;
pub mod page;
pub mod protocol;

pub use client::{CdpClient, CdpError};
pub use page::Page;
pub use protocol::{Call, Event, Reply};
