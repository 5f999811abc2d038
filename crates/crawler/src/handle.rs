//! Resource handle - the one browser session behind the lock
//!
//! Created lazily on first use, dropped on a forced reset and recreated on
//! the next access. Termination signals the whole process group: the
//! browser forks renderers and helpers, and killing only the leader leaves
//! them running.

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::error::Result;
use crate::session::{Session, SessionFactory};

pub struct ResourceHandle {
    factory: Arc<dyn SessionFactory>,

    /// Cached session; only held for the duration of a read or swap
    slot: RwLock<Option<Arc<dyn Session>>>,

    /// Serializes launches so concurrent first accesses share one session
    launching: Mutex<()>,
}

impl ResourceHandle {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            factory,
            slot: RwLock::new(None),
            launching: Mutex::new(()),
        }
    }

    /// Cached session, launching one if there is none
    pub async fn session(&self) -> Result<Arc<dyn Session>> {
        if let Some(session) = self.slot.read().await.clone() {
            return Ok(session);
        }

        let _launching = self.launching.lock().await;
        if let Some(session) = self.slot.read().await.clone() {
            return Ok(session);
        }

        tracing::info!("Launching browser session");
        let session = self.factory.launch().await?;
        *self.slot.write().await = Some(session.clone());
        Ok(session)
    }

    /// Cached session without launching one
    pub async fn current(&self) -> Option<Arc<dyn Session>> {
        self.slot.read().await.clone()
    }

    pub async fn is_alive(&self) -> bool {
        self.slot.read().await.is_some()
    }

    /// Forget the cached session; the next access launches a new one
    pub async fn invalidate(&self) -> Option<Arc<dyn Session>> {
        let dropped = self.slot.write().await.take();
        if dropped.is_some() {
            tracing::debug!("Browser session invalidated");
        }
        dropped
    }

    /// SIGTERM the process group of the cached session
    pub async fn terminate(&self) {
        let Some(session) = self.slot.read().await.clone() else {
            tracing::debug!("No browser session to terminate");
            return;
        };
        let Some(pid) = session.process_id() else {
            tracing::debug!("Browser session has no process to terminate");
            return;
        };
        let Ok(pgid) = i32::try_from(pid) else {
            tracing::warn!("Browser pid {} out of range, not signalling", pid);
            return;
        };

        match killpg(Pid::from_raw(pgid), Signal::SIGTERM) {
            Ok(()) => tracing::info!("Sent SIGTERM to browser process group {}", pgid),
            Err(Errno::ESRCH) => tracing::debug!("Browser process group {} already gone", pgid),
            Err(e) => tracing::warn!("Failed to signal browser process group {}: {}", pgid, e),
        }
    }

    /// Close the cached session gracefully
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(session) = self.invalidate().await {
            session.close().await?;
        }
        Ok(())
    }
}
