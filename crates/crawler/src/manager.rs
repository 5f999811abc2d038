//! Access manager - exclusive, ordered access to the browser
//!
//! ```text
//!            acquire(r)                      acquire(r'), r' != x
//!   FREE ───────────────▶ HELD(r.id)   HELD(x) ─────────────────▶ HELD(x), r' queued
//!     ▲                       │
//!     │ release(x) / force    │
//!     └───────────────────────┘
//! ```
//!
//! The wait queue is FIFO by first arrival. A request that arrives again
//! while queued replaces the stored copy in place; it does not move.
//!
//! Lock and queue live behind a single mutex and no method holds it across
//! an await on anything else, so the browser handle is never locked while
//! the state is.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::events::{AccessEvent, EventBus};
use crate::handle::ResourceHandle;
use crate::http::{Request, RequestId};
use crate::session::{ChromeFactory, Session, SessionFactory};
use crate::settings::Settings;

/// Outcome of an acquire attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Lock granted; the request may proceed
    Admitted(Request),
    /// Lock busy; the request is queued and will come back via `acquire_next`
    Waiting,
}

impl Admission {
    pub fn is_waiting(&self) -> bool {
        matches!(self, Admission::Waiting)
    }

    pub fn into_request(self) -> Option<Request> {
        match self {
            Admission::Admitted(request) => Some(request),
            Admission::Waiting => None,
        }
    }
}

#[derive(Default)]
struct WaitQueue {
    entries: HashMap<RequestId, Request>,
    /// Each id at most once, in first-arrival order
    order: VecDeque<RequestId>,
}

impl WaitQueue {
    /// True if the request was new, false if it replaced a queued copy
    fn push(&mut self, request: Request) -> bool {
        let id = request.id().clone();
        if self.entries.insert(id.clone(), request).is_some() {
            return false;
        }
        self.order.push_back(id);
        true
    }

    fn pop(&mut self) -> Option<Request> {
        while let Some(id) = self.order.pop_front() {
            if let Some(request) = self.entries.remove(&id) {
                return Some(request);
            }
        }
        None
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

#[derive(Default)]
struct LockState {
    held_by: Option<RequestId>,
    queue: WaitQueue,
}

impl LockState {
    fn acquire(&mut self, request: Request, events: &EventBus) -> Admission {
        if self.held_by.is_none() {
            tracing::debug!("Browser lock acquired by {}", request.id());
            self.held_by = Some(request.id().clone());
            events.publish(AccessEvent::Admitted {
                id: request.id().clone(),
            });
            return Admission::Admitted(request);
        }

        let id = request.id().clone();
        if self.queue.push(request) {
            tracing::debug!("Browser busy, queued {} ({} waiting)", id, self.queue.len());
            events.publish(AccessEvent::Queued { id });
        } else {
            tracing::debug!("Browser busy, updated queued {}", id);
            events.publish(AccessEvent::Requeued { id });
        }
        Admission::Waiting
    }
}

pub struct AccessManager {
    state: Mutex<LockState>,
    handle: ResourceHandle,
    events: EventBus,
}

impl AccessManager {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            handle: ResourceHandle::new(factory),
            events: EventBus::new(),
        }
    }

    /// Manager over Chrome sessions launched from `settings`
    pub fn from_settings(settings: &Settings) -> Arc<Self> {
        let factory = ChromeFactory::new(settings.launch_options());
        Arc::new(Self::new(Arc::new(factory)))
    }

    /// Take the lock if free, otherwise queue the request
    pub async fn acquire(&self, request: Request) -> Admission {
        self.state.lock().await.acquire(request, &self.events)
    }

    /// Free the lock if `id` holds it; anything else is logged and ignored
    pub async fn release(&self, id: &RequestId) {
        let mut state = self.state.lock().await;
        if state.held_by.as_ref() == Some(id) {
            state.held_by = None;
            tracing::debug!("Browser lock released by {}", id);
            self.events.publish(AccessEvent::Released { id: id.clone() });
            return;
        }

        match &state.held_by {
            Some(holder) => {
                tracing::warn!("Ignoring release by {}: browser lock is held by {}", id, holder)
            }
            None => tracing::warn!("Ignoring release by {}: browser lock is free", id),
        }
        self.events.publish(AccessEvent::ReleaseIgnored {
            id: id.clone(),
            holder: state.held_by.clone(),
        });
    }

    /// Promote the oldest waiter
    ///
    /// Returns `Waiting` when nobody is queued, or when the lock is still
    /// held; the queue is then left as it was so no waiter loses its place.
    pub async fn acquire_next(&self) -> Admission {
        let mut state = self.state.lock().await;
        if state.held_by.is_some() {
            return Admission::Waiting;
        }
        match state.queue.pop() {
            Some(request) => state.acquire(request, &self.events),
            None => Admission::Waiting,
        }
    }

    /// Clear the lock whoever holds it and drop the browser session
    ///
    /// The wait queue is left alone.
    pub async fn force_release_and_reset(&self) {
        let holder = self.state.lock().await.held_by.take();
        tracing::info!("Browser lock force-released (held by {:?}), resetting session", holder);
        self.handle.invalidate().await;
        self.events.publish(AccessEvent::Reset { holder });
    }

    /// The shared session, launched on first use
    pub async fn session(&self) -> Result<Arc<dyn Session>> {
        self.handle.session().await
    }

    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub async fn held_by(&self) -> Option<RequestId> {
        self.state.lock().await.held_by.clone()
    }

    pub async fn queue_len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Queued ids in admission order
    pub async fn queued_ids(&self) -> Vec<RequestId> {
        self.state.lock().await.queue.order.iter().cloned().collect()
    }
}
