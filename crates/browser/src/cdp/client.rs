//! CDP Client - one WebSocket per browser
//!
//! Calls are matched to replies by id; events go out on a broadcast channel
//! so a page can wait for the one it cares about without registering
//! permanent callbacks. Every call is bounded by the call timeout.

use dashmap::DashMap;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::protocol::*;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

#[derive(Error, Debug)]
pub enum CdpError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CDP protocol error: {code} - {message}")]
    Protocol { code: i32, message: String },

    #[error("Script error: {0}")]
    Script(String),

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("{method} timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("Connection closed")]
    Closed,
}

impl CdpError {
    /// The connection is gone; nothing sent on it will ever succeed again
    pub fn is_disconnect(&self) -> bool {
        matches!(self, CdpError::Closed | CdpError::WebSocket(_))
    }
}

/// Result type for CDP operations
pub type Result<T> = std::result::Result<T, CdpError>;

/// CDP Client - manages single WebSocket connection to browser
pub struct CdpClient {
    next_id: AtomicU64,

    /// Calls waiting for their reply
    pending: Arc<DashMap<CallId, oneshot::Sender<Reply>>>,

    events: broadcast::Sender<Event>,

    ws_sink: Mutex<WsSink>,

    closed: Arc<AtomicBool>,

    call_timeout: Duration,
}

impl CdpClient {
    /// Connect to a DevTools WebSocket endpoint
    pub async fn connect(ws_url: &str, call_timeout: Duration) -> Result<Arc<Self>> {
        let (ws_stream, _) = connect_async(ws_url).await?;
        let (sink, mut stream) = ws_stream.split();

        let pending: Arc<DashMap<CallId, oneshot::Sender<Reply>>> = Arc::new(DashMap::new());
        let (events, _) = broadcast::channel(1024);
        let closed = Arc::new(AtomicBool::new(false));

        let client = Arc::new(Self {
            next_id: AtomicU64::new(1),
            pending: pending.clone(),
            events: events.clone(),
            ws_sink: Mutex::new(sink),
            closed: closed.clone(),
            call_timeout,
        });

        // The receiver task owns only the shared maps, so dropping the
        // client closes the sink and ends the loop.
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<Incoming>(&text) {
                        Ok(Incoming::Reply(reply)) => {
                            if let Some((_, tx)) = pending.remove(&reply.id) {
                                let _ = tx.send(reply); // Caller may have timed out
                            } else {
                                tracing::warn!("Reply for unknown call: {}", reply.id);
                            }
                        }
                        Ok(Incoming::Event(event)) => {
                            let _ = events.send(event); // No subscribers is fine
                        }
                        Err(e) => tracing::error!("Undecodable CDP message: {}", e),
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!("WebSocket closed");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            closed.store(true, Ordering::SeqCst);
            // Dropping the senders fails every waiting call with Closed
            pending.clear();
        });

        Ok(client)
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send a call and wait for its reply
    pub async fn call(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        session_id: Option<SessionId>,
    ) -> Result<Value> {
        if self.is_closed() {
            return Err(CdpError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let method = method.into();
        let call = Call {
            id,
            method: method.clone(),
            params,
            session_id,
        };

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let json = serde_json::to_string(&call)?;
        {
            let mut sink = self.ws_sink.lock().await;
            if let Err(e) = sink.send(Message::Text(json)).await {
                self.pending.remove(&id);
                return Err(CdpError::WebSocket(e));
            }
        }

        let reply = match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(CdpError::Closed),
            Err(_) => {
                self.pending.remove(&id);
                return Err(CdpError::Timeout {
                    method,
                    timeout: self.call_timeout,
                });
            }
        };

        if let Some(error) = reply.error {
            return Err(CdpError::Protocol {
                code: error.code,
                message: error.message,
            });
        }

        Ok(reply.result.unwrap_or(Value::Null))
    }

    /// Subscribe to every event on this connection
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Close connection gracefully
    pub async fn close(&self) -> Result<()> {
        let mut sink = self.ws_sink.lock().await;
        sink.close().await?;
        Ok(())
    }
}
