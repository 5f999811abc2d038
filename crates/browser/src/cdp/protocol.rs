//! CDP wire types
//!
//! Only what the crawler needs: calls, replies, events and the handful of
//! typed results we decode.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Call ID - monotonically increasing per connection
pub type CallId = u64;

/// Target ID from Chrome
pub type TargetId = String;

/// Session ID for attached targets
pub type SessionId = String;

/// Call sent to the browser
#[derive(Debug, Clone, Serialize)]
pub struct Call {
    pub id: CallId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

/// Reply to a call
#[derive(Debug, Clone, Deserialize)]
pub struct Reply {
    pub id: CallId,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<ProtocolError>,
}

/// Error object carried by a failed reply
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProtocolError {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Event pushed by the browser (no call id)
#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<SessionId>,
}

/// Anything arriving on the socket
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Incoming {
    Reply(Reply),
    Event(Event),
}

/// Result of Target.createTarget
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTargetResult {
    #[serde(rename = "targetId")]
    pub target_id: TargetId,
}

/// Result of Target.attachToTarget
#[derive(Debug, Clone, Deserialize)]
pub struct AttachToTargetResult {
    #[serde(rename = "sessionId")]
    pub session_id: SessionId,
}

/// Result of Page.navigate
#[derive(Debug, Clone, Deserialize)]
pub struct NavigateResult {
    #[serde(rename = "frameId")]
    pub frame_id: String,
    #[serde(rename = "errorText", default)]
    pub error_text: Option<String>,
}
