//! DAP base protocol messages.
//!
//! Every wire message is one of request, response, or event, discriminated
//! by the `type` field. Command-specific argument and body structures live
//! in [`crate::types`].

use serde::{Deserialize, Serialize};

/// A DAP wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    /// A request, client- or adapter-initiated.
    Request(Request),
    /// A response to a request.
    Response(Response),
    /// An asynchronous event from the adapter.
    Event(Event),
}

impl Message {
    /// The sequence number carried by this message.
    pub fn seq(&self) -> i64 {
        match self {
            Message::Request(request) => request.seq,
            Message::Response(response) => response.seq,
            Message::Event(event) => event.seq,
        }
    }
}

/// A DAP request message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Sequence number, positive and unique per sender.
    pub seq: i64,
    /// The command to execute.
    pub command: String,
    /// Command arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
}

/// A DAP response message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Sequence number of this message.
    pub seq: i64,
    /// Sequence number of the request this responds to.
    pub request_seq: i64,
    /// Whether the request succeeded.
    pub success: bool,
    /// The command of the originating request.
    pub command: String,
    /// Error message when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Command-specific body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl Response {
    /// A success response answering `request`, with an optional body.
    pub fn success_for(seq: i64, request: &Request, body: Option<serde_json::Value>) -> Self {
        Self {
            seq,
            request_seq: request.seq,
            success: true,
            command: request.command.clone(),
            message: None,
            body,
        }
    }

    /// A failure response answering `request`, carrying a user-facing message.
    pub fn failure_for(seq: i64, request: &Request, message: impl Into<String>) -> Self {
        Self {
            seq,
            request_seq: request.seq,
            success: false,
            command: request.command.clone(),
            message: Some(message.into()),
            body: None,
        }
    }
}

/// A DAP event message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Sequence number of this message.
    pub seq: i64,
    /// The event name (e.g. "stopped").
    pub event: String,
    /// Event-specific body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}
