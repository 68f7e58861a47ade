//! tether-dap — Debug Adapter Protocol client runtime.
//!
//! Drives an external debug adapter over `Content-Length`-framed JSON:
//! message framing and reassembly, request/response correlation over a
//! single pipe, event fan-out, reverse-request servicing, the session
//! handshake, and breakpoint reconciliation.

pub mod adapter;
pub mod breakpoint;
pub mod broker;
pub mod capabilities;
pub mod error;
pub mod host;
pub mod json;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod types;

// Re-export key types for convenience.
pub use breakpoint::Breakpoint;
pub use broker::MessageBroker;
pub use capabilities::Capabilities;
pub use error::DapError;
pub use host::{
    HostDelegate, RunInTerminalRequest, RunInTerminalResult, StartDebuggingRequest,
    StartDebuggingResult,
};
pub use json::JsonValueExt;
pub use protocol::{Event, Message, Request, Response};
pub use session::{DebugSession, SessionEvent, SessionState, StepOptions};
pub use transport::{FrameDecoder, Transport};
