//! Host delegate capability.
//!
//! Adapters send reverse requests the client cannot answer on its own:
//! spawning a terminal for the debuggee, or launching a nested debug
//! session. The embedding application provides both through
//! [`HostDelegate`]; operations it does not override fail with
//! [`DapError::UnsupportedFeature`] and become failure responses on the
//! wire.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::DapError;
use crate::json::JsonValueExt;

/// Parsed arguments of a `runInTerminal` reverse request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInTerminalRequest {
    /// Terminal kind: "integrated" or "external".
    pub kind: Option<String>,
    /// Title for the terminal.
    pub title: Option<String>,
    /// Working directory for the command.
    pub cwd: Option<String>,
    /// Command line to run; never empty.
    pub args: Vec<String>,
    /// Extra environment. Non-string values in the incoming object are
    /// dropped rather than rejected.
    pub env: HashMap<String, String>,
}

impl RunInTerminalRequest {
    /// Parse from the reverse request's `arguments` value.
    pub(crate) fn from_arguments(arguments: &Value) -> Result<Self, DapError> {
        let raw_args = arguments.require_array("args")?;
        if raw_args.is_empty() {
            return Err(DapError::InvalidMessage(
                "runInTerminal requires a non-empty args array".into(),
            ));
        }
        let mut args = Vec::with_capacity(raw_args.len());
        for entry in raw_args {
            let Some(text) = entry.as_str() else {
                return Err(DapError::InvalidMessage(
                    "runInTerminal args must all be strings".into(),
                ));
            };
            args.push(text.to_string());
        }

        let mut env = HashMap::new();
        if let Some(raw_env) = arguments.member("env").and_then(Value::as_object) {
            for (key, value) in raw_env {
                if let Some(text) = value.as_str() {
                    env.insert(key.clone(), text.to_string());
                }
            }
        }

        Ok(Self {
            kind: arguments.str_member("kind").map(str::to_string),
            title: arguments.str_member("title").map(str::to_string),
            cwd: arguments.str_member("cwd").map(str::to_string),
            args,
            env,
        })
    }
}

/// Result of servicing a `runInTerminal` request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunInTerminalResult {
    /// Process id of the command, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_id: Option<i64>,
    /// Process id of the terminal shell, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell_process_id: Option<i64>,
}

/// Parsed arguments of a `startDebugging` reverse request.
#[derive(Debug, Clone, PartialEq)]
pub struct StartDebuggingRequest {
    /// "launch" or "attach" for the nested session.
    pub request: String,
    /// Configuration for the nested session.
    pub configuration: Map<String, Value>,
}

impl StartDebuggingRequest {
    /// Parse from the reverse request's `arguments` value.
    pub(crate) fn from_arguments(arguments: &Value) -> Result<Self, DapError> {
        let configuration = arguments.require_object("configuration")?.clone();
        Ok(Self {
            request: arguments
                .str_member("request")
                .unwrap_or("launch")
                .to_string(),
            configuration,
        })
    }
}

/// Result of servicing a `startDebugging` request. The wire response
/// carries no body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartDebuggingResult;

/// Capabilities the embedding application lends to the session.
///
/// Both operations default to [`DapError::UnsupportedFeature`]; a host
/// overrides the ones it can honor.
#[async_trait]
pub trait HostDelegate: Send + Sync {
    /// Run a command in a host-provided terminal.
    async fn run_in_terminal(
        &self,
        _request: RunInTerminalRequest,
    ) -> Result<RunInTerminalResult, DapError> {
        Err(DapError::UnsupportedFeature(
            "this host does not implement runInTerminal".into(),
        ))
    }

    /// Launch a nested debug session.
    async fn start_debugging(
        &self,
        _request: StartDebuggingRequest,
    ) -> Result<StartDebuggingResult, DapError> {
        Err(DapError::UnsupportedFeature(
            "this host does not implement startDebugging".into(),
        ))
    }
}
