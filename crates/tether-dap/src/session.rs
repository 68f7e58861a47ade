//! Debug session lifecycle.
//!
//! A session owns the broker (which owns the transport) and drives the DAP
//! handshake: `initialize`, wait for the `initialized` event, then
//! `configurationDone` and the launch-or-attach request. Once running it
//! exposes the runtime operations, keeps breakpoint state reconciled, and
//! services the adapter's reverse requests through the host delegate.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::future::try_join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::process::Child;
use tokio::sync::{broadcast, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use tether_manifest::ManifestDescriptor;
use tether_store::{SessionRecord, SessionStore};

use crate::adapter::spawn_adapter;
use crate::breakpoint::{Breakpoint, BreakpointStore};
use crate::broker::MessageBroker;
use crate::capabilities::Capabilities;
use crate::error::DapError;
use crate::host::{HostDelegate, RunInTerminalRequest, StartDebuggingRequest};
use crate::protocol::Response;
use crate::transport::Transport;
use crate::types::{
    parse_body, parse_optional_body, BreakpointInfo, BreakpointLocation,
    BreakpointLocationsResponseBody, BreakpointsResponseBody, CompletionItem,
    CompletionsResponseBody, ContinuedEventBody, DataBreakpoint, EvaluateResponseBody,
    ExceptionFilterOptions, ExceptionOptions, FunctionBreakpoint, InitializeRequestArguments,
    InstructionBreakpoint, LoadedSourcesResponseBody, MemoryChunk, Module, ModulesResponseBody,
    OutputEventBody, ReadMemoryResponseBody, Scope, ScopesResponseBody, SetBreakpointsArguments,
    SetExceptionBreakpointsArguments, SetValueResponseBody, Source, StackTraceResponseBody,
    StepInTarget, StepInTargetsResponseBody, StoppedEventBody, Thread, ThreadsResponseBody,
    ValueFormat, Variable, VariablesResponseBody, WriteMemoryResponseBody,
};

/// Lifecycle state of a debug session. Strictly monotone: a session never
/// moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// Created, handshake not begun.
    Idle,
    /// Handshake in progress.
    Starting,
    /// Handshake complete; runtime operations are accepted.
    Running,
    /// `stop()` in progress.
    Stopping,
    /// Torn down; only cleanup remains.
    Terminated,
}

/// High-level events republished to session subscribers, in
/// adapter-delivery order.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Handshake completed; the session is running.
    Initialized,
    /// The debuggee stopped.
    Stopped(StoppedEventBody),
    /// The debuggee continued.
    Continued(ContinuedEventBody),
    /// The debug session ended.
    Terminated,
    /// The debuggee produced output.
    Output(OutputEventBody),
}

/// Options shared by the stepping requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOptions {
    /// Step only the named thread.
    pub single_thread: Option<bool>,
    /// Stepping granularity: "statement", "line", or "instruction".
    pub granularity: Option<String>,
}

/// An active connection to one debug adapter.
///
/// The session exclusively owns its broker; dropping the session closes
/// the broker, which fails outstanding requests and releases every
/// handler registration.
pub struct DebugSession {
    inner: Arc<SessionInner>,
    _child: Option<Child>,
}

struct SessionInner {
    broker: Arc<MessageBroker>,
    manifest: ManifestDescriptor,
    configuration: Map<String, Value>,
    state: RwLock<SessionState>,
    capabilities: RwLock<Capabilities>,
    breakpoints: tokio::sync::Mutex<BreakpointStore>,
    host: Option<Arc<dyn HostDelegate>>,
    store: Option<SessionStore>,
    events: broadcast::Sender<SessionEvent>,
    session_id: Uuid,
}

impl DebugSession {
    /// Spawn the adapter process described by `manifest` and build a
    /// session over its stdio.
    pub fn spawn(
        manifest: ManifestDescriptor,
        configuration: Map<String, Value>,
        host: Option<Arc<dyn HostDelegate>>,
        store: Option<SessionStore>,
    ) -> Result<Self, DapError> {
        let (child, transport) = spawn_adapter(&manifest)?;
        Ok(Self::build(
            manifest,
            configuration,
            transport,
            Some(child),
            host,
            store,
        ))
    }

    /// Build a session over an existing transport (a socket, or an
    /// in-memory pipe in tests).
    pub fn with_transport(
        manifest: ManifestDescriptor,
        configuration: Map<String, Value>,
        transport: Transport,
        host: Option<Arc<dyn HostDelegate>>,
        store: Option<SessionStore>,
    ) -> Self {
        Self::build(manifest, configuration, transport, None, host, store)
    }

    fn build(
        manifest: ManifestDescriptor,
        configuration: Map<String, Value>,
        transport: Transport,
        child: Option<Child>,
        host: Option<Arc<dyn HostDelegate>>,
        store: Option<SessionStore>,
    ) -> Self {
        let broker = MessageBroker::new(transport);
        let (events, _) = broadcast::channel(256);
        let inner = Arc::new(SessionInner {
            broker: Arc::clone(&broker),
            manifest,
            configuration,
            state: RwLock::new(SessionState::Idle),
            capabilities: RwLock::new(Capabilities::default()),
            breakpoints: tokio::sync::Mutex::new(BreakpointStore::new()),
            host,
            store,
            events,
            session_id: Uuid::new_v4(),
        });
        inner.register_reverse_handlers();
        inner.register_runtime_event_handlers();
        broker.start();
        Self {
            inner,
            _child: child,
        }
    }

    /// This session's persistent identifier.
    pub fn session_id(&self) -> Uuid {
        self.inner.session_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.inner.state.read()
    }

    /// Capabilities the adapter advertised during the handshake.
    pub fn capabilities(&self) -> Capabilities {
        self.inner.capabilities.read().clone()
    }

    /// Subscribe to the session event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Perform the handshake: `initialize`, await the `initialized` event,
    /// `configurationDone`, then launch or attach per the configuration's
    /// `request` key.
    ///
    /// Any failure leaves the session in [`SessionState::Terminated`];
    /// breakpoint state set beforehand stays pending.
    pub async fn start(&self) -> Result<(), DapError> {
        let inner = &self.inner;
        {
            let mut state = inner.state.write();
            if *state != SessionState::Idle {
                return Err(DapError::SessionNotActive);
            }
            *state = SessionState::Starting;
        }

        let request_command = inner
            .configuration
            .get("request")
            .and_then(Value::as_str)
            .unwrap_or("launch")
            .to_string();
        let mut launch_arguments = inner.configuration.clone();
        launch_arguments.remove("request");

        // The completion slot is distinct from any request's response:
        // configurationDone and launch run inside the `initialized` event
        // handler, and this is how their outcome reaches us.
        let (handshake_tx, handshake_rx) = oneshot::channel::<Result<(), DapError>>();
        let handshake_slot = Arc::new(Mutex::new(Some(handshake_tx)));
        {
            let handler_inner = Arc::clone(inner);
            let handshake_slot = Arc::clone(&handshake_slot);
            let request_command = request_command.clone();
            let launch_arguments = launch_arguments.clone();
            inner.broker.register_event_handler(
                "initialized",
                Arc::new(move |_event| {
                    let inner = Arc::clone(&handler_inner);
                    let handshake_slot = Arc::clone(&handshake_slot);
                    let request_command = request_command.clone();
                    let launch_arguments = launch_arguments.clone();
                    Box::pin(async move {
                        let Some(tx) = handshake_slot.lock().take() else {
                            debug!("ignoring duplicate initialized event");
                            return Ok(());
                        };
                        let result = inner
                            .finish_handshake(&request_command, launch_arguments)
                            .await;
                        let _ = tx.send(result);
                        Ok(())
                    })
                }),
            );
        }

        let initialize_arguments = InitializeRequestArguments {
            adapter_id: inner.manifest.identifier.clone(),
            path_format: "path".into(),
            supports_variable_type: true,
            supports_variable_paging: true,
        };
        let response = match inner
            .broker
            .send_request("initialize", Some(encode_arguments(&initialize_arguments)?))
            .await
        {
            Ok(response) => response,
            Err(err) => return self.abort_handshake(as_handshake_failure("initialize", err)),
        };
        if !response.success {
            let reason = response
                .message
                .unwrap_or_else(|| "adapter rejected initialize".into());
            return self.abort_handshake(DapError::AdapterUnavailable(reason));
        }
        *inner.capabilities.write() = Capabilities::from_initialize_body(response.body.as_ref());

        let mut closed = inner.broker.closed_signal();
        let outcome = tokio::select! {
            result = handshake_rx => result.unwrap_or_else(|_| {
                Err(DapError::AdapterUnavailable("handshake abandoned".into()))
            }),
            _ = wait_until_closed(&mut closed) => {
                Err(DapError::TransportFailure("broker closed during handshake".into()))
            }
        };

        match outcome {
            Ok(()) => {
                info!(session = %inner.session_id, adapter = %inner.manifest.identifier, "debug session running");
                inner.persist_record();
                Ok(())
            }
            Err(err) => self.abort_handshake(err),
        }
    }

    fn abort_handshake(&self, err: DapError) -> Result<(), DapError> {
        self.inner.broker.close();
        self.inner.advance_state(SessionState::Terminated);
        Err(err)
    }

    /// Tear the session down: `disconnect`, close the broker, end in
    /// [`SessionState::Terminated`]. A failed disconnect is logged and
    /// does not block the transition.
    pub async fn stop(&self) -> Result<(), DapError> {
        {
            let mut state = self.inner.state.write();
            if *state != SessionState::Running {
                return Err(DapError::SessionNotActive);
            }
            *state = SessionState::Stopping;
        }
        if let Err(err) = self
            .inner
            .checked_request("disconnect", Some(json!({"restart": false})))
            .await
        {
            warn!(error = %err, "disconnect failed during stop");
        }
        self.inner.broker.close();
        self.inner.advance_state(SessionState::Terminated);
        self.inner.remove_record();
        Ok(())
    }

    // -- flow control -------------------------------------------------------

    /// Resume execution of `thread_id`.
    pub async fn continue_thread(&self, thread_id: i64) -> Result<(), DapError> {
        self.inner.ensure_running()?;
        self.inner
            .checked_request("continue", Some(json!({"threadId": thread_id})))
            .await?;
        Ok(())
    }

    /// Pause execution of `thread_id`.
    pub async fn pause(&self, thread_id: i64) -> Result<(), DapError> {
        self.inner.ensure_running()?;
        self.inner
            .checked_request("pause", Some(json!({"threadId": thread_id})))
            .await?;
        Ok(())
    }

    /// Step over the current statement.
    pub async fn step_over(&self, thread_id: i64, options: &StepOptions) -> Result<(), DapError> {
        self.inner.ensure_running()?;
        self.inner
            .checked_request("next", Some(step_arguments(thread_id, None, options)))
            .await?;
        Ok(())
    }

    /// Step into the call at the current position. A specific `target`
    /// requires `supportsStepInTargetsRequest`.
    pub async fn step_in(
        &self,
        thread_id: i64,
        target: Option<i64>,
        options: &StepOptions,
    ) -> Result<(), DapError> {
        self.inner.ensure_running()?;
        if target.is_some() {
            self.inner.require_capability("supportsStepInTargetsRequest")?;
        }
        self.inner
            .checked_request("stepIn", Some(step_arguments(thread_id, target, options)))
            .await?;
        Ok(())
    }

    /// Step out of the current frame.
    pub async fn step_out(&self, thread_id: i64, options: &StepOptions) -> Result<(), DapError> {
        self.inner.ensure_running()?;
        self.inner
            .checked_request("stepOut", Some(step_arguments(thread_id, None, options)))
            .await?;
        Ok(())
    }

    /// Step backwards. Requires `supportsStepBack`; nothing is sent when
    /// the adapter did not advertise it.
    pub async fn step_back(&self, thread_id: i64, options: &StepOptions) -> Result<(), DapError> {
        self.inner.ensure_running()?;
        self.inner.require_capability("supportsStepBack")?;
        self.inner
            .checked_request("stepBack", Some(step_arguments(thread_id, None, options)))
            .await?;
        Ok(())
    }

    // -- inspection ---------------------------------------------------------

    /// All debuggee threads.
    pub async fn fetch_threads(&self) -> Result<Vec<Thread>, DapError> {
        self.inner.ensure_running()?;
        let response = self.inner.checked_request("threads", None).await?;
        Ok(parse_body::<ThreadsResponseBody>("threads", response.body)?.threads)
    }

    /// A slice of `thread_id`'s call stack.
    pub async fn fetch_stack_trace(
        &self,
        thread_id: i64,
        start_frame: Option<i64>,
        levels: Option<i64>,
    ) -> Result<StackTraceResponseBody, DapError> {
        self.inner.ensure_running()?;
        let mut arguments = Map::new();
        arguments.insert("threadId".into(), json!(thread_id));
        if let Some(start_frame) = start_frame {
            arguments.insert("startFrame".into(), json!(start_frame));
        }
        if let Some(levels) = levels {
            arguments.insert("levels".into(), json!(levels));
        }
        let response = self
            .inner
            .checked_request("stackTrace", Some(Value::Object(arguments)))
            .await?;
        parse_body("stackTrace", response.body)
    }

    /// Variable scopes of a stack frame.
    pub async fn fetch_scopes(&self, frame_id: i64) -> Result<Vec<Scope>, DapError> {
        self.inner.ensure_running()?;
        let response = self
            .inner
            .checked_request("scopes", Some(json!({"frameId": frame_id})))
            .await?;
        Ok(parse_body::<ScopesResponseBody>("scopes", response.body)?.scopes)
    }

    /// Children of a variables reference.
    pub async fn fetch_variables(&self, variables_reference: i64) -> Result<Vec<Variable>, DapError> {
        self.inner.ensure_running()?;
        let response = self
            .inner
            .checked_request(
                "variables",
                Some(json!({"variablesReference": variables_reference})),
            )
            .await?;
        Ok(parse_body::<VariablesResponseBody>("variables", response.body)?.variables)
    }

    /// Sources currently loaded by the debuggee.
    pub async fn fetch_loaded_sources(&self) -> Result<Vec<Source>, DapError> {
        self.inner.ensure_running()?;
        let response = self.inner.checked_request("loadedSources", None).await?;
        Ok(parse_body::<LoadedSourcesResponseBody>("loadedSources", response.body)?.sources)
    }

    /// Modules loaded into the debuggee.
    pub async fn fetch_modules(&self) -> Result<Vec<Module>, DapError> {
        self.inner.ensure_running()?;
        let response = self.inner.checked_request("modules", None).await?;
        Ok(parse_body::<ModulesResponseBody>("modules", response.body)?.modules)
    }

    /// Completion candidates for expression input.
    pub async fn fetch_completions(
        &self,
        text: &str,
        column: i64,
        line: Option<i64>,
        frame_id: Option<i64>,
    ) -> Result<Vec<CompletionItem>, DapError> {
        self.inner.ensure_running()?;
        let mut arguments = Map::new();
        arguments.insert("text".into(), json!(text));
        arguments.insert("column".into(), json!(column));
        if let Some(line) = line {
            arguments.insert("line".into(), json!(line));
        }
        if let Some(frame_id) = frame_id {
            arguments.insert("frameId".into(), json!(frame_id));
        }
        let response = self
            .inner
            .checked_request("completions", Some(Value::Object(arguments)))
            .await?;
        Ok(parse_body::<CompletionsResponseBody>("completions", response.body)?.targets)
    }

    /// Possible targets for stepping into the call at `frame_id`.
    /// Requires `supportsStepInTargetsRequest`.
    pub async fn fetch_step_in_targets(&self, frame_id: i64) -> Result<Vec<StepInTarget>, DapError> {
        self.inner.ensure_running()?;
        self.inner.require_capability("supportsStepInTargetsRequest")?;
        let response = self
            .inner
            .checked_request("stepInTargets", Some(json!({"frameId": frame_id})))
            .await?;
        Ok(parse_body::<StepInTargetsResponseBody>("stepInTargets", response.body)?.targets)
    }

    // -- memory -------------------------------------------------------------

    /// Read debuggee memory. The adapter's base64 payload is decoded,
    /// tolerating embedded whitespace.
    pub async fn read_memory(
        &self,
        memory_reference: &str,
        offset: Option<i64>,
        count: i64,
    ) -> Result<MemoryChunk, DapError> {
        self.inner.ensure_running()?;
        let mut arguments = Map::new();
        arguments.insert("memoryReference".into(), json!(memory_reference));
        if let Some(offset) = offset {
            arguments.insert("offset".into(), json!(offset));
        }
        arguments.insert("count".into(), json!(count));
        let response = self
            .inner
            .checked_request("readMemory", Some(Value::Object(arguments)))
            .await?;
        let body = parse_body::<ReadMemoryResponseBody>("readMemory", response.body)?;
        let data = match body.data {
            Some(encoded) => {
                let compact: String = encoded
                    .chars()
                    .filter(|c| !c.is_ascii_whitespace())
                    .collect();
                BASE64.decode(compact.as_bytes()).map_err(|e| {
                    DapError::InvalidResponse(format!("readMemory data is not valid base64: {e}"))
                })?
            }
            None => Vec::new(),
        };
        Ok(MemoryChunk {
            address: body.address,
            data,
            unreadable_bytes: body.unreadable_bytes,
        })
    }

    /// Write debuggee memory; `data` is base64-encoded on the wire.
    pub async fn write_memory(
        &self,
        memory_reference: &str,
        offset: Option<i64>,
        data: &[u8],
    ) -> Result<WriteMemoryResponseBody, DapError> {
        self.inner.ensure_running()?;
        let mut arguments = Map::new();
        arguments.insert("memoryReference".into(), json!(memory_reference));
        if let Some(offset) = offset {
            arguments.insert("offset".into(), json!(offset));
        }
        arguments.insert("data".into(), json!(BASE64.encode(data)));
        let response = self
            .inner
            .checked_request("writeMemory", Some(Value::Object(arguments)))
            .await?;
        parse_optional_body("writeMemory", response.body)
    }

    // -- evaluation ---------------------------------------------------------

    /// Evaluate an expression, optionally in the context of a frame.
    pub async fn evaluate(
        &self,
        expression: &str,
        frame_id: Option<i64>,
        context: Option<&str>,
    ) -> Result<EvaluateResponseBody, DapError> {
        self.inner.ensure_running()?;
        let mut arguments = Map::new();
        arguments.insert("expression".into(), json!(expression));
        if let Some(frame_id) = frame_id {
            arguments.insert("frameId".into(), json!(frame_id));
        }
        if let Some(context) = context {
            arguments.insert("context".into(), json!(context));
        }
        let response = self
            .inner
            .checked_request("evaluate", Some(Value::Object(arguments)))
            .await?;
        parse_body("evaluate", response.body)
    }

    /// Assign a new value to an l-value expression. Requires
    /// `supportsSetExpression`.
    pub async fn set_expression(
        &self,
        expression: &str,
        value: &str,
        frame_id: Option<i64>,
        format: Option<ValueFormat>,
    ) -> Result<SetValueResponseBody, DapError> {
        self.inner.ensure_running()?;
        self.inner.require_capability("supportsSetExpression")?;
        let mut arguments = Map::new();
        arguments.insert("expression".into(), json!(expression));
        arguments.insert("value".into(), json!(value));
        if let Some(frame_id) = frame_id {
            arguments.insert("frameId".into(), json!(frame_id));
        }
        if let Some(format) = format {
            arguments.insert("format".into(), encode_arguments(&format)?);
        }
        let response = self
            .inner
            .checked_request("setExpression", Some(Value::Object(arguments)))
            .await?;
        parse_body("setExpression", response.body)
    }

    /// Assign a new value to a named child of a variables container.
    /// Requires `supportsSetVariable`.
    pub async fn set_variable(
        &self,
        variables_reference: i64,
        name: &str,
        value: &str,
        format: Option<ValueFormat>,
    ) -> Result<SetValueResponseBody, DapError> {
        self.inner.ensure_running()?;
        self.inner.require_capability("supportsSetVariable")?;
        let mut arguments = Map::new();
        arguments.insert("variablesReference".into(), json!(variables_reference));
        arguments.insert("name".into(), json!(name));
        arguments.insert("value".into(), json!(value));
        if let Some(format) = format {
            arguments.insert("format".into(), encode_arguments(&format)?);
        }
        let response = self
            .inner
            .checked_request("setVariable", Some(Value::Object(arguments)))
            .await?;
        parse_body("setVariable", response.body)
    }

    // -- breakpoints --------------------------------------------------------

    /// Replace the desired breakpoints for one source file and reconcile.
    /// An empty list schedules the file for clearing adapter-side.
    pub async fn set_source_breakpoints(
        &self,
        file: impl Into<PathBuf>,
        breakpoints: Vec<Breakpoint>,
    ) -> Result<(), DapError> {
        self.inner
            .breakpoints
            .lock()
            .await
            .set_file(file.into(), breakpoints);
        self.inner.flush_source_breakpoints().await
    }

    /// Replace the whole desired breakpoint map and reconcile.
    pub async fn replace_source_breakpoints(
        &self,
        desired: HashMap<PathBuf, Vec<Breakpoint>>,
    ) -> Result<(), DapError> {
        self.inner.breakpoints.lock().await.replace_all(desired);
        self.inner.flush_source_breakpoints().await
    }

    /// Reconcile source breakpoints with the adapter. No-op unless the
    /// desired state changed since the last successful flush.
    pub async fn flush_source_breakpoints(&self) -> Result<(), DapError> {
        self.inner.flush_source_breakpoints().await
    }

    /// Replace the desired exception-breakpoint configuration and
    /// reconcile. Non-empty `filter_options` requires
    /// `supportsExceptionFilterOptions`; non-empty `exception_options`
    /// requires `supportsExceptionOptions`.
    pub async fn set_exception_breakpoints(
        &self,
        filters: Vec<String>,
        filter_options: Vec<ExceptionFilterOptions>,
        exception_options: Vec<ExceptionOptions>,
    ) -> Result<(), DapError> {
        self.inner
            .breakpoints
            .lock()
            .await
            .set_exception_state(filters, filter_options, exception_options);
        self.inner.flush_exception_breakpoints().await
    }

    /// Reconcile exception breakpoints with the adapter.
    pub async fn flush_exception_breakpoints(&self) -> Result<(), DapError> {
        self.inner.flush_exception_breakpoints().await
    }

    /// One-shot function breakpoints. Requires
    /// `supportsFunctionBreakpoints`.
    pub async fn set_function_breakpoints(
        &self,
        breakpoints: Vec<FunctionBreakpoint>,
    ) -> Result<Vec<BreakpointInfo>, DapError> {
        self.inner.ensure_running()?;
        self.inner.require_capability("supportsFunctionBreakpoints")?;
        let response = self
            .inner
            .checked_request(
                "setFunctionBreakpoints",
                Some(json!({"breakpoints": breakpoints})),
            )
            .await?;
        Ok(parse_body::<BreakpointsResponseBody>("setFunctionBreakpoints", response.body)?
            .breakpoints)
    }

    /// One-shot instruction breakpoints. Requires
    /// `supportsInstructionBreakpoints`.
    pub async fn set_instruction_breakpoints(
        &self,
        breakpoints: Vec<InstructionBreakpoint>,
    ) -> Result<Vec<BreakpointInfo>, DapError> {
        self.inner.ensure_running()?;
        self.inner
            .require_capability("supportsInstructionBreakpoints")?;
        let response = self
            .inner
            .checked_request(
                "setInstructionBreakpoints",
                Some(json!({"breakpoints": breakpoints})),
            )
            .await?;
        Ok(
            parse_body::<BreakpointsResponseBody>("setInstructionBreakpoints", response.body)?
                .breakpoints,
        )
    }

    /// One-shot data breakpoints. Requires `supportsDataBreakpoints`.
    pub async fn set_data_breakpoints(
        &self,
        breakpoints: Vec<DataBreakpoint>,
    ) -> Result<Vec<BreakpointInfo>, DapError> {
        self.inner.ensure_running()?;
        self.inner.require_capability("supportsDataBreakpoints")?;
        let response = self
            .inner
            .checked_request("setDataBreakpoints", Some(json!({"breakpoints": breakpoints})))
            .await?;
        Ok(parse_body::<BreakpointsResponseBody>("setDataBreakpoints", response.body)?.breakpoints)
    }

    /// Candidate breakpoint positions in a source region. Requires
    /// `supportsBreakpointLocationsRequest`.
    pub async fn breakpoint_locations(
        &self,
        source_path: &Path,
        line: i64,
        column: Option<i64>,
        end_line: Option<i64>,
        end_column: Option<i64>,
    ) -> Result<Vec<BreakpointLocation>, DapError> {
        self.inner.ensure_running()?;
        self.inner
            .require_capability("supportsBreakpointLocationsRequest")?;
        let mut arguments = Map::new();
        arguments.insert(
            "source".into(),
            encode_arguments(&source_descriptor(source_path))?,
        );
        arguments.insert("line".into(), json!(line));
        if let Some(column) = column {
            arguments.insert("column".into(), json!(column));
        }
        if let Some(end_line) = end_line {
            arguments.insert("endLine".into(), json!(end_line));
        }
        if let Some(end_column) = end_column {
            arguments.insert("endColumn".into(), json!(end_column));
        }
        let response = self
            .inner
            .checked_request("breakpointLocations", Some(Value::Object(arguments)))
            .await?;
        Ok(
            parse_body::<BreakpointLocationsResponseBody>("breakpointLocations", response.body)?
                .breakpoints,
        )
    }
}

impl Drop for DebugSession {
    fn drop(&mut self) {
        // Explicit deregistration path: closing the broker drops every
        // handler closure that captured this session's state.
        self.inner.broker.close();
        self.inner.remove_record();
    }
}

impl SessionInner {
    fn ensure_running(&self) -> Result<(), DapError> {
        if *self.state.read() == SessionState::Running {
            Ok(())
        } else {
            Err(DapError::SessionNotActive)
        }
    }

    fn require_capability(&self, name: &str) -> Result<(), DapError> {
        self.capabilities.read().require(name)
    }

    fn advance_state(&self, to: SessionState) {
        let mut state = self.state.write();
        if to > *state {
            debug!(from = ?*state, ?to, "session state advanced");
            *state = to;
        }
    }

    /// Send a request and map a `success=false` response to
    /// [`DapError::AdapterUnavailable`] carrying the adapter's message.
    async fn checked_request(
        &self,
        command: &str,
        arguments: Option<Value>,
    ) -> Result<Response, DapError> {
        let response = self.broker.send_request(command, arguments).await?;
        if response.success {
            Ok(response)
        } else {
            Err(DapError::AdapterUnavailable(
                response
                    .message
                    .unwrap_or_else(|| format!("adapter rejected {command}")),
            ))
        }
    }

    /// Steps 6-8 of the handshake, run from the `initialized` handler.
    async fn finish_handshake(
        &self,
        request_command: &str,
        launch_arguments: Map<String, Value>,
    ) -> Result<(), DapError> {
        if *self.state.read() != SessionState::Starting {
            debug!("initialized event outside handshake; ignoring");
            return Ok(());
        }
        self.checked_request("configurationDone", Some(json!({})))
            .await
            .map_err(|e| as_handshake_failure("configurationDone", e))?;
        self.checked_request(request_command, Some(Value::Object(launch_arguments)))
            .await
            .map_err(|e| as_handshake_failure(request_command, e))?;
        self.advance_state(SessionState::Running);
        let _ = self.events.send(SessionEvent::Initialized);
        if let Err(err) = self.flush_all_breakpoints().await {
            warn!(error = %err, "initial breakpoint flush failed; pending for retry");
        }
        Ok(())
    }

    async fn flush_all_breakpoints(&self) -> Result<(), DapError> {
        self.flush_source_breakpoints().await?;
        self.flush_exception_breakpoints().await
    }

    /// Source reconciliation: push every file whose desired state changed,
    /// including files that lost all breakpoints (they get an empty list
    /// so the adapter clears them). Per-file updates run concurrently;
    /// the first failure re-raises the pending flag.
    async fn flush_source_breakpoints(&self) -> Result<(), DapError> {
        if *self.state.read() != SessionState::Running {
            return Ok(());
        }
        let (grouped, files) = {
            let mut store = self.breakpoints.lock().await;
            if !store.source_sync_pending {
                return Ok(());
            }
            store.source_sync_pending = false;
            (store.desired.clone(), store.files_to_update())
        };

        let updates = files.into_iter().map(|file| {
            let breakpoints = grouped.get(&file).cloned().unwrap_or_default();
            self.push_source_file(file, breakpoints)
        });
        match try_join_all(updates).await {
            Ok(_) => {
                let pushed = grouped.keys().cloned().collect();
                self.breakpoints.lock().await.mark_source_synchronized(pushed);
                Ok(())
            }
            Err(err) => {
                self.breakpoints.lock().await.source_sync_pending = true;
                Err(err)
            }
        }
    }

    async fn push_source_file(
        &self,
        file: PathBuf,
        breakpoints: Vec<Breakpoint>,
    ) -> Result<(), DapError> {
        let arguments = SetBreakpointsArguments {
            source: source_descriptor(&file),
            breakpoints: breakpoints.iter().map(Breakpoint::to_wire).collect(),
        };
        self.checked_request("setBreakpoints", Some(encode_arguments(&arguments)?))
            .await?;
        Ok(())
    }

    /// Exception reconciliation: one `setExceptionBreakpoints` carrying
    /// the combined desired state, capability-gated per option kind.
    async fn flush_exception_breakpoints(&self) -> Result<(), DapError> {
        if *self.state.read() != SessionState::Running {
            return Ok(());
        }
        let arguments = {
            let mut store = self.breakpoints.lock().await;
            if !store.exception_sync_pending {
                return Ok(());
            }
            store.exception_sync_pending = false;
            SetExceptionBreakpointsArguments {
                filters: store.exception_filters.clone(),
                filter_options: store.filter_options.clone(),
                exception_options: store.exception_options.clone(),
            }
        };

        let result = async {
            if !arguments.filter_options.is_empty() {
                self.require_capability("supportsExceptionFilterOptions")?;
            }
            if !arguments.exception_options.is_empty() {
                self.require_capability("supportsExceptionOptions")?;
            }
            self.checked_request("setExceptionBreakpoints", Some(encode_arguments(&arguments)?))
                .await
        }
        .await;

        match result {
            Ok(response) => {
                // Body is optional here; parse it opportunistically.
                if let Some(body) = response.body {
                    if let Ok(parsed) = serde_json::from_value::<BreakpointsResponseBody>(body) {
                        debug!(
                            count = parsed.breakpoints.len(),
                            "exception breakpoints acknowledged"
                        );
                    }
                }
                Ok(())
            }
            Err(err) => {
                self.breakpoints.lock().await.exception_sync_pending = true;
                Err(err)
            }
        }
    }

    fn persist_record(&self) {
        let Some(store) = &self.store else { return };
        let record = SessionRecord::new(
            self.session_id,
            self.manifest.identifier.clone(),
            Value::Object(self.configuration.clone()),
        );
        if let Err(err) = store.save(&record) {
            warn!(error = %err, "failed to persist session record");
        }
    }

    fn remove_record(&self) {
        let Some(store) = &self.store else { return };
        if let Err(err) = store.remove(self.session_id) {
            warn!(error = %err, "failed to remove session record");
        }
    }

    /// Wire the `runInTerminal` and `startDebugging` reverse requests to
    /// the host delegate.
    fn register_reverse_handlers(self: &Arc<Self>) {
        let handler_inner = Arc::clone(self);
        self.broker.register_request_handler(
            "runInTerminal",
            Arc::new(move |request| {
                let inner = Arc::clone(&handler_inner);
                Box::pin(async move {
                    let arguments = request.arguments.ok_or_else(|| {
                        DapError::InvalidMessage("runInTerminal request missing arguments".into())
                    })?;
                    let parsed = RunInTerminalRequest::from_arguments(&arguments)?;
                    let host = inner.host.as_ref().ok_or_else(|| {
                        DapError::UnsupportedFeature("no host delegate configured".into())
                    })?;
                    let result = host.run_in_terminal(parsed).await?;
                    let body = serde_json::to_value(result).map_err(|e| {
                        DapError::InvalidResponse(format!(
                            "unencodable runInTerminal result: {e}"
                        ))
                    })?;
                    Ok(Some(body))
                })
            }),
        );

        let handler_inner = Arc::clone(self);
        self.broker.register_request_handler(
            "startDebugging",
            Arc::new(move |request| {
                let inner = Arc::clone(&handler_inner);
                Box::pin(async move {
                    let arguments = request.arguments.ok_or_else(|| {
                        DapError::InvalidMessage("startDebugging request missing arguments".into())
                    })?;
                    let parsed = StartDebuggingRequest::from_arguments(&arguments)?;
                    let host = inner.host.as_ref().ok_or_else(|| {
                        DapError::UnsupportedFeature("no host delegate configured".into())
                    })?;
                    host.start_debugging(parsed).await?;
                    Ok(None)
                })
            }),
        );
    }

    /// Republish adapter runtime events as typed session events.
    /// Malformed bodies are logged and dropped; they never fail the
    /// session.
    fn register_runtime_event_handlers(self: &Arc<Self>) {
        let handler_inner = Arc::clone(self);
        self.broker.register_event_handler(
            "stopped",
            Arc::new(move |event| {
                let inner = Arc::clone(&handler_inner);
                Box::pin(async move {
                    match event
                        .body
                        .as_ref()
                        .ok_or_else(|| {
                            DapError::InvalidMessage("stopped event missing body".into())
                        })
                        .and_then(StoppedEventBody::from_json)
                    {
                        Ok(body) => {
                            let _ = inner.events.send(SessionEvent::Stopped(body));
                        }
                        Err(err) => warn!(error = %err, "dropping malformed stopped event"),
                    }
                    Ok(())
                })
            }),
        );

        let handler_inner = Arc::clone(self);
        self.broker.register_event_handler(
            "continued",
            Arc::new(move |event| {
                let inner = Arc::clone(&handler_inner);
                Box::pin(async move {
                    match event
                        .body
                        .as_ref()
                        .ok_or_else(|| {
                            DapError::InvalidMessage("continued event missing body".into())
                        })
                        .and_then(ContinuedEventBody::from_json)
                    {
                        Ok(body) => {
                            let _ = inner.events.send(SessionEvent::Continued(body));
                        }
                        Err(err) => warn!(error = %err, "dropping malformed continued event"),
                    }
                    Ok(())
                })
            }),
        );

        let handler_inner = Arc::clone(self);
        self.broker.register_event_handler(
            "terminated",
            Arc::new(move |_event| {
                let inner = Arc::clone(&handler_inner);
                Box::pin(async move {
                    inner.advance_state(SessionState::Terminated);
                    let _ = inner.events.send(SessionEvent::Terminated);
                    Ok(())
                })
            }),
        );

        let handler_inner = Arc::clone(self);
        self.broker.register_event_handler(
            "output",
            Arc::new(move |event| {
                let inner = Arc::clone(&handler_inner);
                Box::pin(async move {
                    match event
                        .body
                        .as_ref()
                        .ok_or_else(|| DapError::InvalidMessage("output event missing body".into()))
                        .and_then(OutputEventBody::from_json)
                    {
                        Ok(body) => {
                            let _ = inner.events.send(SessionEvent::Output(body));
                        }
                        Err(err) => warn!(error = %err, "dropping malformed output event"),
                    }
                    Ok(())
                })
            }),
        );
    }
}

fn source_descriptor(path: &Path) -> Source {
    Source {
        name: path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned()),
        path: Some(path.to_string_lossy().into_owned()),
        source_reference: None,
    }
}

fn step_arguments(thread_id: i64, target: Option<i64>, options: &StepOptions) -> Value {
    let mut arguments = Map::new();
    arguments.insert("threadId".into(), json!(thread_id));
    if let Some(target) = target {
        arguments.insert("targetId".into(), json!(target));
    }
    if let Some(single_thread) = options.single_thread {
        arguments.insert("singleThread".into(), json!(single_thread));
    }
    if let Some(granularity) = &options.granularity {
        arguments.insert("granularity".into(), json!(granularity));
    }
    Value::Object(arguments)
}

fn encode_arguments<T: Serialize>(arguments: &T) -> Result<Value, DapError> {
    serde_json::to_value(arguments)
        .map_err(|e| DapError::InvalidMessage(format!("unencodable request arguments: {e}")))
}

fn as_handshake_failure(what: &str, err: DapError) -> DapError {
    match err {
        already @ DapError::AdapterUnavailable(_) => already,
        other => DapError::AdapterUnavailable(format!("{what} failed: {other}")),
    }
}

async fn wait_until_closed(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn manifest() -> ManifestDescriptor {
        ManifestDescriptor {
            identifier: "mock-adapter".into(),
            executable: "mock-adapter".into(),
            arguments: vec![],
            working_directory: None,
            environment: StdHashMap::new(),
        }
    }

    fn idle_session() -> DebugSession {
        let (client, _server) = tokio::io::duplex(4096);
        let (read_half, write_half) = tokio::io::split(client);
        DebugSession::with_transport(
            manifest(),
            Map::new(),
            Transport::new(read_half, write_half),
            None,
            None,
        )
    }

    #[test]
    fn session_state_order_is_monotone() {
        assert!(SessionState::Idle < SessionState::Starting);
        assert!(SessionState::Starting < SessionState::Running);
        assert!(SessionState::Running < SessionState::Stopping);
        assert!(SessionState::Stopping < SessionState::Terminated);
    }

    #[test]
    fn step_arguments_merges_options() {
        let options = StepOptions {
            single_thread: Some(true),
            granularity: Some("instruction".into()),
        };
        let arguments = step_arguments(3, Some(8), &options);
        assert_eq!(
            arguments,
            json!({
                "threadId": 3,
                "targetId": 8,
                "singleThread": true,
                "granularity": "instruction",
            })
        );

        let bare = step_arguments(3, None, &StepOptions::default());
        assert_eq!(bare, json!({"threadId": 3}));
    }

    #[test]
    fn source_descriptor_uses_basename() {
        let source = source_descriptor(Path::new("/work/src/main.rs"));
        assert_eq!(source.name.as_deref(), Some("main.rs"));
        assert_eq!(source.path.as_deref(), Some("/work/src/main.rs"));
        assert_eq!(source.source_reference, None);
    }

    #[test]
    fn handshake_failure_wrapping_preserves_adapter_unavailable() {
        let wrapped = as_handshake_failure(
            "launch",
            DapError::AdapterUnavailable("program missing".into()),
        );
        assert_eq!(wrapped.to_string(), "adapter unavailable: program missing");

        let wrapped = as_handshake_failure(
            "launch",
            DapError::TransportFailure("pipe closed".into()),
        );
        assert!(matches!(wrapped, DapError::AdapterUnavailable(_)));
        assert!(wrapped.to_string().contains("launch failed"));
    }

    #[tokio::test]
    async fn runtime_operations_rejected_when_idle() {
        let session = idle_session();
        assert_eq!(session.state(), SessionState::Idle);

        let err = session.fetch_threads().await.unwrap_err();
        assert!(matches!(err, DapError::SessionNotActive));

        let err = session.continue_thread(1).await.unwrap_err();
        assert!(matches!(err, DapError::SessionNotActive));

        let err = session
            .step_back(1, &StepOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DapError::SessionNotActive));
    }

    #[tokio::test]
    async fn stop_rejected_when_not_running() {
        let session = idle_session();
        let err = session.stop().await.unwrap_err();
        assert!(matches!(err, DapError::SessionNotActive));
    }

    #[tokio::test]
    async fn breakpoint_edits_before_start_stay_pending() {
        let session = idle_session();
        session
            .set_source_breakpoints("/src/a.rs", vec![Breakpoint::new(4)])
            .await
            .unwrap();
        // Not running: nothing was sent, the desired state waits for the
        // post-handshake flush.
        let store = session.inner.breakpoints.lock().await;
        assert!(store.source_sync_pending);
        assert_eq!(store.desired.len(), 1);
    }

    #[tokio::test]
    async fn subscribe_sees_no_events_for_idle_session() {
        let session = idle_session();
        let mut events = session.subscribe();
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }
}
