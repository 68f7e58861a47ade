//! Typed DAP argument and body structures.
//!
//! Request arguments serialize with camelCase field names and omit absent
//! optionals. Response bodies parse fail-fast: a body that does not match
//! the expected shape for its command is an [`DapError::InvalidResponse`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DapError;
use crate::json::JsonValueExt;

/// Parse a required response body for `command`.
pub(crate) fn parse_body<T: DeserializeOwned>(
    command: &str,
    body: Option<Value>,
) -> Result<T, DapError> {
    let body = body
        .ok_or_else(|| DapError::InvalidResponse(format!("{command} response missing body")))?;
    serde_json::from_value(body)
        .map_err(|e| DapError::InvalidResponse(format!("malformed {command} response body: {e}")))
}

/// Parse an optional response body, substituting the default when absent.
pub(crate) fn parse_optional_body<T: DeserializeOwned + Default>(
    command: &str,
    body: Option<Value>,
) -> Result<T, DapError> {
    match body {
        Some(body) => serde_json::from_value(body).map_err(|e| {
            DapError::InvalidResponse(format!("malformed {command} response body: {e}"))
        }),
        None => Ok(T::default()),
    }
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// Arguments for the `initialize` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequestArguments {
    /// Identifier of the debug adapter, from the manifest.
    #[serde(rename = "adapterID")]
    pub adapter_id: String,
    /// Path format: "path" or "uri".
    pub path_format: String,
    /// Whether the client understands the `type` attribute on variables.
    pub supports_variable_type: bool,
    /// Whether the client supports paging of variables.
    pub supports_variable_paging: bool,
}

// ---------------------------------------------------------------------------
// Source & breakpoints
// ---------------------------------------------------------------------------

/// A source location descriptor.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// Short display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// File system path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Reference for sources without a path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_reference: Option<i64>,
}

/// A source breakpoint on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBreakpoint {
    /// Source line of the breakpoint.
    pub line: i64,
    /// Optional column.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<i64>,
    /// Condition expression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Hit-count condition expression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_condition: Option<String>,
    /// Log message (logpoint).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_message: Option<String>,
}

/// Arguments for `setBreakpoints`.
///
/// `breakpoints` is always serialized, including when empty: an empty
/// array is how a previously-populated source is cleared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointsArguments {
    /// The source to replace breakpoints for.
    pub source: Source,
    /// Full replacement set for that source.
    pub breakpoints: Vec<SourceBreakpoint>,
}

/// A function breakpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionBreakpoint {
    /// Name of the function.
    pub name: String,
    /// Condition expression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Hit-count condition expression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_condition: Option<String>,
}

/// An instruction breakpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionBreakpoint {
    /// Instruction reference, typically a memory address.
    pub instruction_reference: String,
    /// Offset from the reference in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    /// Condition expression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Hit-count condition expression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_condition: Option<String>,
}

/// A data breakpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataBreakpoint {
    /// Identifier obtained from a `dataBreakpointInfo` exchange.
    pub data_id: String,
    /// Access kind: "read", "write", or "readWrite".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_type: Option<String>,
    /// Condition expression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Hit-count condition expression.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_condition: Option<String>,
}

/// A breakpoint as reported back by the adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointInfo {
    /// Adapter-assigned identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Whether the adapter could bind the breakpoint.
    pub verified: bool,
    /// Explanation when unverified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Actual source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    /// Actual line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<i64>,
    /// Actual column.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<i64>,
}

/// Body shared by the `set*Breakpoints` responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointsResponseBody {
    /// One entry per requested breakpoint, in request order.
    pub breakpoints: Vec<BreakpointInfo>,
}

/// A candidate breakpoint position from `breakpointLocations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointLocation {
    /// Start line of the location.
    pub line: i64,
    /// Start column.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<i64>,
    /// End line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<i64>,
    /// End column.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_column: Option<i64>,
}

/// Body of the `breakpointLocations` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointLocationsResponseBody {
    /// Candidate positions.
    pub breakpoints: Vec<BreakpointLocation>,
}

// ---------------------------------------------------------------------------
// Exception breakpoints
// ---------------------------------------------------------------------------

/// Per-filter options for `setExceptionBreakpoints`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionFilterOptions {
    /// Identifier of the exception filter.
    pub filter_id: String,
    /// Condition expression for the filter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// A segment in an exception path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionPathSegment {
    /// Whether `names` is an exclusion list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negate: Option<bool>,
    /// Exception names selected by this segment.
    pub names: Vec<String>,
}

/// Detailed exception configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionOptions {
    /// Path selecting the exceptions this applies to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<ExceptionPathSegment>>,
    /// Break mode: "never", "always", "unhandled", "userUnhandled".
    pub break_mode: String,
}

/// Arguments for `setExceptionBreakpoints`.
///
/// `filters` is always serialized; the option vectors are omitted when
/// empty so adapters without the matching capability never see them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetExceptionBreakpointsArguments {
    /// Enabled exception filter identifiers.
    pub filters: Vec<String>,
    /// Per-filter options.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub filter_options: Vec<ExceptionFilterOptions>,
    /// Detailed exception configurations.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub exception_options: Vec<ExceptionOptions>,
}

// ---------------------------------------------------------------------------
// Threads, frames, scopes, variables
// ---------------------------------------------------------------------------

/// A thread in the debuggee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    /// Unique thread identifier.
    pub id: i64,
    /// Human-readable thread name.
    pub name: String,
}

/// Body of the `threads` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadsResponseBody {
    /// All threads.
    pub threads: Vec<Thread>,
}

/// A stack frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    /// Unique frame identifier.
    pub id: i64,
    /// Frame name, typically the function name.
    pub name: String,
    /// Source of the frame.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    /// Line within the source.
    pub line: i64,
    /// Column within the source.
    pub column: i64,
}

/// Body of the `stackTrace` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceResponseBody {
    /// The requested frames, topmost first.
    pub stack_frames: Vec<StackFrame>,
    /// Total number of frames available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_frames: Option<i64>,
}

/// A variable scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    /// Scope name ("Locals", "Registers", ...).
    pub name: String,
    /// Reference for fetching the scope's variables.
    pub variables_reference: i64,
    /// Whether fetching is expensive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expensive: Option<bool>,
}

/// Body of the `scopes` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopesResponseBody {
    /// Scopes of the frame.
    pub scopes: Vec<Scope>,
}

/// A variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    /// Variable name.
    pub name: String,
    /// Rendered value.
    pub value: String,
    /// Type name.
    #[serde(rename = "type")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable_type: Option<String>,
    /// Non-zero when the variable has children.
    pub variables_reference: i64,
}

/// Body of the `variables` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariablesResponseBody {
    /// Child variables.
    pub variables: Vec<Variable>,
}

// ---------------------------------------------------------------------------
// Modules, loaded sources, completions, step-in targets
// ---------------------------------------------------------------------------

/// A module loaded into the debuggee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    /// Module identifier (number or string).
    pub id: Value,
    /// Module name.
    pub name: String,
    /// Path of the module, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Whether symbols are loaded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol_status: Option<String>,
}

/// Body of the `modules` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModulesResponseBody {
    /// Loaded modules.
    pub modules: Vec<Module>,
    /// Total module count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_modules: Option<i64>,
}

/// Body of the `loadedSources` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedSourcesResponseBody {
    /// All currently loaded sources.
    pub sources: Vec<Source>,
}

/// A completion suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionItem {
    /// Label shown to the user.
    pub label: String,
    /// Text inserted instead of the label, when different.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Item kind ("method", "variable", ...).
    #[serde(rename = "type")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
    /// Start of the replaced range.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    /// Length of the replaced range.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<i64>,
}

/// Body of the `completions` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionsResponseBody {
    /// Completion candidates.
    pub targets: Vec<CompletionItem>,
}

/// A target for `stepIn`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepInTarget {
    /// Target identifier, passed back in `stepIn`.
    pub id: i64,
    /// Display label.
    pub label: String,
    /// Line of the target.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<i64>,
}

/// Body of the `stepInTargets` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepInTargetsResponseBody {
    /// Possible step-in targets.
    pub targets: Vec<StepInTarget>,
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

/// Body of the `readMemory` response (base64 payload still encoded).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadMemoryResponseBody {
    /// Address the read actually started at.
    pub address: String,
    /// Bytes that could not be read before `data`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unreadable_bytes: Option<i64>,
    /// Base64-encoded memory contents.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// A decoded chunk of debuggee memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryChunk {
    /// Address the read actually started at.
    pub address: String,
    /// The decoded bytes.
    pub data: Vec<u8>,
    /// Bytes that could not be read before `data`.
    pub unreadable_bytes: Option<i64>,
}

/// Body of the `writeMemory` response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteMemoryResponseBody {
    /// Offset the write actually started at.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    /// Number of bytes written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_written: Option<i64>,
}

// ---------------------------------------------------------------------------
// Evaluate / set expression / set variable
// ---------------------------------------------------------------------------

/// Formatting hints for rendered values.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueFormat {
    /// Render numbers in hexadecimal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hex: Option<bool>,
}

/// Body of the `evaluate` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResponseBody {
    /// Rendered result.
    pub result: String,
    /// Type of the result.
    #[serde(rename = "type")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_type: Option<String>,
    /// Non-zero when the result has children.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables_reference: Option<i64>,
}

/// Body of the `setExpression` and `setVariable` responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetValueResponseBody {
    /// New rendered value.
    pub value: String,
    /// Type of the new value.
    #[serde(rename = "type")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    /// Non-zero when the new value has children.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables_reference: Option<i64>,
}

// ---------------------------------------------------------------------------
// Event bodies
// ---------------------------------------------------------------------------

/// Reason carried by a `stopped` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// A step request completed.
    Step,
    /// A breakpoint was hit.
    Breakpoint,
    /// An exception occurred.
    Exception,
    /// A pause request was fulfilled.
    Pause,
    /// The entry point was reached.
    Entry,
    /// A goto request completed.
    Goto,
    /// A function breakpoint was hit.
    FunctionBreakpoint,
    /// A data breakpoint was hit.
    DataBreakpoint,
    /// An instruction breakpoint was hit.
    InstructionBreakpoint,
    /// A reason this client does not classify.
    Other(String),
}

impl StopReason {
    fn parse(reason: &str) -> Self {
        match reason {
            "step" => StopReason::Step,
            "breakpoint" => StopReason::Breakpoint,
            "exception" => StopReason::Exception,
            "pause" => StopReason::Pause,
            "entry" => StopReason::Entry,
            "goto" => StopReason::Goto,
            "function breakpoint" => StopReason::FunctionBreakpoint,
            "data breakpoint" => StopReason::DataBreakpoint,
            "instruction breakpoint" => StopReason::InstructionBreakpoint,
            other => StopReason::Other(other.to_string()),
        }
    }
}

/// Body of the `stopped` event.
///
/// Parsed by hand: adapters written against floating-point JSON runtimes
/// encode thread ids as `1.0`, which the integer observation in
/// [`crate::json`] tolerates.
#[derive(Debug, Clone, PartialEq)]
pub struct StoppedEventBody {
    /// Why the debuggee stopped.
    pub reason: StopReason,
    /// Human-readable description.
    pub description: Option<String>,
    /// The stopped thread.
    pub thread_id: Option<i64>,
    /// Whether all threads stopped.
    pub all_threads_stopped: bool,
}

impl StoppedEventBody {
    /// Fail-fast parse of a `stopped` event body.
    pub fn from_json(body: &Value) -> Result<Self, DapError> {
        let reason = body.require_str("reason")?;
        Ok(Self {
            reason: StopReason::parse(reason),
            description: body.str_member("description").map(str::to_string),
            thread_id: body.int_member("threadId"),
            all_threads_stopped: body.bool_member("allThreadsStopped").unwrap_or(false),
        })
    }
}

/// Body of the `continued` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuedEventBody {
    /// The continued thread.
    pub thread_id: i64,
    /// Whether all threads continued.
    pub all_threads_continued: bool,
}

impl ContinuedEventBody {
    /// Fail-fast parse of a `continued` event body.
    pub fn from_json(body: &Value) -> Result<Self, DapError> {
        let thread_id = body
            .int_member("threadId")
            .ok_or_else(|| DapError::InvalidMessage("missing integer field 'threadId'".into()))?;
        Ok(Self {
            thread_id,
            all_threads_continued: body.bool_member("allThreadsContinued").unwrap_or(false),
        })
    }
}

/// Body of the `output` event.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputEventBody {
    /// Category: "console", "stdout", "stderr", "telemetry".
    pub category: Option<String>,
    /// The output text.
    pub output: String,
}

impl OutputEventBody {
    /// Fail-fast parse of an `output` event body.
    pub fn from_json(body: &Value) -> Result<Self, DapError> {
        Ok(Self {
            category: body.str_member("category").map(str::to_string),
            output: body.require_str("output")?.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn initialize_arguments_wire_names() {
        let args = InitializeRequestArguments {
            adapter_id: "lldb".into(),
            path_format: "path".into(),
            supports_variable_type: true,
            supports_variable_paging: true,
        };
        let value = serde_json::to_value(&args).unwrap();
        assert_eq!(
            value,
            json!({
                "adapterID": "lldb",
                "pathFormat": "path",
                "supportsVariableType": true,
                "supportsVariablePaging": true,
            })
        );
    }

    #[test]
    fn source_breakpoint_omits_absent_optionals() {
        let bp = SourceBreakpoint {
            line: 42,
            column: None,
            condition: Some("x > 1".into()),
            hit_condition: None,
            log_message: None,
        };
        let encoded = serde_json::to_string(&bp).unwrap();
        assert!(encoded.contains("\"line\":42"));
        assert!(encoded.contains("\"condition\":\"x > 1\""));
        assert!(!encoded.contains("hitCondition"));
        assert!(!encoded.contains("logMessage"));
    }

    #[test]
    fn set_breakpoints_arguments_always_serialize_breakpoints() {
        let args = SetBreakpointsArguments {
            source: Source {
                name: Some("a.rs".into()),
                path: Some("/src/a.rs".into()),
                source_reference: None,
            },
            breakpoints: Vec::new(),
        };
        let value = serde_json::to_value(&args).unwrap();
        assert_eq!(value["breakpoints"], json!([]));
    }

    #[test]
    fn exception_arguments_omit_empty_option_vectors() {
        let args = SetExceptionBreakpointsArguments {
            filters: vec![],
            filter_options: vec![],
            exception_options: vec![],
        };
        let value = serde_json::to_value(&args).unwrap();
        assert_eq!(value, json!({"filters": []}));

        let args = SetExceptionBreakpointsArguments {
            filters: vec!["raised".into()],
            filter_options: vec![ExceptionFilterOptions {
                filter_id: "raised".into(),
                condition: Some("true".into()),
            }],
            exception_options: vec![],
        };
        let value = serde_json::to_value(&args).unwrap();
        assert_eq!(value["filterOptions"][0]["filterId"], "raised");
        assert!(value.get("exceptionOptions").is_none());
    }

    #[test]
    fn parse_body_requires_presence() {
        let err = parse_body::<ThreadsResponseBody>("threads", None).unwrap_err();
        assert!(matches!(err, DapError::InvalidResponse(_)));
        assert!(err.to_string().contains("threads"));
    }

    #[test]
    fn parse_body_fails_fast_on_shape_mismatch() {
        let err =
            parse_body::<ThreadsResponseBody>("threads", Some(json!({"threads": "no"})))
                .unwrap_err();
        assert!(matches!(err, DapError::InvalidResponse(_)));
    }

    #[test]
    fn parse_body_accepts_well_formed() {
        let body = parse_body::<ThreadsResponseBody>(
            "threads",
            Some(json!({"threads": [{"id": 1, "name": "main"}]})),
        )
        .unwrap();
        assert_eq!(body.threads.len(), 1);
        assert_eq!(body.threads[0].name, "main");
    }

    #[test]
    fn parse_optional_body_defaults_when_absent() {
        let body = parse_optional_body::<WriteMemoryResponseBody>("writeMemory", None).unwrap();
        assert_eq!(body, WriteMemoryResponseBody::default());
    }

    #[test]
    fn stack_trace_body_parses_camel_case() {
        let body = parse_body::<StackTraceResponseBody>(
            "stackTrace",
            Some(json!({
                "stackFrames": [
                    {"id": 1, "name": "main", "line": 10, "column": 1}
                ],
                "totalFrames": 12,
            })),
        )
        .unwrap();
        assert_eq!(body.stack_frames.len(), 1);
        assert_eq!(body.total_frames, Some(12));
    }

    #[test]
    fn module_id_accepts_number_or_string() {
        let numeric = parse_body::<ModulesResponseBody>(
            "modules",
            Some(json!({"modules": [{"id": 7, "name": "libc"}]})),
        )
        .unwrap();
        assert_eq!(numeric.modules[0].id, json!(7));

        let textual = parse_body::<ModulesResponseBody>(
            "modules",
            Some(json!({"modules": [{"id": "libc-2.31", "name": "libc"}]})),
        )
        .unwrap();
        assert_eq!(textual.modules[0].id, json!("libc-2.31"));
    }

    #[test]
    fn stopped_body_parses_known_reasons() {
        let body = StoppedEventBody::from_json(&json!({
            "reason": "breakpoint",
            "threadId": 1,
            "allThreadsStopped": true,
        }))
        .unwrap();
        assert_eq!(body.reason, StopReason::Breakpoint);
        assert_eq!(body.thread_id, Some(1));
        assert!(body.all_threads_stopped);
    }

    #[test]
    fn stopped_body_tolerates_float_thread_ids() {
        let body = StoppedEventBody::from_json(&json!({
            "reason": "step",
            "threadId": 4.0,
        }))
        .unwrap();
        assert_eq!(body.thread_id, Some(4));
    }

    #[test]
    fn stopped_body_preserves_unclassified_reasons() {
        let body = StoppedEventBody::from_json(&json!({"reason": "signal"})).unwrap();
        assert_eq!(body.reason, StopReason::Other("signal".into()));
    }

    #[test]
    fn stopped_body_requires_reason() {
        let err = StoppedEventBody::from_json(&json!({"threadId": 1})).unwrap_err();
        assert!(matches!(err, DapError::InvalidMessage(_)));
    }

    #[test]
    fn continued_body_requires_thread_id() {
        let err = ContinuedEventBody::from_json(&json!({})).unwrap_err();
        assert!(matches!(err, DapError::InvalidMessage(_)));

        let body =
            ContinuedEventBody::from_json(&json!({"threadId": 2, "allThreadsContinued": true}))
                .unwrap();
        assert_eq!(body.thread_id, 2);
        assert!(body.all_threads_continued);
    }

    #[test]
    fn output_body_requires_output_text() {
        let err = OutputEventBody::from_json(&json!({"category": "stdout"})).unwrap_err();
        assert!(matches!(err, DapError::InvalidMessage(_)));

        let body =
            OutputEventBody::from_json(&json!({"category": "stdout", "output": "hi\n"})).unwrap();
        assert_eq!(body.category.as_deref(), Some("stdout"));
        assert_eq!(body.output, "hi\n");
    }
}
