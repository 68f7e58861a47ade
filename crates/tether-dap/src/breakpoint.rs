//! Client-side breakpoints and reconciler state.
//!
//! The session keeps a desired per-source breakpoint map and pushes it to
//! the adapter as full per-source replacements. [`BreakpointStore`] tracks
//! the desired state, the set of sources last pushed, and the pending
//! flags that make flushing idempotent and retryable.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use crate::types::{ExceptionFilterOptions, ExceptionOptions, SourceBreakpoint};

/// A client-side breakpoint. Identity is positional: the owning source
/// file plus the line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    /// Line number (1-based).
    pub line: i64,
    /// Condition expression; empty means unconditional.
    pub condition: String,
    /// Optional hit-count condition.
    pub hit_condition: Option<String>,
    /// Optional log message (logpoint).
    pub log_message: Option<String>,
}

impl Breakpoint {
    /// An unconditional breakpoint at `line`.
    pub fn new(line: i64) -> Self {
        Self {
            line,
            condition: String::new(),
            hit_condition: None,
            log_message: None,
        }
    }

    /// Attach a condition expression.
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = condition.into();
        self
    }

    /// Attach a hit-count condition.
    pub fn with_hit_condition(mut self, hit_condition: impl Into<String>) -> Self {
        self.hit_condition = Some(hit_condition.into());
        self
    }

    /// Turn the breakpoint into a logpoint.
    pub fn with_log_message(mut self, message: impl Into<String>) -> Self {
        self.log_message = Some(message.into());
        self
    }

    /// Convert to the wire representation. Empty strings are absent on the
    /// wire, same as missing optionals.
    pub fn to_wire(&self) -> SourceBreakpoint {
        SourceBreakpoint {
            line: self.line,
            column: None,
            condition: non_empty(&self.condition),
            hit_condition: self.hit_condition.as_deref().and_then(non_empty),
            log_message: self.log_message.as_deref().and_then(non_empty),
        }
    }
}

fn non_empty(text: &str) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Desired breakpoint state plus synchronization bookkeeping.
///
/// Invariant: after a successful source flush, `synchronized_files` equals
/// the key set of `desired`. A failed flush re-raises the pending flag so
/// the next flush converges.
#[derive(Debug, Default)]
pub(crate) struct BreakpointStore {
    /// Desired breakpoints per source file.
    pub desired: HashMap<PathBuf, Vec<Breakpoint>>,
    /// Files last pushed to the adapter.
    pub synchronized_files: HashSet<PathBuf>,
    /// Enabled exception filter identifiers.
    pub exception_filters: Vec<String>,
    /// Per-filter exception options.
    pub filter_options: Vec<ExceptionFilterOptions>,
    /// Detailed exception configurations.
    pub exception_options: Vec<ExceptionOptions>,
    /// Source state has changed since the last successful flush.
    pub source_sync_pending: bool,
    /// Exception state has changed since the last successful flush.
    pub exception_sync_pending: bool,
}

impl BreakpointStore {
    /// A fresh store. Exception sync starts pending so a new session
    /// pushes its (possibly empty) filter set once.
    pub fn new() -> Self {
        Self {
            exception_sync_pending: true,
            ..Self::default()
        }
    }

    /// Replace the desired breakpoints for one file. An empty list removes
    /// the file from the desired set; it will be cleared adapter-side on
    /// the next flush if it was previously pushed.
    pub fn set_file(&mut self, file: PathBuf, breakpoints: Vec<Breakpoint>) {
        if breakpoints.is_empty() {
            self.desired.remove(&file);
        } else {
            self.desired.insert(file, breakpoints);
        }
        self.source_sync_pending = true;
    }

    /// Replace the whole desired map.
    pub fn replace_all(&mut self, desired: HashMap<PathBuf, Vec<Breakpoint>>) {
        self.desired = desired
            .into_iter()
            .filter(|(_, breakpoints)| !breakpoints.is_empty())
            .collect();
        self.source_sync_pending = true;
    }

    /// The files the next flush must touch: everything currently desired,
    /// plus everything previously synchronized. The union is what lets a
    /// file that lost all its breakpoints be pushed once more with an
    /// empty list so the adapter clears it.
    pub fn files_to_update(&self) -> Vec<PathBuf> {
        let mut files: HashSet<PathBuf> = self.synchronized_files.iter().cloned().collect();
        files.extend(self.desired.keys().cloned());
        files.into_iter().collect()
    }

    /// Record a fully successful source flush of the given snapshot.
    pub fn mark_source_synchronized(&mut self, pushed: HashSet<PathBuf>) {
        self.synchronized_files = pushed;
    }

    /// Replace the desired exception configuration.
    pub fn set_exception_state(
        &mut self,
        filters: Vec<String>,
        filter_options: Vec<ExceptionFilterOptions>,
        exception_options: Vec<ExceptionOptions>,
    ) {
        self.exception_filters = filters;
        self.filter_options = filter_options;
        self.exception_options = exception_options;
        self.exception_sync_pending = true;
    }
}
