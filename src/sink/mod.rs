//! Diagnostics and log sinks.
//!
//! The session forwards tool output (`log-data`, `warning`,
//! `protocol-error`, `command-description`, `process-result`) and the
//! orchestrator forwards the message list of every failed operation to a
//! [`DiagnosticsSink`]. Sinks receive the messages verbatim; parsing compiler
//! output into diagnostics is the sink owner's business.
//!
//! Implementations:
//! - [`TracingSink`]: writes everything to the `tracing` log.
//! - [`JsonlBuildLog`]: appends JSONL records to daily-rotating files.
//! - [`FanoutSink`]: forwards to several sinks.

pub mod writer;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::models::operation::{OperationKind, OperationOutcome};
use crate::models::response::{MessageList, ResponseEvent};

/// Receives tool output and operation results.
///
/// Implementations must be [`Send`] and [`Sync`] so one sink can be shared
/// by the session pump and the orchestrator via [`Arc`].
pub trait DiagnosticsSink: Send + Sync {
    /// A diagnostic message arrived from the tool.
    fn forward(&self, event: &ResponseEvent);

    /// An operation finished; `messages` is the tool's message list (empty on
    /// success).
    fn operation_finished(
        &self,
        kind: OperationKind,
        outcome: &OperationOutcome,
        messages: &MessageList,
    );
}

/// Sink that writes to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn forward(&self, event: &ResponseEvent) {
        match event {
            ResponseEvent::LogData(log) => info!(target: "build_tool", "{}", log.message),
            ResponseEvent::Warning(w) => {
                for item in &w.warning.items {
                    warn!(target: "build_tool", "{item}");
                }
            }
            ResponseEvent::ProtocolError(e) => {
                warn!(target: "build_tool", error = %e.error.to_text(), "tool rejected a request");
            }
            ResponseEvent::CommandDescription(cmd) => {
                info!(target: "build_tool", highlight = %cmd.highlight, "{}", cmd.message);
            }
            ResponseEvent::ProcessResult(result) => {
                let level_ok = result.success;
                for line in result.stdout.iter().chain(&result.stderr) {
                    if level_ok {
                        info!(target: "build_tool", "{line}");
                    } else {
                        warn!(target: "build_tool", "{line}");
                    }
                }
                if !level_ok {
                    warn!(
                        target: "build_tool",
                        executable = %result.executable_file_path,
                        exit_code = result.exit_code,
                        "command failed"
                    );
                }
            }
            other => debug!(target: "build_tool", message = other.type_name(), "ignored by sink"),
        }
    }

    fn operation_finished(
        &self,
        kind: OperationKind,
        outcome: &OperationOutcome,
        messages: &MessageList,
    ) {
        if outcome.success {
            info!(operation = %kind, "{}", outcome.message);
        } else {
            warn!(operation = %kind, messages = messages.items.len(), "{}", outcome.message);
        }
    }
}

/// Sink that forwards to every contained sink in order.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn DiagnosticsSink>>,
}

impl FanoutSink {
    /// Create an empty fan-out.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink.
    #[must_use]
    pub fn with(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl DiagnosticsSink for FanoutSink {
    fn forward(&self, event: &ResponseEvent) {
        for sink in &self.sinks {
            sink.forward(event);
        }
    }

    fn operation_finished(
        &self,
        kind: OperationKind,
        outcome: &OperationOutcome,
        messages: &MessageList,
    ) {
        for sink in &self.sinks {
            sink.operation_finished(kind, outcome, messages);
        }
    }
}

/// Classification of build log records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// A message forwarded from the tool.
    ToolMessage,
    /// An operation finished.
    OperationFinished,
}

/// One line of the JSONL build log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildLogRecord {
    /// Time the record was written.
    pub timestamp: DateTime<Utc>,
    /// Record classification.
    pub kind: RecordKind,
    /// Wire type of a forwarded message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    /// Operation a result belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<OperationKind>,
    /// Operation success flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    /// Forwarded message or operation message list, verbatim.
    pub payload: serde_json::Value,
}

impl BuildLogRecord {
    /// Record for a forwarded tool message.
    #[must_use]
    pub fn tool_message(event: &ResponseEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            kind: RecordKind::ToolMessage,
            message_type: Some(event.type_name().to_owned()),
            operation: None,
            success: None,
            payload: serde_json::to_value(event).unwrap_or(serde_json::Value::Null),
        }
    }

    /// Record for a finished operation.
    #[must_use]
    pub fn operation_finished(
        kind: OperationKind,
        outcome: &OperationOutcome,
        messages: &MessageList,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            kind: RecordKind::OperationFinished,
            message_type: None,
            operation: Some(kind),
            success: Some(outcome.success),
            payload: serde_json::to_value(messages).unwrap_or(serde_json::Value::Null),
        }
    }
}

pub use writer::JsonlBuildLog;
