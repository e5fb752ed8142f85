//! Inbound response messages (build tool → driver).
//!
//! Responses carry no request identifier; the `type` field alone tells the
//! orchestrator what happened. Parsing happens once at the channel boundary:
//! an unknown `type` is a [`AppError::Protocol`] error that the reader logs
//! and skips.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Source position attached to an error or warning item.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct CodeLocation {
    /// File the message refers to.
    #[serde(default)]
    pub file_path: String,
    /// One-based line, or 0 when unknown.
    #[serde(default)]
    pub line: u32,
    /// One-based column, or 0 when unknown.
    #[serde(default)]
    pub column: u32,
}

/// A single error or warning message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct MessageItem {
    /// Human-readable text.
    pub description: String,
    /// Optional source position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<CodeLocation>,
}

impl Display for MessageItem {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(loc) if !loc.file_path.is_empty() && loc.line > 0 => {
                write!(f, "{}:{}", loc.file_path, loc.line)?;
                if loc.column > 0 {
                    write!(f, ":{}", loc.column)?;
                }
                write!(f, ": {}", self.description)
            }
            Some(loc) if !loc.file_path.is_empty() => {
                write!(f, "{}: {}", loc.file_path, self.description)
            }
            _ => f.write_str(&self.description),
        }
    }
}

/// A list of messages as the tool reports it (`{"items": [...]}`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageList {
    /// The individual messages.
    #[serde(default)]
    pub items: Vec<MessageItem>,
}

impl MessageList {
    /// `true` when there are no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Render all items, one per line.
    #[must_use]
    pub fn to_text(&self) -> String {
        self.items
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Greeting sent by the tool right after the session starts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct Hello {
    /// Protocol level implemented by the tool.
    #[serde(default)]
    pub api_level: u32,
    /// Oldest protocol level the tool stays compatible with.
    #[serde(default)]
    pub api_compat_level: u32,
    /// Socket of the tool's language server, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lsp_socket: Option<String>,
}

/// Payload of the terminal replies (`project-resolved`, `project-built`,
/// `project-cleaned`, `install-done`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct JobDone {
    /// Errors that made the job fail; absent or empty on success.
    #[serde(default)]
    pub error: MessageList,
    /// Project description, when the request's data mode asked for it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_data: Option<serde_json::Value>,
}

impl JobDone {
    /// A job succeeded when its message list is empty.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_empty()
    }
}

/// Free-form log output.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogData {
    /// The log text.
    #[serde(default)]
    pub message: String,
}

/// Warning emitted while a job runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Warning {
    /// The warning messages.
    #[serde(default)]
    pub warning: MessageList,
}

/// The tool rejected a request it could not understand.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProtocolError {
    /// Explanation from the tool.
    #[serde(default)]
    pub error: MessageList,
}

/// A new task (phase) of the current job has started.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct TaskStarted {
    /// What the task does.
    #[serde(default)]
    pub description: String,
    /// Progress value that marks completion.
    #[serde(default)]
    pub max_progress: u64,
}

/// Progress of the current task.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskProgress {
    /// Current progress value.
    #[serde(default)]
    pub progress: u64,
}

/// The current task's completion value changed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct NewMaxProgress {
    /// New completion value.
    #[serde(default)]
    pub max_progress: u64,
}

/// Description of a command the tool is about to run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandDescription {
    /// Category used for highlighting (`compiler`, `linker`, ...).
    #[serde(default)]
    pub highlight: String,
    /// The description text.
    #[serde(default)]
    pub message: String,
}

/// Outcome of an external command run by the tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct ProcessResult {
    /// Executable that was run.
    #[serde(default)]
    pub executable_file_path: String,
    /// Its arguments.
    #[serde(default)]
    pub arguments: Vec<String>,
    /// Working directory of the command.
    #[serde(default)]
    pub working_directory: String,
    /// Whether the command succeeded.
    #[serde(default)]
    pub success: bool,
    /// Exit code of the command.
    #[serde(default)]
    pub exit_code: i32,
    /// Captured standard output, one entry per line.
    #[serde(default)]
    pub stdout: Vec<String>,
    /// Captured standard error, one entry per line.
    #[serde(default)]
    pub stderr: Vec<String>,
}

/// Reply to `get-run-environment`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct RunEnvironment {
    /// The complete environment the product runs in.
    #[serde(default)]
    pub full_environment: BTreeMap<String, String>,
    /// Errors that prevented computing the environment.
    #[serde(default)]
    pub error: MessageList,
}

/// A message received from the build tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ResponseEvent {
    /// Session greeting.
    Hello(Hello),
    /// A task of the current job started.
    TaskStarted(TaskStarted),
    /// The current task progressed.
    TaskProgress(TaskProgress),
    /// The current task's completion value changed.
    NewMaxProgress(NewMaxProgress),
    /// Resolve finished.
    ProjectResolved(JobDone),
    /// Build finished (older tools call it `build-done`).
    #[serde(alias = "build-done")]
    ProjectBuilt(JobDone),
    /// Clean finished.
    ProjectCleaned(JobDone),
    /// Install finished.
    InstallDone(JobDone),
    /// Log output.
    LogData(LogData),
    /// Warning output.
    Warning(Warning),
    /// The tool could not process a request.
    ProtocolError(ProtocolError),
    /// A command is about to run.
    CommandDescription(CommandDescription),
    /// A command finished.
    ProcessResult(ProcessResult),
    /// Reply to `get-run-environment`.
    RunEnvironment(RunEnvironment),
    /// Accepted, not acted on.
    GeneratedFilesForSource,
    /// Accepted, not acted on.
    FilesAdded,
    /// Accepted, not acted on.
    FilesRemoved,
}

impl ResponseEvent {
    /// Parse a decoded packet payload.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] if `json` is not valid JSON or names an
    /// unknown `type`.
    pub fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| AppError::Protocol(format!("bad message: {e}")))
    }

    /// Wire name of the message, as carried in the `type` field.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Hello(_) => "hello",
            Self::TaskStarted(_) => "task-started",
            Self::TaskProgress(_) => "task-progress",
            Self::NewMaxProgress(_) => "new-max-progress",
            Self::ProjectResolved(_) => "project-resolved",
            Self::ProjectBuilt(_) => "project-built",
            Self::ProjectCleaned(_) => "project-cleaned",
            Self::InstallDone(_) => "install-done",
            Self::LogData(_) => "log-data",
            Self::Warning(_) => "warning",
            Self::ProtocolError(_) => "protocol-error",
            Self::CommandDescription(_) => "command-description",
            Self::ProcessResult(_) => "process-result",
            Self::RunEnvironment(_) => "run-environment",
            Self::GeneratedFilesForSource => "generated-files-for-source",
            Self::FilesAdded => "files-added",
            Self::FilesRemoved => "files-removed",
        }
    }

    /// `true` for the task/progress messages every operation tracks.
    #[must_use]
    pub fn is_progress(&self) -> bool {
        matches!(
            self,
            Self::TaskStarted(_) | Self::TaskProgress(_) | Self::NewMaxProgress(_)
        )
    }

    /// `true` for messages forwarded verbatim to the diagnostics sink.
    #[must_use]
    pub fn is_diagnostic(&self) -> bool {
        matches!(
            self,
            Self::LogData(_)
                | Self::Warning(_)
                | Self::ProtocolError(_)
                | Self::CommandDescription(_)
                | Self::ProcessResult(_)
        )
    }
}
