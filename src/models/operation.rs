//! Operation kinds, outcomes, and the notices an operation emits.

use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::response::ResponseEvent;

/// High-level build-lifecycle action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Load and configure the project.
    Resolve,
    /// Build all or selected products.
    Build,
    /// Remove build artifacts.
    Clean,
    /// Install built products.
    Install,
    /// Clean followed by build.
    Rebuild,
    /// Build restricted to a set of changed files.
    CompileOnly,
    /// Query a product's run environment.
    RunEnvironment,
    /// Abandon the running job.
    Cancel,
}

impl OperationKind {
    /// Whether `event` is the reply that ends an operation of this kind.
    ///
    /// Composite and fire-and-forget kinds (`Rebuild`, `Cancel`) have no
    /// terminal reply of their own.
    #[must_use]
    pub fn is_terminal(self, event: &ResponseEvent) -> bool {
        matches!(
            (self, event),
            (Self::Resolve, ResponseEvent::ProjectResolved(_))
                | (Self::Build | Self::CompileOnly, ResponseEvent::ProjectBuilt(_))
                | (Self::Clean, ResponseEvent::ProjectCleaned(_))
                | (Self::Install, ResponseEvent::InstallDone(_))
                | (Self::RunEnvironment, ResponseEvent::RunEnvironment(_))
        )
    }

    /// Label used in notices and logs.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Resolve => "resolve",
            Self::Build => "build",
            Self::Clean => "clean",
            Self::Install => "install",
            Self::Rebuild => "rebuild",
            Self::CompileOnly => "compile",
            Self::RunEnvironment => "run-environment",
            Self::Cancel => "cancel",
        }
    }
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Final result of an operation: `(success, message)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOutcome {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Explanatory text; the tool's message list on failure.
    pub message: String,
}

impl OperationOutcome {
    /// A successful outcome.
    #[must_use]
    pub fn succeeded(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    /// A failed outcome.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Lifecycle notifications emitted by the orchestrator for UI collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationNotice {
    /// The request was issued.
    Started {
        /// Operation kind.
        kind: OperationKind,
    },
    /// The reported percentage increased.
    Progress {
        /// Operation kind.
        kind: OperationKind,
        /// New percentage (0–100).
        percentage: u8,
        /// Difference to the previously reported percentage.
        increment: u8,
        /// Description of the running task.
        description: String,
    },
    /// The operation reached its terminal event or was cancelled.
    Completed {
        /// Operation kind.
        kind: OperationKind,
        /// Whether it succeeded.
        success: bool,
        /// Time since the request was sent.
        elapsed: Duration,
        /// Explanatory text.
        message: String,
    },
}
