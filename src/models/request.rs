//! Outbound request messages (driver → build tool).
//!
//! Every request is a JSON object whose `type` field selects the variant;
//! the remaining keys form a fixed, kebab-case property bag. Requests are
//! built once from a settings snapshot and never mutated afterwards.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Verbosity the build tool uses for `log-data` messages.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LogLevel {
    /// Errors only.
    Error,
    /// Errors and warnings.
    Warning,
    /// Regular progress output.
    #[default]
    Info,
    /// Verbose diagnostic output.
    Debug,
    /// Everything.
    Trace,
}

/// How much of each executed command the tool reports.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CommandEchoMode {
    /// No command descriptions.
    Silent,
    /// One-line summary per command.
    #[default]
    Summary,
    /// Full command line.
    CommandLine,
    /// Full command line plus the environment it runs in.
    CommandLineWithEnvironment,
}

/// How strictly the tool treats project-file errors during resolve.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorHandlingMode {
    /// Any error aborts resolving.
    #[default]
    Strict,
    /// Recoverable errors are reported as warnings.
    Relaxed,
}

/// When the tool attaches the full project description to a reply.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DataMode {
    /// Never attach project data.
    Never,
    /// Always attach project data.
    Always,
    /// Attach project data only if it changed since the last reply.
    #[default]
    OnlyIfChanged,
}

/// Properties of a `resolve-project` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct ResolveRequest {
    /// Project file to resolve.
    pub project_file_path: PathBuf,
    /// Directory that receives build artifacts.
    pub build_root: PathBuf,
    /// Name of the build configuration (e.g. `debug`).
    pub configuration_name: String,
    /// Profile applied to the top-level project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_level_profile: Option<String>,
    /// Tool settings directory override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings_directory: Option<PathBuf>,
    /// Report what would happen without touching the build graph.
    #[serde(default)]
    pub dry_run: bool,
    /// Log verbosity.
    #[serde(default)]
    pub log_level: LogLevel,
    /// Re-run all probes even when cached results exist.
    #[serde(default)]
    pub force_probe_execution: bool,
    /// Strictness of project-file error handling.
    #[serde(default)]
    pub error_handling_mode: ErrorHandlingMode,
    /// When to return project data.
    #[serde(default)]
    pub data_mode: DataMode,
    /// Module properties to include in the returned project data.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub module_properties: Vec<String>,
    /// Property overrides (`module.property` → value).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overridden_values: BTreeMap<String, serde_json::Value>,
}

/// Properties of a `build-project` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct BuildRequest {
    /// Log verbosity.
    #[serde(default)]
    pub log_level: LogLevel,
    /// Continue after the first failing command.
    #[serde(default)]
    pub keep_going: bool,
    /// Products to build; `None` builds the whole project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub products: Option<Vec<String>>,
    /// Restrict the build to these changed source files.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed_files: Vec<PathBuf>,
    /// File tags whose producing rules are run (used with `changed-files`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub active_file_tags: Vec<String>,
    /// Parallel job limit; `None` lets the tool decide.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_job_count: Option<u32>,
    /// Command echo verbosity.
    #[serde(default)]
    pub command_echo_mode: CommandEchoMode,
    /// Report what would happen without running commands.
    #[serde(default)]
    pub dry_run: bool,
    /// When to return project data.
    #[serde(default)]
    pub data_mode: DataMode,
    /// Install products after building.
    #[serde(default)]
    pub install: bool,
    /// Wipe the install root before installing.
    #[serde(default)]
    pub clean_install_root: bool,
}

/// Properties of a `clean-project` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct CleanRequest {
    /// Log verbosity.
    #[serde(default)]
    pub log_level: LogLevel,
    /// Continue after the first failure.
    #[serde(default)]
    pub keep_going: bool,
    /// Products to clean; `None` cleans the whole project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub products: Option<Vec<String>>,
    /// Report what would be removed without removing it.
    #[serde(default)]
    pub dry_run: bool,
}

/// Properties of an `install-project` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct InstallRequest {
    /// Log verbosity.
    #[serde(default)]
    pub log_level: LogLevel,
    /// Continue after the first failure.
    #[serde(default)]
    pub keep_going: bool,
    /// Products to install; `None` installs the whole project.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub products: Option<Vec<String>>,
    /// Report what would be installed without copying.
    #[serde(default)]
    pub dry_run: bool,
    /// Wipe the install root before installing.
    #[serde(default)]
    pub clean_install_root: bool,
    /// Install root override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_root: Option<PathBuf>,
}

/// Properties of a `get-run-environment` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct RunEnvironmentRequest {
    /// Product whose run environment is requested.
    pub product: String,
    /// Extra run-environment configuration keys.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config: Vec<String>,
}

/// A request sent to the build tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum Request {
    /// Resolve (load and configure) the project.
    #[serde(rename = "resolve-project")]
    Resolve(ResolveRequest),
    /// Build the project or a subset of it.
    #[serde(rename = "build-project")]
    Build(BuildRequest),
    /// Remove build artifacts.
    #[serde(rename = "clean-project")]
    Clean(CleanRequest),
    /// Install built products.
    #[serde(rename = "install-project")]
    Install(InstallRequest),
    /// Ask the tool to abandon the job it is running.
    #[serde(rename = "cancel-job")]
    Cancel,
    /// Query the environment a product runs in.
    #[serde(rename = "get-run-environment")]
    GetRunEnvironment(RunEnvironmentRequest),
}

impl Request {
    /// Wire name of the request, as carried in the `type` field.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Resolve(_) => "resolve-project",
            Self::Build(_) => "build-project",
            Self::Clean(_) => "clean-project",
            Self::Install(_) => "install-project",
            Self::Cancel => "cancel-job",
            Self::GetRunEnvironment(_) => "get-run-environment",
        }
    }
}
