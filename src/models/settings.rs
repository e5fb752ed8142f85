//! Read-only settings snapshot consumed by the orchestrator.
//!
//! The orchestrator never reads configuration directly. It asks a
//! [`SettingsProvider`] for a [`SettingsSnapshot`] at call time and builds the
//! request from that snapshot, so a settings change never affects a request
//! that is already on the wire.

use std::path::{Path, PathBuf};

use crate::models::request::{
    BuildRequest, CleanRequest, CommandEchoMode, DataMode, ErrorHandlingMode, InstallRequest,
    LogLevel, ResolveRequest, RunEnvironmentRequest,
};
use crate::{AppError, Result};

/// File tags activated by a compile-only build: objects and headers.
pub const COMPILE_ONLY_FILE_TAGS: [&str; 2] = ["obj", "hpp"];

/// Source of settings snapshots.
pub trait SettingsProvider: Send + Sync {
    /// Take a snapshot of the current settings, or `None` if no settings are
    /// available yet.
    fn snapshot(&self) -> Option<SettingsSnapshot>;
}

/// Settings values captured at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsSnapshot {
    /// Selected project file.
    pub project_file: Option<PathBuf>,
    /// Build directory template (`{project_dir}`, `{profile}`, `{configuration}`).
    pub build_directory: String,
    /// Tool settings directory.
    pub settings_directory: Option<PathBuf>,
    /// Selected profile.
    pub profile: Option<String>,
    /// Selected configuration name.
    pub configuration: String,
    /// Products built, cleaned, and installed; empty means all.
    pub products: Vec<String>,
    /// Log verbosity.
    pub log_level: LogLevel,
    /// Parallel job limit; 0 lets the tool decide.
    pub max_job_count: u32,
    /// Continue after the first failure.
    pub keep_going: bool,
    /// Command echo verbosity.
    pub command_echo_mode: CommandEchoMode,
    /// Wipe the install root before installing.
    pub clean_install_root: bool,
    /// Re-run probes on every resolve.
    pub force_probe_execution: bool,
    /// Project-file error strictness.
    pub error_handling_mode: ErrorHandlingMode,
    /// Dry-run every job.
    pub dry_run: bool,
}

impl SettingsSnapshot {
    /// The selected project file.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Precondition`] if no project is selected.
    pub fn project_file(&self) -> Result<&Path> {
        self.project_file
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| AppError::Precondition("no project file selected".into()))
    }

    /// Expand the build directory template into an absolute build root.
    ///
    /// Relative results are anchored at the project directory.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Precondition`] if no project is selected, the
    /// template is empty, or the template uses an unknown placeholder.
    pub fn build_root(&self) -> Result<PathBuf> {
        let project = self.project_file()?;
        let project_dir = project.parent().unwrap_or_else(|| Path::new("."));

        if self.build_directory.trim().is_empty() {
            return Err(AppError::Precondition("build directory is not set".into()));
        }

        let mut expanded = String::with_capacity(self.build_directory.len());
        let mut rest = self.build_directory.as_str();
        while let Some(open) = rest.find('{') {
            expanded.push_str(&rest[..open]);
            let Some(close) = rest[open..].find('}') else {
                return Err(AppError::Precondition(format!(
                    "unterminated placeholder in build directory '{}'",
                    self.build_directory
                )));
            };
            let name = &rest[open + 1..open + close];
            match name {
                "project_dir" => expanded.push_str(&project_dir.to_string_lossy()),
                "profile" => expanded.push_str(self.profile.as_deref().unwrap_or("default")),
                "configuration" => expanded.push_str(&self.configuration),
                other => {
                    return Err(AppError::Precondition(format!(
                        "unknown placeholder '{{{other}}}' in build directory"
                    )))
                }
            }
            rest = &rest[open + close + 1..];
        }
        expanded.push_str(rest);

        let root = PathBuf::from(expanded);
        Ok(if root.is_absolute() {
            root
        } else {
            project_dir.join(root)
        })
    }

    fn products(&self) -> Option<Vec<String>> {
        (!self.products.is_empty()).then(|| self.products.clone())
    }

    fn max_job_count(&self) -> Option<u32> {
        (self.max_job_count > 0).then_some(self.max_job_count)
    }

    /// Build a `resolve-project` request.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Precondition`] if the project or build root is missing.
    pub fn resolve_request(&self) -> Result<ResolveRequest> {
        Ok(ResolveRequest {
            project_file_path: self.project_file()?.to_path_buf(),
            build_root: self.build_root()?,
            configuration_name: self.configuration.clone(),
            top_level_profile: self.profile.clone(),
            settings_directory: self.settings_directory.clone(),
            dry_run: self.dry_run,
            log_level: self.log_level,
            force_probe_execution: self.force_probe_execution,
            error_handling_mode: self.error_handling_mode,
            data_mode: DataMode::OnlyIfChanged,
            module_properties: Vec::new(),
            overridden_values: std::collections::BTreeMap::new(),
        })
    }

    /// Build a `build-project` request; `products` overrides the configured
    /// product selection.
    #[must_use]
    pub fn build_request(&self, products: Option<Vec<String>>) -> BuildRequest {
        BuildRequest {
            log_level: self.log_level,
            keep_going: self.keep_going,
            products: products.or_else(|| self.products()),
            changed_files: Vec::new(),
            active_file_tags: Vec::new(),
            max_job_count: self.max_job_count(),
            command_echo_mode: self.command_echo_mode,
            dry_run: self.dry_run,
            data_mode: DataMode::OnlyIfChanged,
            install: false,
            clean_install_root: self.clean_install_root,
        }
    }

    /// Build a compile-only `build-project` request for `files`.
    #[must_use]
    pub fn compile_request(&self, files: Vec<PathBuf>) -> BuildRequest {
        BuildRequest {
            changed_files: files,
            active_file_tags: COMPILE_ONLY_FILE_TAGS.iter().map(|t| (*t).to_owned()).collect(),
            ..self.build_request(None)
        }
    }

    /// Build a `clean-project` request.
    #[must_use]
    pub fn clean_request(&self) -> CleanRequest {
        CleanRequest {
            log_level: self.log_level,
            keep_going: self.keep_going,
            products: self.products(),
            dry_run: self.dry_run,
        }
    }

    /// Build an `install-project` request.
    #[must_use]
    pub fn install_request(&self) -> InstallRequest {
        InstallRequest {
            log_level: self.log_level,
            keep_going: self.keep_going,
            products: self.products(),
            dry_run: self.dry_run,
            clean_install_root: self.clean_install_root,
            install_root: None,
        }
    }

    /// Build a `get-run-environment` request for `product`.
    #[must_use]
    pub fn run_environment_request(&self, product: &str) -> RunEnvironmentRequest {
        RunEnvironmentRequest {
            product: product.to_owned(),
            config: Vec::new(),
        }
    }
}

impl SettingsProvider for SettingsSnapshot {
    fn snapshot(&self) -> Option<SettingsSnapshot> {
        Some(self.clone())
    }
}
