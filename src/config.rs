//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::Deserialize;

use crate::models::request::{CommandEchoMode, ErrorHandlingMode, LogLevel};
use crate::models::settings::{SettingsProvider, SettingsSnapshot};
use crate::orchestrator::operations::LingerDelays;
use crate::{AppError, Result};

/// Options applied to every build-tool job.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BuildSettings {
    /// Tool log verbosity.
    #[serde(default)]
    pub log_level: LogLevel,
    /// Parallel job limit; 0 lets the tool decide.
    #[serde(default)]
    pub max_job_count: u32,
    /// Continue after the first failure.
    #[serde(default)]
    pub keep_going: bool,
    /// How much of each command line is echoed.
    #[serde(default)]
    pub command_echo_mode: CommandEchoMode,
    /// Wipe the install root before installing.
    #[serde(default)]
    pub clean_install_root: bool,
    /// Re-run probes on every resolve.
    #[serde(default)]
    pub force_probe_execution: bool,
    /// Project-file error strictness.
    #[serde(default)]
    pub error_handling_mode: ErrorHandlingMode,
    /// Dry-run every job.
    #[serde(default)]
    pub dry_run: bool,
}

/// Automatic resolve on settings or project changes.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AutoResolveConfig {
    /// Whether changes trigger a resolve.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Quiet period before a burst of changes resolves.
    #[serde(default = "default_auto_resolve_delay_ms")]
    pub delay_ms: u64,
}

impl Default for AutoResolveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_ms: default_auto_resolve_delay_ms(),
        }
    }
}

/// Session and display timing.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimingConfig {
    /// Silence allowed after launch before the tool is terminated; 0 disables.
    #[serde(default = "default_startup_timeout_seconds")]
    pub startup_timeout_seconds: u64,
    /// Linger after resolve.
    #[serde(default = "default_linger_ms")]
    pub resolve_linger_ms: u64,
    /// Linger after build, compile-only, and rebuild.
    #[serde(default = "default_build_linger_ms")]
    pub build_linger_ms: u64,
    /// Linger after clean.
    #[serde(default = "default_linger_ms")]
    pub clean_linger_ms: u64,
    /// Linger after install.
    #[serde(default = "default_linger_ms")]
    pub install_linger_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            startup_timeout_seconds: default_startup_timeout_seconds(),
            resolve_linger_ms: default_linger_ms(),
            build_linger_ms: default_build_linger_ms(),
            clean_linger_ms: default_linger_ms(),
            install_linger_ms: default_linger_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_auto_resolve_delay_ms() -> u64 {
    1000
}

fn default_startup_timeout_seconds() -> u64 {
    30
}

fn default_linger_ms() -> u64 {
    1000
}

fn default_build_linger_ms() -> u64 {
    2000
}

fn default_build_directory() -> String {
    "{project_dir}/build/{profile}-{configuration}".into()
}

fn default_configuration() -> String {
    "default".into()
}

/// Global configuration parsed from the TOML config file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Build tool executable; empty means no tool is configured.
    #[serde(default)]
    pub executable: PathBuf,
    /// Project file to resolve and build.
    #[serde(default)]
    pub project_file: Option<PathBuf>,
    /// Build directory template.
    #[serde(default = "default_build_directory")]
    pub build_directory: String,
    /// Tool settings directory.
    #[serde(default)]
    pub settings_directory: Option<PathBuf>,
    /// Top-level profile.
    #[serde(default)]
    pub profile: Option<String>,
    /// Configuration name.
    #[serde(default = "default_configuration")]
    pub configuration: String,
    /// Products to build, clean, and install; empty means all.
    #[serde(default)]
    pub products: Vec<String>,
    /// Job options.
    #[serde(default)]
    pub build: BuildSettings,
    /// Automatic resolve settings.
    #[serde(default)]
    pub auto_resolve: AutoResolveConfig,
    /// Timing settings.
    #[serde(default)]
    pub timing: TimingConfig,
    /// Directory for JSONL build logs; unset disables the build log.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// Relative paths in the file are resolved against the file's directory.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        let mut config = Self::from_toml_str(&raw)?;
        if let Some(base) = path.parent().filter(|p| p != &Path::new("")) {
            config.anchor_paths(base);
        }
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn anchor_paths(&mut self, base: &Path) {
        let anchor = |p: &mut PathBuf| {
            if p.is_relative() && !p.as_os_str().is_empty() {
                *p = base.join(&*p);
            }
        };
        if let Some(p) = self.project_file.as_mut() {
            anchor(p);
        }
        if let Some(p) = self.settings_directory.as_mut() {
            anchor(p);
        }
        if let Some(p) = self.log_dir.as_mut() {
            anchor(p);
        }
        // Bare names are looked up on PATH.
        if self.executable.components().count() > 1 {
            anchor(&mut self.executable);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.configuration.trim().is_empty() {
            return Err(AppError::Config("configuration must not be empty".into()));
        }
        if self.build_directory.trim().is_empty() {
            return Err(AppError::Config("build_directory must not be empty".into()));
        }
        if self.auto_resolve.enabled && self.auto_resolve.delay_ms == 0 {
            return Err(AppError::Config(
                "auto_resolve.delay_ms must be greater than zero".into(),
            ));
        }
        if self.products.iter().any(|p| p.trim().is_empty()) {
            return Err(AppError::Config("products must not contain empty names".into()));
        }
        Ok(())
    }

    /// Startup timeout, or `None` when disabled.
    #[must_use]
    pub fn startup_timeout(&self) -> Option<Duration> {
        (self.timing.startup_timeout_seconds > 0)
            .then(|| Duration::from_secs(self.timing.startup_timeout_seconds))
    }

    /// Auto-resolve debounce delay.
    #[must_use]
    pub fn auto_resolve_delay(&self) -> Duration {
        Duration::from_millis(self.auto_resolve.delay_ms)
    }

    /// Per-kind linger delays.
    #[must_use]
    pub fn linger_delays(&self) -> LingerDelays {
        LingerDelays {
            resolve: Duration::from_millis(self.timing.resolve_linger_ms),
            build: Duration::from_millis(self.timing.build_linger_ms),
            clean: Duration::from_millis(self.timing.clean_linger_ms),
            install: Duration::from_millis(self.timing.install_linger_ms),
        }
    }

    /// Capture the settings the orchestrator builds requests from.
    #[must_use]
    pub fn settings_snapshot(&self) -> SettingsSnapshot {
        SettingsSnapshot {
            project_file: self.project_file.clone(),
            build_directory: self.build_directory.clone(),
            settings_directory: self.settings_directory.clone(),
            profile: self.profile.clone(),
            configuration: self.configuration.clone(),
            products: self.products.clone(),
            log_level: self.build.log_level,
            max_job_count: self.build.max_job_count,
            keep_going: self.build.keep_going,
            command_echo_mode: self.build.command_echo_mode,
            clean_install_root: self.build.clean_install_root,
            force_probe_execution: self.build.force_probe_execution,
            error_handling_mode: self.build.error_handling_mode,
            dry_run: self.build.dry_run,
        }
    }
}

impl SettingsProvider for GlobalConfig {
    fn snapshot(&self) -> Option<SettingsSnapshot> {
        Some(self.settings_snapshot())
    }
}

/// Hot-reloadable configuration shared between the watcher and the
/// orchestrator.
#[derive(Debug, Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<GlobalConfig>>,
}

impl SharedConfig {
    /// Wrap an initial configuration.
    #[must_use]
    pub fn new(config: GlobalConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Copy of the current configuration.
    #[must_use]
    pub fn current(&self) -> GlobalConfig {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the configuration.
    pub fn replace(&self, config: GlobalConfig) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = config;
    }
}

impl SettingsProvider for SharedConfig {
    fn snapshot(&self) -> Option<SettingsSnapshot> {
        Some(
            self.inner
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .settings_snapshot(),
        )
    }
}
