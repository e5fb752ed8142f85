//! Hot-reload watcher for the config file and the project sources.
//!
//! [`ConfigWatcher`] uses the `notify` crate to watch the directory holding
//! the config file and, when a project file is configured, the project
//! directory. A config change re-parses the whole file and, if it is valid
//! and differs from the current one, replaces the [`SharedConfig`]. A change
//! of any file sharing the project file's extension counts as a project
//! change. Both invoke the change callback, which the binary wires to the
//! auto-resolve trigger.
//!
//! The watched project directory is fixed at creation; pointing
//! `project_file` somewhere else takes effect for requests at once but needs
//! a new watcher to observe the new directory.
//!
//! Callbacks run on the `notify` thread, so the shared config uses a
//! `std::sync::RwLock` and the callback must not block.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::config::{GlobalConfig, SharedConfig};
use crate::{AppError, Result};

/// What a file-system event touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// The config file was written, replaced, or removed.
    Settings,
    /// A project source was written, replaced, or removed.
    Project,
}

/// Callback invoked for every relevant change.
pub type ChangeCallback = Arc<dyn Fn(ChangeKind) + Send + Sync>;

/// Classify a file-system event.
///
/// Only create, modify, and remove events count. The config file wins over
/// a project match.
#[must_use]
pub fn classify_change(
    event: &Event,
    config_path: &Path,
    project_file: Option<&Path>,
) -> Option<ChangeKind> {
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return None;
    }
    if event.paths.iter().any(|p| p == config_path) {
        return Some(ChangeKind::Settings);
    }
    let project_ext = project_file.and_then(Path::extension)?;
    event
        .paths
        .iter()
        .any(|p| p.extension() == Some(project_ext))
        .then_some(ChangeKind::Project)
}

/// Keeps the underlying OS watches alive for its own lifetime.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    config: SharedConfig,
}

impl ConfigWatcher {
    /// Watch `config_path` (and the project directory of `config`).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the watcher cannot be created or a
    /// directory cannot be watched.
    pub fn new(config_path: &Path, config: SharedConfig, on_change: ChangeCallback) -> Result<Self> {
        let config_path = canonical(config_path);
        let project_file = config.current().project_file.map(|p| canonical(&p));

        let shared = config.clone();
        let callback_config_path = config_path.clone();
        let callback_project_file = project_file.clone();

        let mut watcher = notify::recommended_watcher(
            move |result: std::result::Result<Event, notify::Error>| match result {
                Ok(event) => match classify_change(
                    &event,
                    &callback_config_path,
                    callback_project_file.as_deref(),
                ) {
                    Some(ChangeKind::Settings) => {
                        if reload(&callback_config_path, &shared) {
                            on_change(ChangeKind::Settings);
                        }
                    }
                    Some(ChangeKind::Project) => {
                        debug!(paths = ?event.paths, "project sources changed");
                        on_change(ChangeKind::Project);
                    }
                    None => {}
                },
                Err(err) => warn!(%err, "config file watcher error"),
            },
        )
        .map_err(|err| AppError::Config(format!("failed to create config file watcher: {err}")))?;

        // Watch directories, not files, so that atomic rename-based writes
        // are detected.
        let config_dir = config_path
            .parent()
            .filter(|p| p != &Path::new(""))
            .unwrap_or(&config_path)
            .to_path_buf();
        let project_dir = project_file
            .as_deref()
            .and_then(Path::parent)
            .filter(|p| p != &Path::new(""))
            .map(Path::to_path_buf);

        match project_dir {
            Some(dir) if dir == config_dir => watch(&mut watcher, &dir, RecursiveMode::Recursive)?,
            Some(dir) => {
                watch(&mut watcher, &config_dir, RecursiveMode::NonRecursive)?;
                watch(&mut watcher, &dir, RecursiveMode::Recursive)?;
            }
            None => watch(&mut watcher, &config_dir, RecursiveMode::NonRecursive)?,
        }

        info!(path = %config_path.display(), "config watcher started");

        Ok(Self {
            _watcher: watcher,
            config,
        })
    }

    /// The shared configuration this watcher keeps current.
    #[must_use]
    pub fn config(&self) -> SharedConfig {
        self.config.clone()
    }
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn watch(watcher: &mut RecommendedWatcher, dir: &Path, mode: RecursiveMode) -> Result<()> {
    watcher.watch(dir, mode).map_err(|err| {
        AppError::Config(format!("failed to watch '{}': {err}", dir.display()))
    })
}

/// Re-read the config; returns `true` if the shared value changed.
fn reload(path: &Path, shared: &SharedConfig) -> bool {
    match GlobalConfig::load_from_path(path) {
        Ok(fresh) if fresh == shared.current() => {
            debug!(path = %path.display(), "config touched without changes");
            false
        }
        Ok(fresh) => {
            shared.replace(fresh);
            info!(path = %path.display(), "hot-reloaded config");
            true
        }
        Err(err) => {
            warn!(%err, path = %path.display(), "failed to reload config; keeping previous values");
            false
        }
    }
}
