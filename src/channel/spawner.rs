//! Build tool process spawner.
//!
//! Launches `<executable> session` with:
//! - piped stdin/stdout for the packet protocol,
//! - stderr drained into the log at `DEBUG`,
//! - `kill_on_drop(true)` so the process never outlives its monitor.
//!
//! The exit monitor owns the [`Child`]. It reports how the process ended and
//! turns a terminate request into `SIGTERM` (unix) or a kill (elsewhere).

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::{Connection, ExitInfo, Launcher};
use crate::{AppError, Result};

/// Argument that puts the tool into session mode.
pub const SESSION_ARG: &str = "session";

/// Time a terminated process gets to exit before it is killed.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Launches the real build tool.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    /// Tool executable; empty means "not configured".
    pub executable: PathBuf,
    /// Working directory for the process, if any.
    pub working_dir: Option<PathBuf>,
}

impl ProcessLauncher {
    /// Create a launcher for `executable`.
    #[must_use]
    pub fn new(executable: impl Into<PathBuf>, working_dir: Option<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            working_dir,
        }
    }
}

impl Launcher for ProcessLauncher {
    fn is_configured(&self) -> bool {
        !self.executable.as_os_str().is_empty()
    }

    /// Spawn the tool in session mode and start its exit monitor.
    ///
    /// # Errors
    ///
    /// - `AppError::Spawn("failed to spawn …")`: OS spawn failure (missing or
    ///   non-executable path).
    /// - `AppError::Spawn("failed to capture …")`: a stdio pipe is missing.
    fn launch(&self) -> Result<Connection> {
        let mut cmd = Command::new(&self.executable);
        cmd.arg(SESSION_ARG)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|err| {
            AppError::Spawn(format!(
                "failed to spawn '{}': {err}",
                self.executable.display()
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture tool stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture tool stdout".into()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(stderr));
        }

        let pid = child.id();
        info!(pid, executable = %self.executable.display(), "build tool session spawned");

        let (exit_tx, exit_rx) = oneshot::channel();
        let (terminate_tx, terminate_rx) = oneshot::channel();
        drop(monitor_exit(child, terminate_rx, exit_tx));

        Ok(Connection {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            exit: exit_rx,
            terminate: terminate_tx,
            pid,
        })
    }
}

/// Spawn a background task that owns `child`, honours one terminate request,
/// and reports the exit through `exit_tx`.
///
/// A dropped `terminate_rx` sender is treated as a request to kill.
#[must_use]
pub fn monitor_exit(
    mut child: Child,
    terminate_rx: oneshot::Receiver<()>,
    exit_tx: oneshot::Sender<ExitInfo>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => status,
            requested = terminate_rx => {
                if requested.is_ok() {
                    terminate(&mut child);
                } else {
                    debug!("terminate handle dropped, killing build tool");
                    if let Err(err) = child.start_kill() {
                        warn!(%err, "failed to kill build tool");
                    }
                }
                match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
                    Ok(status) => status,
                    Err(_elapsed) => {
                        warn!("build tool ignored terminate request, killing it");
                        if let Err(err) = child.start_kill() {
                            warn!(%err, "failed to kill build tool");
                        }
                        child.wait().await
                    }
                }
            }
        };

        let info = match status {
            Ok(status) => {
                let exit_code = status.code();
                let reason = exit_code.map_or_else(
                    || "process terminated by signal".to_owned(),
                    |c| format!("process exited with code {c}"),
                );
                ExitInfo { exit_code, reason }
            }
            Err(err) => {
                warn!(%err, "error waiting for build tool process");
                ExitInfo {
                    exit_code: None,
                    reason: format!("wait error: {err}"),
                }
            }
        };

        info!(exit_code = ?info.exit_code, reason = %info.reason, "build tool exited");
        if exit_tx.send(info).is_err() {
            debug!("exit receiver dropped before the exit could be delivered");
        }
    })
}

/// Ask the process to shut down.
#[cfg(unix)]
fn terminate(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        warn!(pid, %err, "SIGTERM failed, killing build tool");
        if let Err(err) = child.start_kill() {
            warn!(%err, "failed to kill build tool");
        }
    }
}

/// Ask the process to shut down.
#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    if let Err(err) = child.start_kill() {
        warn!(%err, "failed to kill build tool");
    }
}

async fn drain_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(line = %line, "build tool stderr"),
            Ok(None) => break,
            Err(err) => {
                debug!(%err, "build tool stderr closed");
                break;
            }
        }
    }
}
