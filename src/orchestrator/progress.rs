//! Progress aggregation with a monotonic percentage ratchet.
//!
//! The tool reports progress per task (`task-started`, `new-max-progress`,
//! `task-progress`). The tracker turns those into a percentage and surfaces
//! an update only when the percentage strictly exceeds the last reported
//! value, so an operation reports at most 100 increments and never moves
//! backwards. A new tracker (percentage 0) is used for every operation.

use crate::models::response::ResponseEvent;

/// A surfaced progress change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// New percentage (1–100).
    pub percentage: u8,
    /// Difference to the previously reported percentage.
    pub increment: u8,
    /// Description of the running task.
    pub description: String,
}

/// Per-operation progress state.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    progress: u64,
    max_progress: u64,
    description: String,
    last_reported: u8,
}

/// `round(100 * progress / max)` clamped to 100; 0 when nothing progressed.
#[must_use]
pub fn percentage(progress: u64, max_progress: u64) -> u8 {
    if progress == 0 || max_progress == 0 {
        return 0;
    }
    let (p, m) = (u128::from(progress), u128::from(max_progress));
    let rounded = (200 * p + m) / (2 * m);
    u8::try_from(rounded.min(100)).unwrap_or(100)
}

impl ProgressTracker {
    /// A tracker at 0 %.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last surfaced percentage.
    #[must_use]
    pub fn reported(&self) -> u8 {
        self.last_reported
    }

    /// Description of the current task.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// A new task started: progress restarts at 0 against `max_progress`.
    pub fn task_started(&mut self, description: &str, max_progress: u64) -> Option<ProgressUpdate> {
        self.description = description.to_owned();
        self.max_progress = max_progress;
        self.progress = 0;
        self.surface()
    }

    /// The current task's completion value changed.
    pub fn new_max_progress(&mut self, max_progress: u64) -> Option<ProgressUpdate> {
        self.max_progress = max_progress;
        self.surface()
    }

    /// The current task progressed.
    pub fn task_progress(&mut self, progress: u64) -> Option<ProgressUpdate> {
        self.progress = progress;
        self.surface()
    }

    /// Apply a progress message; other messages are ignored.
    pub fn apply(&mut self, event: &ResponseEvent) -> Option<ProgressUpdate> {
        match event {
            ResponseEvent::TaskStarted(t) => self.task_started(&t.description, t.max_progress),
            ResponseEvent::NewMaxProgress(m) => self.new_max_progress(m.max_progress),
            ResponseEvent::TaskProgress(p) => self.task_progress(p.progress),
            _ => None,
        }
    }

    fn surface(&mut self) -> Option<ProgressUpdate> {
        let current = percentage(self.progress, self.max_progress);
        if current <= self.last_reported {
            return None;
        }
        let increment = current - self.last_reported;
        self.last_reported = current;
        Some(ProgressUpdate {
            percentage: current,
            increment,
            description: self.description.clone(),
        })
    }
}
