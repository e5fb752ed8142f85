//! JSONL build log writer with daily file rotation.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use chrono::{NaiveDate, Utc};
use tracing::{debug, warn};

use super::{BuildLogRecord, DiagnosticsSink};
use crate::models::operation::{OperationKind, OperationOutcome};
use crate::models::response::{MessageList, ResponseEvent};
use crate::{AppError, Result};

/// The file records of one calendar day go to.
struct DayFile {
    date: NaiveDate,
    file: File,
}

/// A daily-rotating JSONL build log.
///
/// Appends one JSON object per line to `<log_dir>/build-YYYY-MM-DD.jsonl`.
/// Each record is a single append-mode write, so concurrent writers never
/// interleave within a line.
pub struct JsonlBuildLog {
    log_dir: PathBuf,
    day: Mutex<Option<DayFile>>,
}

impl JsonlBuildLog {
    /// Construct a log that stores files in `log_dir`.
    ///
    /// Creates `log_dir` and all parent directories if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] if the directory cannot be created.
    pub fn new(log_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&log_dir).map_err(|e| {
            AppError::Config(format!(
                "failed to create build log directory {}: {e}",
                log_dir.display()
            ))
        })?;
        Ok(Self {
            log_dir,
            day: Mutex::new(None),
        })
    }

    /// Path of the log file for `date`.
    #[must_use]
    pub fn file_for_date(&self, date: NaiveDate) -> PathBuf {
        self.log_dir.join(format!("build-{date}.jsonl"))
    }

    fn open_day(&self, date: NaiveDate) -> Result<DayFile> {
        let path = self.file_for_date(date);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| AppError::Io(format!("failed to open build log {}: {e}", path.display())))?;
        debug!(path = %path.display(), "build log opened");
        Ok(DayFile { date, file })
    }

    /// Append a single record.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the record cannot be serialised or the
    /// file cannot be opened or written.
    pub fn record(&self, record: &BuildLogRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)
            .map_err(|e| AppError::Io(format!("failed to serialise build log record: {e}")))?;
        line.push(b'\n');

        let today = Utc::now().date_naive();
        let mut day = self.day.lock().unwrap_or_else(PoisonError::into_inner);
        let current = match day.take() {
            Some(open) if open.date == today => open,
            _ => self.open_day(today)?,
        };
        let current = day.insert(current);
        current
            .file
            .write_all(&line)
            .map_err(|e| AppError::Io(format!("build log write failed: {e}")))
    }
}

impl DiagnosticsSink for JsonlBuildLog {
    fn forward(&self, event: &ResponseEvent) {
        if let Err(e) = self.record(&BuildLogRecord::tool_message(event)) {
            warn!(error = %e, "failed to write build log record");
        }
    }

    fn operation_finished(
        &self,
        kind: OperationKind,
        outcome: &OperationOutcome,
        messages: &MessageList,
    ) {
        if let Err(e) = self.record(&BuildLogRecord::operation_finished(kind, outcome, messages)) {
            warn!(error = %e, "failed to write build log record");
        }
    }
}
