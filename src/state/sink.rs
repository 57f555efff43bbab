//! External progress sinks.
//!
//! A sink receives every committed status batch. Sinks are best-effort: the
//! tracker drops a sink after its first error and keeps tracking locally.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::state::tracker::StatusEvent;
use crate::{wlog_trace, Error, Result};

/// Receiver for committed status batches.
pub trait ProgressSink: Send + Sync {
    /// Human-readable name used in log lines.
    fn name(&self) -> &str;

    /// Publish one committed batch. Must not block for long.
    fn publish(&self, batch: &[StatusEvent]) -> Result<()>;
}

/// Appends one JSON object per status event to a file.
pub struct JsonlSink {
    path: PathBuf,
    // Serializes appends from concurrent commits.
    lock: Mutex<()>,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProgressSink for JsonlSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn publish(&self, batch: &[StatusEvent]) -> Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| Error::ExternalSinkUnavailable("sink lock poisoned".to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                Error::ExternalSinkUnavailable(format!("{}: {}", self.path.display(), e))
            })?;

        let mut buf = String::new();
        for event in batch {
            buf.push_str(&serde_json::to_string(event)?);
            buf.push('\n');
        }
        file.write_all(buf.as_bytes())
            .map_err(|e| Error::ExternalSinkUnavailable(e.to_string()))?;
        wlog_trace!("JsonlSink wrote {} events to {}", batch.len(), self.path.display());
        Ok(())
    }
}
