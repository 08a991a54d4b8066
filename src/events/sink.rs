//! Write-behind persistent log sink.
//!
//! Entries are handed to a background task over a bounded channel and
//! appended to a JSON-lines file. The producer side never waits: when the
//! queue is full or the writer is gone, the entry is dropped from the file
//! (it was still broadcast).

use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::events::entry::LogEntry;
use crate::observability::metrics;

const QUEUE_DEPTH: usize = 1024;

/// Handle used by the hub to enqueue entries.
#[derive(Clone)]
pub struct LogSink {
    tx: mpsc::Sender<LogEntry>,
}

impl LogSink {
    /// Spawn the writer task. Must be called inside a Tokio runtime.
    pub fn spawn(path: impl Into<PathBuf>) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let path = path.into();
        tokio::spawn(write_loop(path, rx));
        Self { tx }
    }

    /// Enqueue an entry without waiting.
    pub fn offer(&self, entry: &LogEntry) {
        if self.tx.try_send(entry.clone()).is_err() {
            metrics::record_sink_drop();
        }
    }
}

async fn open(path: &Path) -> std::io::Result<tokio::fs::File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path).await
}

async fn write_loop(path: PathBuf, mut rx: mpsc::Receiver<LogEntry>) {
    let mut file = match open(&path).await {
        Ok(f) => Some(f),
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Failed to open event log file; file sink disabled");
            None
        }
    };

    while let Some(entry) = rx.recv().await {
        let Some(f) = file.as_mut() else { continue };

        let mut line = match serde_json::to_vec(&entry) {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize log entry");
                continue;
            }
        };
        line.push(b'\n');

        if let Err(e) = f.write_all(&line).await {
            tracing::error!(path = %path.display(), error = %e, "Event log write failed; file sink disabled");
            file = None;
        }
    }

    if let Some(mut f) = file {
        let _ = f.flush().await;
    }
}
