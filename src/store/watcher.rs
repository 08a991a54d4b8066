//! State-file watcher for external edits.
//!
//! Watches the data directory (the state file is replaced by rename, so a
//! watch on the file itself would go stale) and forwards a tick whenever the
//! state file is created or modified. The consumer re-reads it through
//! [`ConfigStore::reload_from_disk`](super::ConfigStore::reload_from_disk),
//! which makes our own saves no-ops.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

pub struct StateFileWatcher {
    dir: PathBuf,
    file_name: String,
    change_tx: mpsc::UnboundedSender<()>,
}

impl StateFileWatcher {
    /// Returns the watcher and a receiver that ticks on each relevant change.
    pub fn new(state_file: &Path) -> (Self, mpsc::UnboundedReceiver<()>) {
        let (change_tx, change_rx) = mpsc::unbounded_channel();
        let dir = state_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let file_name = state_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        (Self { dir, file_name, change_tx }, change_rx)
    }

    /// Start watching. The returned handle must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.change_tx.clone();
        let file_name = self.file_name.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if !(event.kind.is_modify() || event.kind.is_create()) {
                        return;
                    }
                    let touches_state = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n == file_name.as_str()).unwrap_or(false));
                    if touches_state {
                        tracing::debug!(paths = ?event.paths, "State file change detected");
                        let _ = tx.send(());
                    }
                }
                Err(e) => tracing::error!(error = ?e, "State watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.dir, RecursiveMode::NonRecursive)?;

        tracing::info!(dir = ?self.dir, file = %self.file_name, "State file watcher started");
        Ok(watcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_dir_and_name() {
        let (w, _rx) = StateFileWatcher::new(Path::new("data/config.json"));
        assert_eq!(w.dir, PathBuf::from("data"));
        assert_eq!(w.file_name, "config.json");

        let (w, _rx) = StateFileWatcher::new(Path::new("config.json"));
        assert_eq!(w.dir, PathBuf::from("."));
    }

    #[tokio::test]
    async fn test_reports_state_file_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let (w, mut rx) = StateFileWatcher::new(&path);
        let _handle = w.run().unwrap();

        std::fs::write(dir.path().join("other.txt"), b"ignored").unwrap();
        std::fs::write(&path, b"{}").unwrap();

        let got = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
        assert!(matches!(got, Ok(Some(()))));
    }
}
