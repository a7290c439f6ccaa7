//! Debounced configuration file watching.
//!
//! The parent directory is watched and events are filtered down to the
//! configuration file itself; editors typically replace the file rather
//! than write it in place, so create/rename events count as changes too.
//! A short debounce coalesces the burst of events one save produces.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::info;

const DEBOUNCE: Duration = Duration::from_millis(500);

/// Watches one configuration file and yields a signal per burst of changes.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    signals: mpsc::UnboundedReceiver<()>,
}

impl ConfigWatcher {
    pub fn new(path: &Path) -> anyhow::Result<Self> {
        let file_name = path
            .file_name()
            .context("config path has no file name")?
            .to_os_string();
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => Path::new(".").to_path_buf(),
        };

        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                let interested = matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                );
                if interested
                    && event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == Some(file_name.as_os_str()))
                {
                    let _ = raw_tx.send(());
                }
            }
        })?;
        watcher.watch(&parent, RecursiveMode::NonRecursive)?;
        info!(path = %path.display(), "Watching configuration file");

        let (tx, signals) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while raw_rx.recv().await.is_some() {
                // give duplicate events from one save a chance to pile up
                tokio::time::sleep(DEBOUNCE).await;
                while raw_rx.try_recv().is_ok() {}
                if tx.send(()).is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            _watcher: watcher,
            signals,
        })
    }

    /// Waits for the next debounced change to the configuration file.
    /// Returns `false` if the watcher has shut down.
    pub async fn changed(&mut self) -> bool {
        self.signals.recv().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_change_to_watched_file_signals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forwards.yaml");
        std::fs::write(&path, "portForwards: []\n").unwrap();

        let mut watcher = ConfigWatcher::new(&path).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(&path, "portForwards: []\nport: 8088\n").unwrap();

        let signalled = tokio::time::timeout(Duration::from_secs(5), watcher.changed())
            .await
            .expect("no change signal within timeout");
        assert!(signalled);
    }

    #[tokio::test]
    async fn test_sibling_file_does_not_signal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forwards.yaml");
        std::fs::write(&path, "portForwards: []\n").unwrap();

        let mut watcher = ConfigWatcher::new(&path).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(dir.path().join("notes.txt"), "unrelated").unwrap();

        let outcome =
            tokio::time::timeout(Duration::from_millis(1500), watcher.changed()).await;
        assert!(outcome.is_err());
    }
}
