//! Bundle file watcher.
//!
//! Watches the directory holding the bundle and reports
//! [`BuildEvent::Rebuilt`] whenever the bundle file is written, created or
//! removed. Build tools usually write several times in a row, so a burst of
//! events within the debounce window is reported once.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use lambda_dev_common::LambdaError;
use lambda_dev_core::BuildEvent;

/// A running bundle watcher.
///
/// Dropping it (or calling [`BundleWatcher::stop`]) stops event delivery;
/// the forwarding task then reports [`BuildEvent::Closed`].
pub struct BundleWatcher {
    watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl BundleWatcher {
    /// Start watching `bundle`, sending build events to `events`.
    ///
    /// # Errors
    ///
    /// Returns [`LambdaError::Config`] if the bundle path has no file name or
    /// its directory cannot be watched.
    pub fn spawn(
        bundle: impl AsRef<Path>,
        debounce: Duration,
        events: mpsc::Sender<BuildEvent>,
    ) -> Result<Self, LambdaError> {
        let bundle = bundle.as_ref();
        let file_name = bundle.file_name().map(OsStr::to_os_string).ok_or_else(|| {
            LambdaError::config(format!("bundle path '{}' has no file name", bundle.display()))
        })?;
        let dir = match bundle.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })
        .map_err(|e| LambdaError::config(format!("Failed to create file watcher: {e}")))?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| {
                LambdaError::config(format!("Failed to watch '{}': {e}", dir.display()))
            })?;

        info!(
            bundle = %bundle.display(),
            debounce_ms = debounce.as_millis(),
            "Watching bundle for rebuilds"
        );

        let task = tokio::spawn(forward(rx, file_name, debounce, events));
        Ok(Self { watcher, task })
    }

    /// Stop watching and wait for the forwarding task to finish.
    pub async fn stop(self) {
        let Self { watcher, task } = self;
        drop(watcher);
        let _ = task.await;
    }
}

impl std::fmt::Debug for BundleWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleWatcher")
            .field("finished", &self.task.is_finished())
            .finish_non_exhaustive()
    }
}

async fn forward(
    mut rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    file_name: OsString,
    debounce: Duration,
    events: mpsc::Sender<BuildEvent>,
) {
    while let Some(result) = rx.recv().await {
        match result {
            Ok(event) if is_bundle_event(&event, &file_name) => {
                tokio::time::sleep(debounce).await;
                while rx.try_recv().is_ok() {}

                debug!(paths = ?event.paths, "Bundle changed");
                if events.send(BuildEvent::Rebuilt).await.is_err() {
                    return;
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Watch error"),
        }
    }

    let _ = events.send(BuildEvent::Closed).await;
}

/// Returns `true` if `event` writes, creates or removes the bundle file.
fn is_bundle_event(event: &Event, file_name: &OsStr) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event
        .paths
        .iter()
        .any(|path| path.file_name() == Some(file_name))
}
