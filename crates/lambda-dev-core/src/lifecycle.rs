//! Rebuild lifecycle.
//!
//! The build step (or the bundled file watcher) reports [`BuildEvent`]s over
//! a channel; the [`RebuildListener`] evicts the cached artifact so the next
//! request constructs a fresh sandbox from the new bundle.

use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::ArtifactCache;

/// Events reported by the build collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildEvent {
    /// A new bundle was written.
    Rebuilt,
    /// The build collaborator shut down.
    Closed,
}

/// Consumes build events and invalidates the cache.
#[derive(Debug, Clone)]
pub struct RebuildListener {
    cache: Arc<ArtifactCache>,
}

impl RebuildListener {
    /// A listener invalidating `cache`.
    pub fn new(cache: Arc<ArtifactCache>) -> Self {
        Self { cache }
    }

    /// Apply one event.
    ///
    /// Returns [`ControlFlow::Break`] once the listener should stop.
    pub fn handle(&self, event: BuildEvent) -> ControlFlow<()> {
        match event {
            BuildEvent::Rebuilt => {
                self.cache.evict();
                info!("Function cache refreshed.");
                ControlFlow::Continue(())
            }
            BuildEvent::Closed => {
                self.cache.evict();
                info!("Build watcher closed; function torn down");
                ControlFlow::Break(())
            }
        }
    }

    /// Consume events until [`BuildEvent::Closed`] or the channel closes.
    pub async fn run(self, mut events: mpsc::Receiver<BuildEvent>) {
        while let Some(event) = events.recv().await {
            debug!(event = ?event, "Build event received");
            if self.handle(event).is_break() {
                return;
            }
        }

        // The sender is gone: treat it like an explicit close.
        if self.handle(BuildEvent::Closed).is_break() {
            debug!("Rebuild listener stopped");
        }
    }

    /// Run the listener on a background task.
    pub fn spawn(self, events: mpsc::Receiver<BuildEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rebuild_bumps_generation() {
        let cache = Arc::new(ArtifactCache::new());
        let listener = RebuildListener::new(Arc::clone(&cache));

        assert_eq!(listener.handle(BuildEvent::Rebuilt), ControlFlow::Continue(()));
        assert_eq!(listener.handle(BuildEvent::Rebuilt), ControlFlow::Continue(()));
        assert_eq!(cache.generation(), 2);
        assert!(cache.lookup().is_none());
    }

    #[tokio::test]
    async fn test_closed_stops_listener() {
        let cache = Arc::new(ArtifactCache::new());
        let (tx, rx) = mpsc::channel(4);
        let handle = RebuildListener::new(Arc::clone(&cache)).spawn(rx);

        tx.send(BuildEvent::Rebuilt).await.unwrap();
        tx.send(BuildEvent::Closed).await.unwrap();
        handle.await.unwrap();

        assert_eq!(cache.generation(), 2);
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn test_dropped_sender_stops_listener() {
        let cache = Arc::new(ArtifactCache::new());
        let (tx, rx) = mpsc::channel(1);
        let handle = RebuildListener::new(Arc::clone(&cache)).spawn(rx);

        drop(tx);
        handle.await.unwrap();

        assert_eq!(cache.generation(), 1);
    }
}
