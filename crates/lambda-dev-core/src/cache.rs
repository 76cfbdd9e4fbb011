//! Single-slot artifact cache.
//!
//! The cache holds at most one live [`CompiledArtifact`], keyed by a build
//! generation counter. Every rebuild bumps the generation, so an artifact
//! whose construction started before a rebuild is rejected instead of
//! being cached over the newer bundle.

use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info};

use lambda_dev_common::LambdaError;

use crate::artifact::CompiledArtifact;

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    artifact: Option<Arc<CompiledArtifact>>,
}

/// Cache of the current artifact.
///
/// # Thread Safety
///
/// Reads and dispatches run under a shared lock; eviction takes the
/// exclusive lock, so a request either dispatches into the artifact before
/// it is torn down or finds the slot empty. Construction is serialized by a
/// separate async lock so concurrent first requests build only once.
#[derive(Debug, Default)]
pub struct ArtifactCache {
    slot: RwLock<Slot>,
    construction: Mutex<()>,
}

impl ArtifactCache {
    /// An empty cache at generation 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current build generation.
    pub fn generation(&self) -> u64 {
        self.slot.read().generation
    }

    /// The cached artifact, if any.
    pub fn lookup(&self) -> Option<Arc<CompiledArtifact>> {
        self.slot.read().artifact.clone()
    }

    /// Run `f` against the cached artifact while holding the shared lock.
    ///
    /// Returns `None` on a miss.
    pub fn lookup_with<R>(&self, f: impl FnOnce(&Arc<CompiledArtifact>) -> R) -> Option<R> {
        let slot = self.slot.read();
        slot.artifact.as_ref().map(f)
    }

    /// Cache `artifact`.
    ///
    /// Returns `false`, leaving the slot untouched, if the artifact was built
    /// for an older generation.
    pub fn store(&self, artifact: Arc<CompiledArtifact>) -> bool {
        let mut slot = self.slot.write();
        if artifact.generation() != slot.generation {
            debug!(
                artifact_generation = artifact.generation(),
                current_generation = slot.generation,
                "Rejected stale artifact"
            );
            return false;
        }
        if let Some(previous) = slot.artifact.replace(artifact) {
            previous.teardown();
        }
        true
    }

    /// Tear down and drop the cached artifact, then bump the generation.
    ///
    /// Returns the evicted artifact.
    pub fn evict(&self) -> Option<Arc<CompiledArtifact>> {
        let mut slot = self.slot.write();
        let evicted = slot.artifact.take();
        if let Some(artifact) = &evicted {
            artifact.teardown();
        }
        slot.generation += 1;
        info!(
            generation = slot.generation,
            evicted = evicted.is_some(),
            "Function cache invalidated"
        );
        evicted
    }

    /// Return the cached artifact, constructing it with `build` on a miss.
    ///
    /// Concurrent callers wait for a single construction. `build` receives the
    /// generation the artifact must be built for. Returns `Ok(None)` if the
    /// cache was invalidated while the artifact was being built; the stale
    /// artifact is torn down and the caller should retry.
    ///
    /// # Errors
    ///
    /// Returns the error of `build`. Nothing is cached in that case.
    pub async fn construct_if_absent<F, Fut>(
        &self,
        build: F,
    ) -> Result<Option<Arc<CompiledArtifact>>, LambdaError>
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = Result<CompiledArtifact, LambdaError>>,
    {
        let _guard = self.construction.lock().await;

        if let Some(artifact) = self.lookup() {
            return Ok(Some(artifact));
        }

        let generation = self.generation();
        let artifact = Arc::new(build(generation).await?);

        if self.store(Arc::clone(&artifact)) {
            Ok(Some(artifact))
        } else {
            artifact.teardown();
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_cache() {
        let cache = ArtifactCache::new();

        assert_eq!(cache.generation(), 0);
        assert!(cache.lookup().is_none());
        assert!(cache.lookup_with(|artifact| artifact.generation()).is_none());
    }

    #[test]
    fn test_evict_empty_slot_bumps_generation() {
        let cache = ArtifactCache::new();

        assert!(cache.evict().is_none());
        assert!(cache.evict().is_none());
        assert_eq!(cache.generation(), 2);
    }

    #[tokio::test]
    async fn test_failed_build_caches_nothing() {
        let cache = ArtifactCache::new();

        let result = cache
            .construct_if_absent(|generation| async move {
                assert_eq!(generation, 0);
                Err(LambdaError::bundle_not_found("/tmp/missing.wat"))
            })
            .await;

        assert!(matches!(result, Err(LambdaError::BundleNotFound { .. })));
        assert!(cache.lookup().is_none());
        assert_eq!(cache.generation(), 0);
    }
}
