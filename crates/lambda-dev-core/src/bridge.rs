//! Request/response bridge with deadline.
//!
//! [`RequestBridge::handle`] takes one request from the HTTP layer, finds or
//! builds the current artifact, dispatches a `request` event into it and
//! waits for the handler's response, at most `maxWaitTime`.
//!
//! ```text
//!            respond_with / response.*
//!   Pending ──────────────────────────▶ Completed
//!      │  \
//!      │   \ emit_error / trap
//!      │    ───────────────────────────▶ Failed
//!      │ deadline
//!      ▼
//!   TimedOut
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, warn};

use lambda_dev_common::{LambdaConfig, LambdaError};

use crate::artifact::REQUEST_EVENT;
use crate::cache::ArtifactCache;
use crate::context::ContextSnapshot;
use crate::invocation::Invocation;
use crate::response::OuterResponse;
use crate::sandbox::{BundleSource, SandboxLoader, SandboxSettings};

/// Attempts at finding or building an artifact before giving up.
///
/// More than one is only needed when rebuilds land while a request is
/// constructing.
const MAX_ATTEMPTS: usize = 3;

/// States of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    /// Dispatched, waiting for the handler.
    Pending,
    /// The handler responded before the deadline.
    Completed,
    /// The deadline elapsed first.
    TimedOut,
    /// The handler signalled an error or trapped.
    Failed,
}

impl InvocationState {
    /// Returns `true` for every state but [`InvocationState::Pending`].
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Everything the bridge needs for one request.
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    /// Snapshot of the incoming request.
    pub context: ContextSnapshot,
    /// Response deadline.
    pub max_wait: Duration,
    /// Settings used if this request has to construct the artifact.
    pub settings: SandboxSettings,
}

impl RequestEnvelope {
    /// An envelope carrying the session configuration.
    pub fn new(context: ContextSnapshot, config: &LambdaConfig) -> Self {
        Self {
            context,
            max_wait: config.max_wait(),
            settings: SandboxSettings::from_config(config),
        }
    }
}

/// Bridges HTTP requests into the current artifact.
#[derive(Debug)]
pub struct RequestBridge {
    cache: Arc<ArtifactCache>,
    loader: Arc<SandboxLoader>,
    source: BundleSource,
}

impl RequestBridge {
    /// Create a bridge serving `source`.
    pub fn new(cache: Arc<ArtifactCache>, loader: Arc<SandboxLoader>, source: BundleSource) -> Self {
        Self {
            cache,
            loader,
            source,
        }
    }

    /// The artifact cache.
    pub fn cache(&self) -> &Arc<ArtifactCache> {
        &self.cache
    }

    /// The bundle being served.
    pub fn source(&self) -> &BundleSource {
        &self.source
    }

    /// Serve one request, mutating `outer` on success.
    ///
    /// # Errors
    ///
    /// - construction errors ([`LambdaError::BundleNotFound`],
    ///   [`LambdaError::ImportDenied`], [`LambdaError::Compilation`])
    /// - [`LambdaError::Timeout`] if the handler did not respond in time
    /// - [`LambdaError::Sandbox`] if the handler failed
    #[instrument(skip_all, fields(request_id = %envelope.context.request_id, path = %envelope.context.path))]
    pub async fn handle(
        &self,
        envelope: RequestEnvelope,
        outer: &mut OuterResponse,
    ) -> Result<InvocationState, LambdaError> {
        let start = Instant::now();
        let deadline = envelope.max_wait;

        let mut invocation = self.dispatch(&envelope, start, deadline).await?;
        debug!(
            invocation = invocation.id(),
            state = ?InvocationState::Pending,
            "Waiting for response"
        );

        let remaining = deadline.saturating_sub(start.elapsed());
        let (state, result) = match tokio::time::timeout(remaining, invocation.completion()).await {
            Ok(Ok(descriptor)) => {
                descriptor.apply_to(outer);
                (InvocationState::Completed, Ok(()))
            }
            Ok(Err(e)) => (InvocationState::Failed, Err(e)),
            Err(_) => (InvocationState::TimedOut, Err(timeout_error(deadline))),
        };

        let duration_ms = start.elapsed().as_millis();
        match &result {
            Ok(()) => info!(state = ?state, status = ?outer.status(), duration_ms, "Request completed"),
            Err(e) if e.is_timeout() => warn!(state = ?state, duration_ms, "Request timed out"),
            Err(e) => error!(state = ?state, error = %e, duration_ms, "Request failed"),
        }

        result.map(|()| state)
    }

    /// Dispatch into the cached artifact, constructing it on a miss.
    ///
    /// Every construction attempt shares the deadline that started at `start`.
    async fn dispatch(
        &self,
        envelope: &RequestEnvelope,
        start: Instant,
        deadline: Duration,
    ) -> Result<Invocation, LambdaError> {
        for attempt in 1..=MAX_ATTEMPTS {
            let dispatched = self
                .cache
                .lookup_with(|artifact| artifact.dispatch(REQUEST_EVENT, &envelope.context));
            if let Some(result) = dispatched {
                return result;
            }

            debug!(attempt, "Function cache miss");
            let remaining = deadline.saturating_sub(start.elapsed());
            let build = |generation| self.loader.load(&self.source, &envelope.settings, generation);
            let constructed = tokio::time::timeout(remaining, self.cache.construct_if_absent(build))
                .await
                .map_err(|_| timeout_error(deadline))??;

            // Evicted between construction and dispatch: try again.
            if let Some(Ok(invocation)) =
                constructed.map(|artifact| artifact.dispatch(REQUEST_EVENT, &envelope.context))
            {
                return Ok(invocation);
            }
        }

        Err(LambdaError::sandbox(
            "the function was rebuilt repeatedly while being loaded",
        ))
    }
}

fn timeout_error(deadline: Duration) -> LambdaError {
    LambdaError::Timeout {
        duration_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!InvocationState::Pending.is_terminal());
        assert!(InvocationState::Completed.is_terminal());
        assert!(InvocationState::TimedOut.is_terminal());
        assert!(InvocationState::Failed.is_terminal());
    }

    #[test]
    fn test_envelope_from_config() {
        let config = LambdaConfig {
            max_wait_time: 0.5,
            allowed_require: vec!["helpers".into()],
            ..Default::default()
        };
        let envelope = RequestEnvelope::new(ContextSnapshot::new("r", "GET", "/"), &config);

        assert_eq!(envelope.max_wait, Duration::from_millis(500));
        assert_eq!(envelope.settings.allowed_modules, vec!["helpers"]);
        assert!(envelope.settings.builtins.is_empty());
    }

    #[test]
    fn test_timeout_error() {
        let err = timeout_error(Duration::from_secs(10));
        assert!(matches!(err, LambdaError::Timeout { duration_ms: 10_000 }));
    }
}
