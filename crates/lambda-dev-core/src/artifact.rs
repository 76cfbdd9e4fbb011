//! Compiled artifacts and the worker that drives their sandbox.
//!
//! A [`CompiledArtifact`] owns a tokio task that exclusively owns the
//! sandbox store. Requests reach it through an unbounded mailbox and are
//! executed in order; results travel back over the per-invocation channels
//! of the [`PendingTable`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use wasmtime::{Instance, Store};

use lambda_dev_common::LambdaError;

use crate::context::ContextSnapshot;
use crate::invocation::{Invocation, PendingTable};
use crate::store::SandboxContext;

/// Event dispatched for incoming HTTP requests.
pub const REQUEST_EVENT: &str = "request";

/// One event queued for the worker.
#[derive(Debug)]
struct Dispatch {
    id: u64,
    event: String,
    context: Vec<u8>,
}

/// A constructed sandbox ready to serve requests.
///
/// Cached by the [`ArtifactCache`](crate::ArtifactCache) until the next
/// rebuild. Requests hold an `Arc` to the artifact they dispatched into, so
/// eviction never pulls it out from under them.
pub struct CompiledArtifact {
    generation: u64,
    content_hash: String,
    bundle_path: PathBuf,
    bindings: Vec<&'static str>,
    events: Vec<String>,
    mailbox: Mutex<Option<mpsc::UnboundedSender<Dispatch>>>,
    pending: PendingTable,
    next_id: AtomicU64,
    torn_down: AtomicBool,
    created_at: Instant,
}

/// Static description of an artifact handed over by the loader.
#[derive(Debug, Clone)]
pub(crate) struct ArtifactInfo {
    pub generation: u64,
    pub content_hash: String,
    pub bundle_path: PathBuf,
    pub bindings: Vec<&'static str>,
}

impl CompiledArtifact {
    /// Start the worker for a fully initialized sandbox.
    pub(crate) fn spawn(
        info: ArtifactInfo,
        store: Store<SandboxContext>,
        instance: Instance,
    ) -> Self {
        let pending = store.data().pending().clone();
        let events = store.data().registry().events();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(run_worker(store, instance, rx, info.generation));

        Self {
            generation: info.generation,
            content_hash: info.content_hash,
            bundle_path: info.bundle_path,
            bindings: info.bindings,
            events,
            mailbox: Mutex::new(Some(tx)),
            pending,
            next_id: AtomicU64::new(1),
            torn_down: AtomicBool::new(false),
            created_at: Instant::now(),
        }
    }

    /// Build generation this artifact was constructed for.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Hash of the bundle source.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Bundle this artifact was built from.
    pub fn bundle_path(&self) -> &Path {
        &self.bundle_path
    }

    /// Capability bindings visible inside the sandbox.
    pub fn binding_names(&self) -> &[&'static str] {
        &self.bindings
    }

    /// Events with at least one handler.
    pub fn events(&self) -> &[String] {
        &self.events
    }

    /// Invocations still waiting for a response.
    pub fn pending_invocations(&self) -> usize {
        self.pending.len()
    }

    /// When the artifact finished construction.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Returns `true` once [`teardown`](Self::teardown) ran.
    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Queue `event` for the handlers of this artifact.
    ///
    /// # Errors
    ///
    /// Returns [`LambdaError::Sandbox`] if the artifact was torn down.
    pub fn dispatch(
        &self,
        event: &str,
        context: &ContextSnapshot,
    ) -> Result<Invocation, LambdaError> {
        let mailbox = self.mailbox.lock();
        let Some(tx) = mailbox.as_ref() else {
            return Err(LambdaError::sandbox("the function has been torn down"));
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let invocation = Invocation::new(id, self.pending.register(id), self.pending.clone());

        tx.send(Dispatch {
            id,
            event: event.to_string(),
            context: context.to_json_bytes(),
        })
        .map_err(|_| LambdaError::sandbox("the function worker has stopped"))?;

        debug!(invocation = id, event, generation = self.generation, "Event dispatched");
        Ok(invocation)
    }

    /// Close the mailbox.
    ///
    /// Already queued events still run; the worker exits once the queue is
    /// drained, which drops the store and detaches whatever is still pending.
    /// Guest code that never returns keeps its worker alive.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.mailbox.lock().take();
        info!(
            generation = self.generation,
            pending = self.pending.len(),
            "Function torn down"
        );
    }
}

impl std::fmt::Debug for CompiledArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledArtifact")
            .field("generation", &self.generation)
            .field("content_hash", &self.content_hash)
            .field("bindings", &self.bindings)
            .field("events", &self.events)
            .field("torn_down", &self.is_torn_down())
            .finish_non_exhaustive()
    }
}

async fn run_worker(
    mut store: Store<SandboxContext>,
    instance: Instance,
    mut mailbox: mpsc::UnboundedReceiver<Dispatch>,
    generation: u64,
) {
    debug!(generation, "Function worker started");

    while let Some(dispatch) = mailbox.recv().await {
        run_handlers(&mut store, &instance, dispatch).await;
    }

    store.data().pending().clear();
    debug!(generation, "Function worker stopped");
}

async fn run_handlers(store: &mut Store<SandboxContext>, instance: &Instance, dispatch: Dispatch) {
    let Dispatch { id, event, context } = dispatch;

    // The caller may have given up while the event was queued.
    if !store.data().pending().contains(id) {
        debug!(invocation = id, "Skipping abandoned invocation");
        return;
    }

    let handlers = store.data().registry().handlers(&event).to_vec();
    if handlers.is_empty() {
        warn!(invocation = id, event = %event, "No handler registered");
        store
            .data()
            .pending()
            .fail(id, &format!("no handler registered for '{event}' events"));
        return;
    }

    let context_len = i32::try_from(context.len()).unwrap_or(i32::MAX);
    store.data_mut().attach_context(id, context);

    let start = Instant::now();
    for export in &handlers {
        let func = match instance.get_typed_func::<(i64, i32), ()>(&mut *store, export) {
            Ok(func) => func,
            Err(e) => {
                error!(export = %export, error = %e, "Handler export is not callable");
                store
                    .data()
                    .pending()
                    .fail(id, &format!("handler '{export}' is not callable: {e}"));
                break;
            }
        };

        #[allow(clippy::cast_possible_wrap)]
        let result = func.call_async(&mut *store, (id as i64, context_len)).await;

        if let Err(trap) = result {
            error!(
                invocation = id,
                export = %export,
                duration_ms = start.elapsed().as_millis(),
                trap_message = %trap,
                "Handler trapped"
            );
            store
                .data()
                .pending()
                .fail(id, &trap.root_cause().to_string());
            break;
        }
    }

    store.data_mut().detach_context(id);
    debug!(
        invocation = id,
        duration_ms = start.elapsed().as_millis(),
        "Handlers finished"
    );
}
