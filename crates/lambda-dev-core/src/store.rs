//! Sandbox state and store management.
//!
//! This module provides:
//! - [`SandboxContext`]: State of one sandbox, reachable from host functions
//! - [`create_store`]: A store with memory limits and epoch yielding applied

use std::collections::{BTreeMap, HashMap};

use wasmtime::{Store, StoreLimits, StoreLimitsBuilder};

use crate::WasmEngine;
use crate::capability::Bindings;
use crate::invocation::PendingTable;
use crate::registry::HandlerRegistry;

/// Return value for "absent" from data-returning host functions.
pub const RESULT_ABSENT: i32 = -1;

/// Return value for "error, message in the result buffer".
pub const RESULT_ERROR: i32 = -2;

/// State of one sandbox.
///
/// The store owning it lives for the whole lifetime of an artifact, so
/// per-request data is keyed by invocation id and removed once the
/// invocation's handlers return.
///
/// Host functions access it through [`wasmtime::Caller::data`].
pub struct SandboxContext {
    env: BTreeMap<String, String>,
    bindings: Bindings,
    registry: HandlerRegistry,
    pending: PendingTable,
    contexts: HashMap<u64, Vec<u8>>,
    result: Vec<u8>,
    limits: StoreLimits,
}

impl SandboxContext {
    /// Create the state for a new sandbox.
    pub fn new(env: BTreeMap<String, String>, bindings: Bindings, pending: PendingTable) -> Self {
        Self {
            env,
            bindings,
            registry: HandlerRegistry::new(),
            pending,
            contexts: HashMap::new(),
            result: Vec::new(),
            limits: StoreLimits::default(),
        }
    }

    /// Environment snapshot taken when the sandbox was built.
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Capability clients bound into this sandbox.
    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// Registered event handlers.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Mutable access to the handler registry.
    pub fn registry_mut(&mut self) -> &mut HandlerRegistry {
        &mut self.registry
    }

    /// Invocations waiting for a response.
    pub fn pending(&self) -> &PendingTable {
        &self.pending
    }

    /// Make the serialized request context of `id` readable by the guest.
    pub fn attach_context(&mut self, id: u64, context: Vec<u8>) {
        self.contexts.insert(id, context);
    }

    /// Forget the request context of `id`.
    pub fn detach_context(&mut self, id: u64) {
        self.contexts.remove(&id);
    }

    /// Serialized request context of `id`.
    pub fn context(&self, id: u64) -> Option<&[u8]> {
        self.contexts.get(&id).map(Vec::as_slice)
    }

    /// Place `data` in the result buffer and return its length.
    pub fn set_result(&mut self, data: Vec<u8>) -> i32 {
        let len = i32::try_from(data.len()).unwrap_or(i32::MAX);
        self.result = data;
        len
    }

    /// Place an error message in the result buffer and return [`RESULT_ERROR`].
    pub fn set_error(&mut self, message: impl ToString) -> i32 {
        self.result = message.to_string().into_bytes();
        RESULT_ERROR
    }

    /// Contents of the result buffer.
    pub fn result(&self) -> &[u8] {
        &self.result
    }

    fn set_limits(&mut self, limits: StoreLimits) {
        self.limits = limits;
    }
}

impl std::fmt::Debug for SandboxContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxContext")
            .field("env_keys", &self.env.keys().collect::<Vec<_>>())
            .field("bindings", &self.bindings)
            .field("registry", &self.registry)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

/// Create a new Wasmtime store for a sandbox.
///
/// The store gets the engine's linear memory limit, and, when epoch
/// interruption is enabled, yields to the executor on every epoch tick
/// instead of trapping.
pub fn create_store(engine: &WasmEngine, context: SandboxContext) -> Store<SandboxContext> {
    let mut store = Store::new(engine.inner(), context);

    let limits = StoreLimitsBuilder::new()
        .memory_size(engine.config().instance_memory_bytes())
        .build();
    store.data_mut().set_limits(limits);
    store.limiter(|ctx| &mut ctx.limits);

    if engine.config().epoch_interruption {
        store.set_epoch_deadline(1);
        store.epoch_deadline_async_yield_and_update(1);
    }

    store
}

#[cfg(test)]
mod tests {
    use super::*;
    use lambda_dev_common::EngineConfig;

    fn context() -> SandboxContext {
        let env = BTreeMap::from([("KEY".to_string(), "value".to_string())]);
        SandboxContext::new(env, Bindings::none(), PendingTable::new())
    }

    #[test]
    fn test_result_buffer() {
        let mut ctx = context();

        assert_eq!(ctx.set_result(b"hello".to_vec()), 5);
        assert_eq!(ctx.result(), b"hello");

        assert_eq!(ctx.set_error("bad key"), RESULT_ERROR);
        assert_eq!(ctx.result(), b"bad key");
    }

    #[test]
    fn test_context_attach_detach() {
        let mut ctx = context();
        ctx.attach_context(7, b"{}".to_vec());
        assert_eq!(ctx.context(7), Some(&b"{}"[..]));

        ctx.detach_context(7);
        assert!(ctx.context(7).is_none());
    }

    #[test]
    fn test_store_creation() {
        let engine = WasmEngine::new(&EngineConfig::default()).unwrap();
        let store = create_store(&engine, context());

        assert_eq!(store.data().env()["KEY"], "value");
        assert!(!store.data().registry().is_sealed());
    }
}
