//! Host function registration for sandbox linkers.
//!
//! [`HostBindings`] links the `fetch` binding into every sandbox, and the
//! capability and built-in namespaces only when the sandbox's [`Namespace`]
//! includes them.
//!
//! # Memory Protocol
//!
//! Keys, paths and payloads are `(ptr, len)` pairs into the guest's exported
//! `memory`. Data-returning functions place their result in the store's
//! result buffer and return its length, `-1` when there is nothing, or `-2`
//! with an error message in the buffer. Writes return `0` on success.

use std::sync::Arc;

use reqwest::Client;
use serde_json::Value;
use tracing::debug;
use wasmtime::{Caller, Linker};

use lambda_dev_common::LambdaError;
use lambda_dev_core::namespace::FETCH;
use lambda_dev_core::{
    BlobStore, CapabilityKind, FileSystem, HostFunctions, KeyValue, LogSink, Namespace,
    RESULT_ABSENT, SandboxContext, guest,
};

use crate::builtins;
use crate::capabilities::log::level_from_i32;
use crate::fetch::{FetchHost, FetchRequest, build_client};
use crate::policy::FetchPolicy;

/// Return value of a successful write.
const WRITE_OK: i32 = 0;

/// The host side of every sandbox.
#[derive(Debug, Clone)]
pub struct HostBindings {
    client: Client,
    policy: FetchPolicy,
}

impl HostBindings {
    /// Bindings enforcing `policy` on outbound HTTP.
    ///
    /// # Errors
    ///
    /// Returns [`LambdaError::Config`] if the HTTP client cannot be created.
    pub fn new(policy: FetchPolicy) -> Result<Self, LambdaError> {
        Ok(Self {
            client: build_client()?,
            policy,
        })
    }

    /// The outbound HTTP policy.
    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }
}

impl HostFunctions for HostBindings {
    fn builtins(&self) -> &[&'static str] {
        &builtins::SUPPORTED
    }

    fn register(
        &self,
        linker: &mut Linker<SandboxContext>,
        namespace: &Namespace,
    ) -> Result<(), LambdaError> {
        // One budget per artifact.
        let fetch = Arc::new(FetchHost::new(self.client.clone(), self.policy.clone()));
        register_fetch(linker, fetch).map_err(|e| link_error(FETCH, &e))?;

        for kind in CapabilityKind::ALL {
            let name = kind.binding_name();
            if !namespace.capabilities().contains(&name) {
                continue;
            }
            let registered = match kind {
                CapabilityKind::Kv => register_kv(linker),
                CapabilityKind::Blob => register_blob(linker),
                CapabilityKind::Fs => register_fs(linker),
                CapabilityKind::Log => register_log(linker),
            };
            registered.map_err(|e| link_error(name, &e))?;
            debug!(capability = name, "Capability linked");
        }

        builtins::register(linker, namespace).map_err(|e| link_error("builtins", &e))?;
        Ok(())
    }
}

fn link_error(namespace: &str, e: &wasmtime::Error) -> LambdaError {
    LambdaError::config(format!("Failed to register '{namespace}' bindings: {e}"))
}

fn unbound(kind: CapabilityKind) -> wasmtime::Error {
    wasmtime::Error::msg(format!("capability '{kind}' is not bound"))
}

fn register_fetch(
    linker: &mut Linker<SandboxContext>,
    host: Arc<FetchHost>,
) -> wasmtime::Result<()> {
    linker.func_wrap_async(
        FETCH,
        "fetch",
        move |caller: Caller<'_, SandboxContext>, (ptr, len): (i32, i32)| {
            Box::new(fetch(caller, Arc::clone(&host), ptr, len))
        },
    )?;
    Ok(())
}

async fn fetch(
    mut caller: Caller<'_, SandboxContext>,
    host: Arc<FetchHost>,
    ptr: i32,
    len: i32,
) -> wasmtime::Result<i32> {
    let bytes = guest::read_bytes(&mut caller, ptr, len)?;
    let request: FetchRequest = match serde_json::from_slice(&bytes) {
        Ok(request) => request,
        Err(e) => return Ok(caller.data_mut().set_error(format!("invalid fetch request: {e}"))),
    };

    let url = request.url.clone();
    match host.fetch(request).await {
        Ok(response) => Ok(caller.data_mut().set_result(serde_json::to_vec(&response)?)),
        Err(e) => Ok(caller.data_mut().set_error(e.into_host_error(&url))),
    }
}

fn register_kv(linker: &mut Linker<SandboxContext>) -> wasmtime::Result<()> {
    let name = CapabilityKind::Kv.binding_name();
    linker.func_wrap_async(
        name,
        "get",
        |caller: Caller<'_, SandboxContext>, (ptr, len): (i32, i32)| {
            Box::new(kv_get(caller, ptr, len))
        },
    )?;
    linker.func_wrap_async(
        name,
        "set",
        |caller: Caller<'_, SandboxContext>, (kptr, klen, vptr, vlen): (i32, i32, i32, i32)| {
            Box::new(kv_set(caller, kptr, klen, vptr, vlen))
        },
    )?;
    linker.func_wrap_async(
        name,
        "remove",
        |caller: Caller<'_, SandboxContext>, (ptr, len): (i32, i32)| {
            Box::new(kv_remove(caller, ptr, len))
        },
    )?;
    Ok(())
}

fn kv_client(caller: &Caller<'_, SandboxContext>) -> wasmtime::Result<Arc<dyn KeyValue>> {
    caller
        .data()
        .bindings()
        .kv()
        .cloned()
        .ok_or_else(|| unbound(CapabilityKind::Kv))
}

async fn kv_get(
    mut caller: Caller<'_, SandboxContext>,
    ptr: i32,
    len: i32,
) -> wasmtime::Result<i32> {
    let key = guest::read_string(&mut caller, ptr, len)?;
    let kv = kv_client(&caller)?;

    match kv.get(&key).await {
        Ok(Some(value)) => Ok(caller.data_mut().set_result(serde_json::to_vec(&value)?)),
        Ok(None) => Ok(RESULT_ABSENT),
        Err(e) => Err(wasmtime::Error::msg(format!("kv.get('{key}') failed: {e}"))),
    }
}

async fn kv_set(
    mut caller: Caller<'_, SandboxContext>,
    kptr: i32,
    klen: i32,
    vptr: i32,
    vlen: i32,
) -> wasmtime::Result<i32> {
    let key = guest::read_string(&mut caller, kptr, klen)?;
    let bytes = guest::read_bytes(&mut caller, vptr, vlen)?;
    let value: Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(e) => return Ok(caller.data_mut().set_error(format!("invalid JSON value: {e}"))),
    };
    let kv = kv_client(&caller)?;

    match kv.set(&key, &value).await {
        Ok(()) => Ok(WRITE_OK),
        Err(e) => Ok(caller.data_mut().set_error(e)),
    }
}

async fn kv_remove(
    mut caller: Caller<'_, SandboxContext>,
    ptr: i32,
    len: i32,
) -> wasmtime::Result<i32> {
    let key = guest::read_string(&mut caller, ptr, len)?;
    let kv = kv_client(&caller)?;

    match kv.remove(&key).await {
        Ok(()) => Ok(WRITE_OK),
        Err(e) => Ok(caller.data_mut().set_error(e)),
    }
}

fn register_blob(linker: &mut Linker<SandboxContext>) -> wasmtime::Result<()> {
    let name = CapabilityKind::Blob.binding_name();
    linker.func_wrap_async(
        name,
        "get",
        |caller: Caller<'_, SandboxContext>, (ptr, len): (i32, i32)| {
            Box::new(blob_get(caller, ptr, len))
        },
    )?;
    linker.func_wrap_async(
        name,
        "put",
        |caller: Caller<'_, SandboxContext>, (kptr, klen, dptr, dlen): (i32, i32, i32, i32)| {
            Box::new(blob_put(caller, kptr, klen, dptr, dlen))
        },
    )?;
    linker.func_wrap_async(
        name,
        "remove",
        |caller: Caller<'_, SandboxContext>, (ptr, len): (i32, i32)| {
            Box::new(blob_remove(caller, ptr, len))
        },
    )?;
    Ok(())
}

fn blob_client(caller: &Caller<'_, SandboxContext>) -> wasmtime::Result<Arc<dyn BlobStore>> {
    caller
        .data()
        .bindings()
        .blob()
        .cloned()
        .ok_or_else(|| unbound(CapabilityKind::Blob))
}

async fn blob_get(
    mut caller: Caller<'_, SandboxContext>,
    ptr: i32,
    len: i32,
) -> wasmtime::Result<i32> {
    let key = guest::read_string(&mut caller, ptr, len)?;
    let blob = blob_client(&caller)?;

    match blob.get(&key).await {
        Ok(Some(data)) => Ok(caller.data_mut().set_result(data)),
        Ok(None) => Ok(RESULT_ABSENT),
        Err(e) => Ok(caller.data_mut().set_error(e)),
    }
}

async fn blob_put(
    mut caller: Caller<'_, SandboxContext>,
    kptr: i32,
    klen: i32,
    dptr: i32,
    dlen: i32,
) -> wasmtime::Result<i32> {
    let key = guest::read_string(&mut caller, kptr, klen)?;
    let data = guest::read_bytes(&mut caller, dptr, dlen)?;
    let blob = blob_client(&caller)?;

    match blob.put(&key, &data).await {
        Ok(()) => Ok(WRITE_OK),
        Err(e) => Ok(caller.data_mut().set_error(e)),
    }
}

async fn blob_remove(
    mut caller: Caller<'_, SandboxContext>,
    ptr: i32,
    len: i32,
) -> wasmtime::Result<i32> {
    let key = guest::read_string(&mut caller, ptr, len)?;
    let blob = blob_client(&caller)?;

    match blob.remove(&key).await {
        Ok(()) => Ok(WRITE_OK),
        Err(e) => Ok(caller.data_mut().set_error(e)),
    }
}

fn register_fs(linker: &mut Linker<SandboxContext>) -> wasmtime::Result<()> {
    let name = CapabilityKind::Fs.binding_name();
    linker.func_wrap_async(
        name,
        "read",
        |caller: Caller<'_, SandboxContext>, (ptr, len): (i32, i32)| {
            Box::new(fs_read(caller, ptr, len))
        },
    )?;
    linker.func_wrap_async(
        name,
        "write",
        |caller: Caller<'_, SandboxContext>, (pptr, plen, dptr, dlen): (i32, i32, i32, i32)| {
            Box::new(fs_write(caller, pptr, plen, dptr, dlen))
        },
    )?;
    linker.func_wrap_async(
        name,
        "remove",
        |caller: Caller<'_, SandboxContext>, (ptr, len): (i32, i32)| {
            Box::new(fs_remove(caller, ptr, len))
        },
    )?;
    Ok(())
}

fn fs_client(caller: &Caller<'_, SandboxContext>) -> wasmtime::Result<Arc<dyn FileSystem>> {
    caller
        .data()
        .bindings()
        .fs()
        .cloned()
        .ok_or_else(|| unbound(CapabilityKind::Fs))
}

async fn fs_read(
    mut caller: Caller<'_, SandboxContext>,
    ptr: i32,
    len: i32,
) -> wasmtime::Result<i32> {
    let path = guest::read_string(&mut caller, ptr, len)?;
    let fs = fs_client(&caller)?;

    match fs.read(&path).await {
        Ok(Some(data)) => Ok(caller.data_mut().set_result(data)),
        Ok(None) => Ok(RESULT_ABSENT),
        Err(e) => Ok(caller.data_mut().set_error(e)),
    }
}

async fn fs_write(
    mut caller: Caller<'_, SandboxContext>,
    pptr: i32,
    plen: i32,
    dptr: i32,
    dlen: i32,
) -> wasmtime::Result<i32> {
    let path = guest::read_string(&mut caller, pptr, plen)?;
    let data = guest::read_bytes(&mut caller, dptr, dlen)?;
    let fs = fs_client(&caller)?;

    match fs.write(&path, &data).await {
        Ok(()) => Ok(WRITE_OK),
        Err(e) => Ok(caller.data_mut().set_error(e)),
    }
}

async fn fs_remove(
    mut caller: Caller<'_, SandboxContext>,
    ptr: i32,
    len: i32,
) -> wasmtime::Result<i32> {
    let path = guest::read_string(&mut caller, ptr, len)?;
    let fs = fs_client(&caller)?;

    match fs.remove(&path).await {
        Ok(()) => Ok(WRITE_OK),
        Err(e) => Ok(caller.data_mut().set_error(e)),
    }
}

fn register_log(linker: &mut Linker<SandboxContext>) -> wasmtime::Result<()> {
    linker.func_wrap(
        CapabilityKind::Log.binding_name(),
        "write",
        |mut caller: Caller<'_, SandboxContext>,
         level: i32,
         ptr: i32,
         len: i32|
         -> wasmtime::Result<()> {
            let bytes = guest::read_bytes(&mut caller, ptr, len)?;
            let message = String::from_utf8_lossy(&bytes);
            let sink: Arc<dyn LogSink> = caller
                .data()
                .bindings()
                .log()
                .cloned()
                .ok_or_else(|| unbound(CapabilityKind::Log))?;
            sink.log(level_from_i32(level), &message);
            Ok(())
        },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lambda_dev_common::EngineConfig;
    use lambda_dev_core::store::create_store;
    use lambda_dev_core::{Bindings, PendingTable, WasmEngine};
    use std::collections::BTreeMap;

    fn linked(
        namespace: &Namespace,
    ) -> (Linker<SandboxContext>, wasmtime::Store<SandboxContext>) {
        let engine = WasmEngine::new(&EngineConfig::default()).unwrap();
        let mut linker = Linker::new(engine.inner());
        HostBindings::new(FetchPolicy::default())
            .unwrap()
            .register(&mut linker, namespace)
            .unwrap();

        let context = SandboxContext::new(BTreeMap::new(), Bindings::none(), PendingTable::new());
        let store = create_store(&engine, context);
        (linker, store)
    }

    #[test]
    fn test_fetch_always_linked() {
        let (linker, mut store) = linked(&Namespace::default());

        assert!(linker.get(&mut store, FETCH, "fetch").is_some());
        assert!(linker.get(&mut store, "kv", "get").is_none());
        assert!(linker.get(&mut store, "log", "write").is_none());
    }

    #[test]
    fn test_bound_capabilities_linked() {
        let namespace = Namespace::new(vec!["kv", "fs"], Vec::new(), Vec::new());
        let (linker, mut store) = linked(&namespace);

        assert!(linker.get(&mut store, "kv", "get").is_some());
        assert!(linker.get(&mut store, "kv", "set").is_some());
        assert!(linker.get(&mut store, "fs", "write").is_some());
        assert!(linker.get(&mut store, "blob", "get").is_none());
    }

    #[test]
    fn test_supported_builtins() {
        let host = HostBindings::new(FetchPolicy::deny_all()).unwrap();
        assert_eq!(host.builtins(), &["clock", "random", "console"]);
        assert_eq!(host.policy().max_requests, Some(0));
    }
}
