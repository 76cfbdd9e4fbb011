//! Bindings every sandbox gets: `edge`, `env` and `response`.
//!
//! # Memory Protocol
//!
//! Strings are passed as `(ptr, len)` pairs into the guest's exported
//! `memory`. Functions returning data place it in the store's result buffer
//! and return its length; the guest copies it out with `edge.read_result`.

use serde_json::Value;
use tracing::{debug, warn};
use wasmtime::{Caller, Linker};

use lambda_dev_common::LambdaError;

use crate::guest;
use crate::invocation::Outcome;
use crate::registry::RegistrationError;
use crate::response::ResponseDescriptor;
use crate::store::{RESULT_ABSENT, SandboxContext};

/// Namespace of the event and invocation primitives.
pub const EDGE: &str = "edge";

/// Namespace of the environment snapshot.
pub const ENV: &str = "env";

/// Namespace of the response helpers.
pub const RESPONSE: &str = "response";

/// `add_event_listener` return codes.
const LISTENER_OK: i32 = 0;
const LISTENER_UNKNOWN_EXPORT: i32 = -1;
const LISTENER_CLOSED: i32 = -2;

/// `respond_with` return codes.
const RESPOND_DELIVERED: i32 = 0;
const RESPOND_IGNORED: i32 = 1;

/// Register the intrinsic namespaces on `linker`.
///
/// # Errors
///
/// Returns an error if function registration fails.
pub fn register(linker: &mut Linker<SandboxContext>) -> Result<(), LambdaError> {
    register_edge(linker).map_err(|e| link_error(EDGE, &e))?;
    register_env(linker).map_err(|e| link_error(ENV, &e))?;
    register_response(linker).map_err(|e| link_error(RESPONSE, &e))?;
    Ok(())
}

fn link_error(namespace: &str, e: &wasmtime::Error) -> LambdaError {
    LambdaError::config(format!("Failed to register '{namespace}' bindings: {e}"))
}

fn register_edge(linker: &mut Linker<SandboxContext>) -> wasmtime::Result<()> {
    linker.func_wrap(
        EDGE,
        "add_event_listener",
        |mut caller: Caller<'_, SandboxContext>,
         name_ptr: i32,
         name_len: i32,
         export_ptr: i32,
         export_len: i32|
         -> wasmtime::Result<i32> {
            let event = guest::read_string(&mut caller, name_ptr, name_len)?;
            let export = guest::read_string(&mut caller, export_ptr, export_len)?;

            if caller.data().registry().is_sealed() {
                warn!(event = %event, "Listener registered after the top level finished");
                return Ok(LISTENER_CLOSED);
            }

            if caller.get_export(&export).and_then(|e| e.into_func()).is_none() {
                warn!(event = %event, export = %export, "Listener export not found");
                return Ok(LISTENER_UNKNOWN_EXPORT);
            }

            match caller.data_mut().registry_mut().register(&event, &export) {
                Ok(()) => {
                    debug!(event = %event, export = %export, "Listener registered");
                    Ok(LISTENER_OK)
                }
                Err(RegistrationError::Closed) => Ok(LISTENER_CLOSED),
            }
        },
    )?;

    linker.func_wrap(
        EDGE,
        "respond_with",
        |mut caller: Caller<'_, SandboxContext>,
         invocation: i64,
         ptr: i32,
         len: i32|
         -> wasmtime::Result<i32> {
            let bytes = guest::read_bytes(&mut caller, ptr, len)?;
            let outcome = match serde_json::from_slice::<ResponseDescriptor>(&bytes) {
                Ok(descriptor) => Outcome::Completed(descriptor),
                Err(e) => Outcome::Failed(format!("invalid response descriptor: {e}")),
            };
            Ok(deliver(&caller, invocation, outcome))
        },
    )?;

    linker.func_wrap(
        EDGE,
        "emit_error",
        |mut caller: Caller<'_, SandboxContext>,
         invocation: i64,
         ptr: i32,
         len: i32|
         -> wasmtime::Result<()> {
            let bytes = guest::read_bytes(&mut caller, ptr, len)?;
            let message = String::from_utf8_lossy(&bytes);
            let failed = caller
                .data()
                .pending()
                .fail(invocation_id(invocation), &message);
            warn!(invocation, failed, message = %message, "Function emitted an error");
            Ok(())
        },
    )?;

    linker.func_wrap(
        EDGE,
        "context_read",
        |mut caller: Caller<'_, SandboxContext>,
         invocation: i64,
         ptr: i32,
         cap: i32|
         -> wasmtime::Result<i32> {
            let Some(context) = caller.data().context(invocation_id(invocation)) else {
                return Ok(RESULT_ABSENT);
            };
            let context = context.to_vec();
            let cap = usize::try_from(cap).unwrap_or(0);
            let copied = context.len().min(cap);
            guest::write_bytes(&mut caller, ptr, &context[..copied])?;
            Ok(i32::try_from(context.len()).unwrap_or(i32::MAX))
        },
    )?;

    linker.func_wrap(
        EDGE,
        "read_result",
        |mut caller: Caller<'_, SandboxContext>, ptr: i32| -> wasmtime::Result<i32> {
            let result = caller.data().result().to_vec();
            guest::write_bytes(&mut caller, ptr, &result)?;
            Ok(i32::try_from(result.len()).unwrap_or(i32::MAX))
        },
    )?;

    Ok(())
}

fn register_env(linker: &mut Linker<SandboxContext>) -> wasmtime::Result<()> {
    linker.func_wrap(
        ENV,
        "get",
        |mut caller: Caller<'_, SandboxContext>, ptr: i32, len: i32| -> wasmtime::Result<i32> {
            let key = guest::read_string(&mut caller, ptr, len)?;
            let value = caller.data().env().get(&key).cloned();
            Ok(match value {
                Some(value) => caller.data_mut().set_result(value.into_bytes()),
                None => RESULT_ABSENT,
            })
        },
    )?;
    Ok(())
}

fn register_response(linker: &mut Linker<SandboxContext>) -> wasmtime::Result<()> {
    linker.func_wrap(
        RESPONSE,
        "text",
        |mut caller: Caller<'_, SandboxContext>,
         invocation: i64,
         status: i32,
         ptr: i32,
         len: i32|
         -> wasmtime::Result<i32> {
            let body = guest::read_string(&mut caller, ptr, len)?;
            let descriptor = ResponseDescriptor::text(status_code(status), body);
            Ok(deliver(&caller, invocation, Outcome::Completed(descriptor)))
        },
    )?;

    linker.func_wrap(
        RESPONSE,
        "json",
        |mut caller: Caller<'_, SandboxContext>,
         invocation: i64,
         status: i32,
         ptr: i32,
         len: i32|
         -> wasmtime::Result<i32> {
            let bytes = guest::read_bytes(&mut caller, ptr, len)?;
            let outcome = match serde_json::from_slice::<Value>(&bytes) {
                Ok(body) => Outcome::Completed(ResponseDescriptor::json(status_code(status), body)),
                Err(e) => Outcome::Failed(format!("invalid JSON body: {e}")),
            };
            Ok(deliver(&caller, invocation, outcome))
        },
    )?;

    linker.func_wrap(
        RESPONSE,
        "redirect",
        |mut caller: Caller<'_, SandboxContext>,
         invocation: i64,
         status: i32,
         ptr: i32,
         len: i32|
         -> wasmtime::Result<i32> {
            let location = guest::read_string(&mut caller, ptr, len)?;
            let descriptor = ResponseDescriptor::redirect(status_code(status), location);
            Ok(deliver(&caller, invocation, Outcome::Completed(descriptor)))
        },
    )?;

    Ok(())
}

fn deliver(caller: &Caller<'_, SandboxContext>, invocation: i64, outcome: Outcome) -> i32 {
    let id = invocation_id(invocation);
    if caller.data().pending().complete(id, outcome) {
        RESPOND_DELIVERED
    } else {
        debug!(invocation = id, "Response for a finished invocation ignored");
        RESPOND_IGNORED
    }
}

/// Guest ids are `i64`; negative values never match a real invocation.
#[allow(clippy::cast_sign_loss)]
fn invocation_id(raw: i64) -> u64 {
    if raw < 0 { u64::MAX } else { raw as u64 }
}

/// Zero or anything outside the HTTP range means "not set".
fn status_code(raw: i32) -> Option<u16> {
    u16::try_from(raw)
        .ok()
        .filter(|status| (100..=999).contains(status))
}
