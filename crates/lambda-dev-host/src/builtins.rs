//! Built-in facilities a bundle may opt into with `allowBuiltin` /
//! `allowedBuiltin`.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;
use tracing::info;
use wasmtime::{Caller, Linker};

use lambda_dev_core::{Namespace, SandboxContext, guest};

/// Wall clock: `clock.now_ms() -> i64`.
pub const CLOCK: &str = "clock";

/// Randomness: `random.fill(ptr, len)`.
pub const RANDOM: &str = "random";

/// Console output: `console.log(ptr, len)`.
pub const CONSOLE: &str = "console";

/// Every built-in this host provides.
pub const SUPPORTED: [&str; 3] = [CLOCK, RANDOM, CONSOLE];

/// Register the built-ins `namespace` allows.
///
/// # Errors
///
/// Returns an error if function registration fails.
pub fn register(
    linker: &mut Linker<SandboxContext>,
    namespace: &Namespace,
) -> wasmtime::Result<()> {
    if namespace.allows_builtin(CLOCK) {
        linker.func_wrap(CLOCK, "now_ms", |_: Caller<'_, SandboxContext>| -> i64 {
            now_ms()
        })?;
    }

    if namespace.allows_builtin(RANDOM) {
        linker.func_wrap(
            RANDOM,
            "fill",
            |mut caller: Caller<'_, SandboxContext>, ptr: i32, len: i32| -> wasmtime::Result<()> {
                let len = usize::try_from(len)
                    .map_err(|_| wasmtime::Error::msg("negative length"))?;
                let mut buf = vec![0u8; len];
                rand::thread_rng().fill_bytes(&mut buf);
                guest::write_bytes(&mut caller, ptr, &buf)
            },
        )?;
    }

    if namespace.allows_builtin(CONSOLE) {
        linker.func_wrap(
            CONSOLE,
            "log",
            |mut caller: Caller<'_, SandboxContext>, ptr: i32, len: i32| -> wasmtime::Result<()> {
                let bytes = guest::read_bytes(&mut caller, ptr, len)?;
                info!(guest_log = true, "{}", String::from_utf8_lossy(&bytes));
                Ok(())
            },
        )?;
    }

    Ok(())
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
