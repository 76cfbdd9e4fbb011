//! Access to guest linear memory from host functions.
//!
//! Every pointer the guest passes is an `i32` offset into its exported
//! `memory`. Out-of-range accesses trap the guest.

use wasmtime::{Caller, Extern, Memory};

/// Look up the calling instance's exported memory.
pub fn memory<T>(caller: &mut Caller<'_, T>) -> wasmtime::Result<Memory> {
    caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .ok_or_else(|| wasmtime::Error::msg("guest module does not export `memory`"))
}

/// Copy `len` bytes starting at `ptr` out of guest memory.
pub fn read_bytes<T>(caller: &mut Caller<'_, T>, ptr: i32, len: i32) -> wasmtime::Result<Vec<u8>> {
    let (offset, len) = span(ptr, len)?;
    let memory = memory(caller)?;
    if !fits(offset, len, memory.data_size(&*caller)) {
        return Err(out_of_bounds(ptr, len));
    }
    let mut buf = vec![0u8; len];
    memory
        .read(&*caller, offset, &mut buf)
        .map_err(|_| out_of_bounds(ptr, len))?;
    Ok(buf)
}

/// Read a UTF-8 string from guest memory.
pub fn read_string<T>(caller: &mut Caller<'_, T>, ptr: i32, len: i32) -> wasmtime::Result<String> {
    let bytes = read_bytes(caller, ptr, len)?;
    String::from_utf8(bytes).map_err(|_| wasmtime::Error::msg("guest string is not valid UTF-8"))
}

/// Copy `data` into guest memory at `ptr`.
pub fn write_bytes<T>(caller: &mut Caller<'_, T>, ptr: i32, data: &[u8]) -> wasmtime::Result<()> {
    let len = i32::try_from(data.len()).map_err(|_| wasmtime::Error::msg("result too large"))?;
    let (offset, _) = span(ptr, len)?;
    let memory = memory(caller)?;
    memory
        .write(&mut *caller, offset, data)
        .map_err(|_| out_of_bounds(ptr, data.len()))
}

#[allow(clippy::cast_sign_loss)]
fn span(ptr: i32, len: i32) -> wasmtime::Result<(usize, usize)> {
    if ptr < 0 || len < 0 {
        return Err(wasmtime::Error::msg(format!(
            "negative pointer or length (ptr={ptr}, len={len})"
        )));
    }
    Ok((ptr as usize, len as usize))
}

fn fits(offset: usize, len: usize, size: usize) -> bool {
    offset.checked_add(len).is_some_and(|end| end <= size)
}

fn out_of_bounds(ptr: i32, len: usize) -> wasmtime::Error {
    wasmtime::Error::msg(format!(
        "memory access out of bounds (ptr={ptr}, len={len})"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_rejects_negative_values() {
        assert!(span(-1, 4).is_err());
        assert!(span(0, -4).is_err());
        assert_eq!(span(8, 4).unwrap(), (8, 4));
    }

    #[test]
    fn test_fits_checks_memory_size() {
        assert!(fits(0, 65_536, 65_536));
        assert!(fits(65_535, 1, 65_536));
        assert!(!fits(65_535, 2, 65_536));
        assert!(!fits(0, 0x7fff_ffff, 65_536));
        assert!(!fits(usize::MAX, 1, usize::MAX));
    }
}
