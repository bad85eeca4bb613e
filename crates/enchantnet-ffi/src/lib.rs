//! # enchantnet-ffi
//!
//! C ABI over [`enchantnet_core`], declared in `include/enchantnet.h`.
//!
//! Conventions shared by every export:
//!
//! - Integer-returning calls return `-1` on failure and a non-negative value
//!   on success. The failure message is stored per thread and read with
//!   [`get_error_msg`].
//! - Every string handed out is owned by the caller and must be released
//!   with [`free_string`] exactly once.
//! - A panic never unwinds into the host; it is reported as a failure.

mod bridge;
mod error;
mod error_slot;
mod ffi_string;

pub use bridge::{BridgeConfig, DEFAULT_LOG_FILTER, DEFAULT_WORKER_THREADS};
pub use error::BridgeError;
pub use ffi_string::OwnedCString;

use enchantnet_core::{CoreError, InstanceName, TunnelHandle};
use std::any::Any;
use std::ffi::{c_char, c_int, CStr};
use std::panic::{self, AssertUnwindSafe};

/// One flattened status attribute. Both strings are owned by the caller.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct KeyValuePair {
    pub key: *const c_char,
    pub value: *const c_char,
}

impl Default for KeyValuePair {
    fn default() -> Self {
        Self {
            key: std::ptr::null(),
            value: std::ptr::null(),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run an export body, mapping errors and panics to `-1`.
fn guarded<F>(op: &'static str, body: F) -> c_int
where
    F: FnOnce() -> Result<c_int, BridgeError>,
{
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(code)) => code,
        Ok(Err(e)) => {
            tracing::warn!(op, error = %e, "Call failed");
            error_slot::set_last_error(e.to_string());
            -1
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(op, panic = %message, "Call panicked");
            error_slot::set_last_error(format!("internal panic: {message}"));
            -1
        }
    }
}

/// Borrow a C string as `&str`.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string that outlives `'a`.
unsafe fn read_str<'a>(ptr: *const c_char, arg: &'static str) -> Result<&'a str, BridgeError> {
    if ptr.is_null() {
        return Err(BridgeError::NullArgument(arg));
    }
    // SAFETY: non-null and NUL-terminated per the caller contract.
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| BridgeError::InvalidUtf8(arg))
}

/// Validate a TOML configuration without starting anything.
///
/// Returns `0` when the configuration is valid, `-1` otherwise.
///
/// # Safety
///
/// `cfg_str` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn parse_config(cfg_str: *const c_char) -> c_int {
    guarded("parse_config", || {
        // SAFETY: forwarded caller contract.
        let blob = unsafe { read_str(cfg_str, "cfg_str") }?;
        enchantnet_core::parse(blob).map_err(CoreError::from)?;
        Ok(0)
    })
}

/// Parse a configuration and start an instance under its name.
///
/// # Safety
///
/// `cfg_str` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn run_network_instance(cfg_str: *const c_char) -> c_int {
    guarded("run_network_instance", || {
        // SAFETY: forwarded caller contract.
        let blob = unsafe { read_str(cfg_str, "cfg_str") }?;
        let bridge = bridge::global()?;
        let name = bridge.block_on(bridge.manager().run(blob))?;
        tracing::debug!(instance = %name, "Instance started over FFI");
        Ok(0)
    })
}

/// Bind a tunnel file descriptor to a running instance.
///
/// The descriptor is only recorded; it is neither duplicated nor closed.
///
/// # Safety
///
/// `inst_name` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn set_tun_fd(inst_name: *const c_char, fd: c_int) -> c_int {
    guarded("set_tun_fd", || {
        // SAFETY: forwarded caller contract.
        let name = unsafe { read_str(inst_name, "inst_name") }?;
        let name = InstanceName::new(name).map_err(CoreError::from)?;
        let handle = TunnelHandle::new(fd).map_err(CoreError::from)?;

        let bridge = bridge::global()?;
        bridge
            .block_on(bridge.manager().bind_tunnel(&name, handle))
            .map_err(CoreError::from)?;
        Ok(0)
    })
}

/// Stop and remove every instance whose name is not in `inst_names`.
///
/// A null array is accepted only when `length` is zero, which stops
/// everything.
///
/// # Safety
///
/// When `length > 0`, `inst_names` must point to `length` pointers, each a
/// valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn retain_network_instance(
    inst_names: *const *const c_char,
    length: usize,
) -> c_int {
    guarded("retain_network_instance", || {
        let mut names = Vec::with_capacity(length);
        if length > 0 {
            if inst_names.is_null() {
                return Err(BridgeError::NullArgument("inst_names"));
            }
            // SAFETY: `length` readable pointers per the caller contract.
            let ptrs = unsafe { std::slice::from_raw_parts(inst_names, length) };
            for &ptr in ptrs {
                // SAFETY: each element is a valid string per the caller contract.
                names.push(unsafe { read_str(ptr, "inst_names[]") }?);
            }
        }

        let bridge = bridge::global()?;
        let removed = bridge
            .block_on(bridge.manager().retain(names))
            .map_err(CoreError::from)?;
        tracing::debug!(removed, "Retain completed over FFI");
        Ok(0)
    })
}

/// Fill `infos` with up to `max_length` flattened status records.
///
/// Returns the number of records written. Each written key and value must be
/// released with [`free_string`].
///
/// # Safety
///
/// When `max_length > 0`, `infos` must point to writable storage for
/// `max_length` [`KeyValuePair`]s.
#[no_mangle]
pub unsafe extern "C" fn collect_network_infos(
    infos: *mut KeyValuePair,
    max_length: usize,
) -> c_int {
    guarded("collect_network_infos", || {
        if max_length == 0 {
            return Ok(0);
        }
        if infos.is_null() {
            return Err(BridgeError::NullArgument("infos"));
        }

        let capacity = max_length.min(c_int::MAX as usize);
        let bridge = bridge::global()?;
        let records = bridge.block_on(bridge.manager().collect(capacity));

        for (i, record) in records.iter().enumerate() {
            let pair = KeyValuePair {
                key: OwnedCString::new(&record.key).into_raw(),
                value: OwnedCString::new(&record.value).into_raw(),
            };
            // SAFETY: `i < capacity <= max_length` slots are writable.
            unsafe { infos.add(i).write(pair) };
        }
        Ok(records.len() as c_int)
    })
}

/// Take the last error message of the calling thread.
///
/// Writes null when no message is pending. A non-null result must be released
/// with [`free_string`].
///
/// # Safety
///
/// `out` must be null or point to writable storage for one pointer.
#[no_mangle]
pub unsafe extern "C" fn get_error_msg(out: *mut *const c_char) {
    if out.is_null() {
        return;
    }
    let message = panic::catch_unwind(error_slot::take_last_error).unwrap_or_default();
    let raw = message.map_or(std::ptr::null(), |m| OwnedCString::new(&m).into_raw());
    // SAFETY: non-null and writable per the caller contract.
    unsafe { out.write(raw) };
}

/// Release a string returned by this library. Null is ignored.
///
/// # Safety
///
/// `s` must be null or a pointer returned by this library that has not been
/// released yet.
#[no_mangle]
pub unsafe extern "C" fn free_string(s: *const c_char) {
    if s.is_null() {
        return;
    }
    // SAFETY: produced by `OwnedCString::into_raw` per the caller contract.
    drop(unsafe { OwnedCString::from_raw(s) });
}
