//! FFI (Foreign Function Interface) layer
//!
//! C-compatible entry points so a C or C++ game server can drive the
//! scripting engine without linking against Rust types.

/// Catch any Rust panic at the FFI boundary and return `$default` instead.
/// Panics must not unwind across `extern "C"`.
macro_rules! ffi_catch {
    ($default:expr, $body:expr) => {
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| $body)) {
            Ok(v) => v,
            Err(_) => $default,
        }
    };
}

pub mod eluna;
