//! Eluna - Lua hook dispatch for game servers
//!
//! Scripts register callbacks for engine events; the host calls hook
//! functions and the dispatch core runs the matching callbacks, merging
//! their results back into native values.

// ============================================
// Core Modules
// ============================================

/// Scripting configuration
pub mod config;
/// State identity and reload commands
pub mod core;
/// Engine error type
pub mod error;
/// Interface implemented by the host engine
pub mod host;

// ============================================
// Dispatch
// ============================================

/// Binding registries
pub mod binding;
/// Event catalogue and hook call sites
pub mod hooks;
/// Interpreter state, marshalling and dispatch engine
pub mod scripting;

// ============================================
// Lifecycle
// ============================================

/// Script discovery and bytecode cache
pub mod loader;
/// World and map state manager
pub mod mgr;

// ============================================
// FFI Layer (for C/C++ hosts)
// ============================================

/// C-compatible wrapper functions
mod ffi;

pub use crate::core::{ElunaInfo, ReloadScope};
pub use crate::error::{ElunaError, Result};
pub use crate::mgr::ElunaMgr;
pub use crate::scripting::Eluna;
