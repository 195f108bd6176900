//! FFI bindings for the state manager.
//!
//! The C side owns no Rust objects: one manager lives in a process-wide
//! slot between `eluna_mgr_new` and `eluna_mgr_free`.
//!
//! States built here use `NullHost`, so scripts see no host types. The
//! exported hooks are the world events that carry no host objects; hosts
//! that pass objects link the crate from Rust and supply their own `Host`.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_uint};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::ElunaConfig;
use crate::core::ElunaInfo;
use crate::error::ElunaError;
use crate::host::NullHost;
use crate::mgr::ElunaMgr;

static ELUNA_MGR: RwLock<Option<ElunaMgr>> = RwLock::new(None);

/// # Safety
/// `ptr` must be null or a valid null-terminated C string.
unsafe fn c_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: caller guarantees ptr is a valid C string
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Load the configuration and create the manager with its world state.
///
/// A null `config_path` uses the default configuration.
/// Returns 0 on success, 1 when scripting is disabled, -1 on failure.
///
/// # Safety
/// `config_path` must be null or a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn eluna_mgr_new(config_path: *const c_char) -> c_int {
    ffi_catch!(-1, {
        let config = if config_path.is_null() {
            ElunaConfig::default()
        } else {
            // SAFETY: checked non-null, caller guarantees validity
            let Some(path) = (unsafe { c_str(config_path) }) else {
                tracing::error!("[Eluna]: config path is not valid UTF-8");
                return -1;
            };
            match ElunaConfig::from_file(path) {
                Ok(config) => config,
                Err(e) => {
                    tracing::error!("[Eluna]: Error loading config: {:#}", e);
                    return -1;
                }
            }
        };

        match ElunaMgr::new(config, Arc::new(NullHost)) {
            Ok(mgr) => {
                *ELUNA_MGR.write() = Some(mgr);
                0
            }
            Err(ElunaError::Disabled) => 1,
            Err(e) => {
                tracing::error!("[Eluna]: Failed to start: {}", e);
                -1
            }
        }
    })
}

/// Drop the manager and every state.
#[no_mangle]
pub extern "C" fn eluna_mgr_free() {
    ffi_catch!((), {
        ELUNA_MGR.write().take();
    })
}

/// Run every state's safe point.
#[no_mangle]
pub extern "C" fn eluna_mgr_update(diff: c_uint) {
    ffi_catch!((), {
        if let Some(mgr) = ELUNA_MGR.read().as_ref() {
            mgr.update(diff);
        }
    })
}

/// Handle a console command.
///
/// Returns 0 when it was a reload command, 1 when it was not, -1 on a
/// malformed reload argument or a missing manager.
///
/// # Safety
/// `command` must be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn eluna_mgr_reload_command(command: *const c_char) -> c_int {
    ffi_catch!(-1, {
        // SAFETY: caller guarantees validity
        let Some(command) = (unsafe { c_str(command) }) else {
            return -1;
        };
        let guard = ELUNA_MGR.read();
        let Some(mgr) = guard.as_ref() else {
            return -1;
        };
        match mgr.handle_command(command) {
            Ok(_) => 0,
            Err(ElunaError::NotReloadCommand(_)) => 1,
            Err(e) => {
                tracing::error!("[Eluna]: {}", e);
                -1
            }
        }
    })
}

/// Create the state for a map instance.
///
/// Returns 1 when the map has a state, 0 when it runs without one, -1 on
/// failure.
#[no_mangle]
pub extern "C" fn eluna_mgr_create_map_state(map_id: c_uint, instance_id: c_uint) -> c_int {
    ffi_catch!(-1, {
        let guard = ELUNA_MGR.read();
        let Some(mgr) = guard.as_ref() else {
            return -1;
        };
        match mgr.create(ElunaInfo::map(map_id, instance_id)) {
            Ok(Some(_)) => 1,
            Ok(None) => 0,
            Err(e) => {
                tracing::error!("[Eluna]: Failed to create state for map {}: {}", map_id, e);
                -1
            }
        }
    })
}

/// Returns 1 if a state was destroyed.
#[no_mangle]
pub extern "C" fn eluna_mgr_destroy_map_state(map_id: c_uint, instance_id: c_uint) -> c_int {
    ffi_catch!(0, {
        ELUNA_MGR
            .read()
            .as_ref()
            .map_or(0, |mgr| c_int::from(mgr.destroy(ElunaInfo::map(map_id, instance_id))))
    })
}

fn with_world(f: impl FnOnce(&crate::Eluna)) {
    if let Some(world) = ELUNA_MGR.read().as_ref().and_then(ElunaMgr::world) {
        f(&world);
    }
}

/// Fire the world startup hook.
#[no_mangle]
pub extern "C" fn eluna_mgr_on_startup() {
    ffi_catch!((), with_world(|world| world.on_startup()))
}

/// Fire the world shutdown hook.
#[no_mangle]
pub extern "C" fn eluna_mgr_on_shutdown() {
    ffi_catch!((), with_world(|world| world.on_shutdown()))
}

/// Fire the config load hook; `reload` is non-zero for a config reload.
#[no_mangle]
pub extern "C" fn eluna_mgr_on_config_load(reload: c_int) {
    ffi_catch!((), with_world(|world| world.on_config_load(reload != 0)))
}
