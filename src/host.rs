//! Interface the host game engine implements.
//!
//! The dispatch core never names a concrete engine. Native object types
//! implement `NativeType` (and `WorldEntity` when hooks need their entry or
//! unique id); engine-wide services go through `Host`.

use crate::hooks::RegisterType;
use crate::scripting::TypeRegistry;

/// A native type that can be pushed to scripts as a handle.
pub trait NativeType: 'static {
    /// Name of the script-side method table, e.g. `"Player"`.
    const TYPE_NAME: &'static str;
}

/// A spawned object with a template entry and a persistent unique id.
pub trait WorldEntity: NativeType {
    fn entry(&self) -> u32;
    fn guid(&self) -> u64;
    fn instance_id(&self) -> u32;
}

/// Engine-wide services used by the core.
pub trait Host: Send + Sync + 'static {
    fn core_name(&self) -> &str {
        "Unknown"
    }

    fn core_expansion(&self) -> u32 {
        0
    }

    /// Broadcast a server message, e.g. "Reloading Eluna...".
    fn announce(&self, msg: &str) {
        tracing::info!("[Eluna]: {}", msg);
    }

    /// Whether `entry` names an existing template for `reg_type`
    /// (creature, gameobject or item). Registration fails otherwise.
    fn entry_exists(&self, reg_type: RegisterType, entry: u32) -> bool {
        let _ = (reg_type, entry);
        true
    }

    /// Install the host's method tables. Called for every fresh interpreter,
    /// before any script runs.
    fn register_types(&self, registry: &TypeRegistry<'_>) -> mlua::Result<()> {
        let _ = registry;
        Ok(())
    }
}

/// Host with every default; used by tests and the checking CLI.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHost;

impl Host for NullHost {}
