//! Core state identifiers and the reload command surface.
//!
//! This module provides:
//! - `ElunaInfo`, the (map, instance) identity of a state and its manager key
//! - `ReloadScope`, what a `reload eluna [arg]` command targets
//! - Parsing of the console command

use crate::error::{ElunaError, Result};

/// Map id used by the world state.
pub const GLOBAL_MAP_ID: u32 = u32::MAX;

/// Reserved command arguments.
pub const RELOAD_CACHE_ONLY: i32 = -3;
pub const RELOAD_ALL_STATES: i32 = -2;
pub const RELOAD_GLOBAL_STATE: i32 = -1;

/// Identity of one state: the world state or a (map, instance) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElunaInfo {
    pub map_id: u32,
    pub instance_id: u32,
}

impl ElunaInfo {
    pub fn global() -> Self {
        Self { map_id: GLOBAL_MAP_ID, instance_id: 0 }
    }

    pub fn map(map_id: u32, instance_id: u32) -> Self {
        Self { map_id, instance_id }
    }

    pub fn is_global(&self) -> bool {
        self.map_id == GLOBAL_MAP_ID
    }

    /// Manager key: map id in the high half, instance id in the low half.
    pub fn key(&self) -> u64 {
        (u64::from(self.map_id) << 32) | u64::from(self.instance_id)
    }

    /// Map id as scripts see it; the world state reports -1.
    pub fn script_map_id(&self) -> i64 {
        if self.is_global() { -1 } else { i64::from(self.map_id) }
    }
}

/// Target of a reload request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadScope {
    /// Recompile the script cache without touching live states.
    CacheOnly,
    /// Recompile and reload every state.
    AllStates,
    /// Recompile and reload only the world state.
    GlobalState,
    /// Recompile and reload the states of one map.
    Map(u32),
}

impl ReloadScope {
    /// Convert the numeric command argument.
    pub fn from_arg(value: i64) -> Option<Self> {
        match value {
            v if v == i64::from(RELOAD_CACHE_ONLY) => Some(Self::CacheOnly),
            v if v == i64::from(RELOAD_ALL_STATES) => Some(Self::AllStates),
            v if v == i64::from(RELOAD_GLOBAL_STATE) => Some(Self::GlobalState),
            v => u32::try_from(v).ok().map(Self::Map),
        }
    }

    pub fn as_arg(&self) -> i64 {
        match self {
            Self::CacheOnly => i64::from(RELOAD_CACHE_ONLY),
            Self::AllStates => i64::from(RELOAD_ALL_STATES),
            Self::GlobalState => i64::from(RELOAD_GLOBAL_STATE),
            Self::Map(id) => i64::from(*id),
        }
    }
}

/// Parse `reload eluna [scope]`. Matching is case insensitive and the scope
/// defaults to all states.
pub fn parse_reload_command(command: &str) -> Result<ReloadScope> {
    let lowered = command.trim().to_lowercase();
    let mut words = lowered.split_whitespace();

    if words.next() != Some("reload") || words.next() != Some("eluna") {
        return Err(ElunaError::NotReloadCommand(command.to_string()));
    }

    let scope = match words.next() {
        None => ReloadScope::AllStates,
        Some(arg) => arg
            .parse::<i64>()
            .ok()
            .and_then(ReloadScope::from_arg)
            .ok_or_else(|| ElunaError::InvalidReloadArgument(arg.to_string()))?,
    };

    if let Some(extra) = words.next() {
        return Err(ElunaError::InvalidReloadArgument(extra.to_string()));
    }

    Ok(scope)
}
