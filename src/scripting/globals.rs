//! Global functions: event registration, state queries and logging.
//!
//! Every `Register*Event` returns a cancel function that removes exactly the
//! binding it created. Registration runs in the calling state only.

use mlua::{Function, Value};

use super::template::{ElunaGlobal, MethodCall, TypeRegistry};
use crate::binding::{BindingMap, Bindings, EntryKey, EventKey, UniqueObjectKey};
use crate::error::ElunaError;
use crate::hooks::{HookEvent, RegisterType};

// ---------------------------------------------------------------------------
// Registration helpers
// ---------------------------------------------------------------------------

fn event_arg<E: HookEvent>(call: &MethodCall<'_>, narg: usize, reg_type: RegisterType, id: u32) -> mlua::Result<E> {
    let event: u32 = call.check(narg)?;
    E::from_id(event)
        .ok_or_else(|| ElunaError::UnknownEvent { reg_type: reg_type.id(), id, event }.into())
}

/// Store `function`, push the cancel function for it.
fn bind<K: crate::binding::BindingKey>(
    call: &mut MethodCall<'_>,
    map: fn(&Bindings) -> &BindingMap<K>,
    reg_type: RegisterType,
    key: K,
    function: Function,
    shots: u32,
) -> mlua::Result<usize> {
    let lua = call.lua();
    let ctx = call.context()?;
    let id = map(&ctx.bindings).insert(key, lua.create_registry_value(function)?, shots);

    let cancel = lua.create_function(move |lua, ()| {
        super::context(lua)?.bindings.remove(reg_type, id);
        Ok(())
    })?;
    Ok(call.push(cancel))
}

/// `RegisterXEvent(event, function[, shots])`
fn register_by_event<E: HookEvent>(
    call: &mut MethodCall<'_>,
    reg_type: RegisterType,
    map: fn(&Bindings) -> &BindingMap<EventKey<E>>,
) -> mlua::Result<usize> {
    let event = event_arg::<E>(call, 1, reg_type, 0)?;
    let function: Function = call.check(2)?;
    let shots: u32 = call.check_or(3, 0)?;
    bind(call, map, reg_type, EventKey::new(event), function, shots)
}

/// `RegisterXEvent(entry, event, function[, shots])`
fn register_by_entry<E: HookEvent>(
    call: &mut MethodCall<'_>,
    reg_type: RegisterType,
    map: fn(&Bindings) -> &BindingMap<EntryKey<E>>,
) -> mlua::Result<usize> {
    let entry: u32 = call.check(1)?;
    let event = event_arg::<E>(call, 2, reg_type, entry)?;
    let function: Function = call.check(3)?;
    let shots: u32 = call.check_or(4, 0)?;

    if !call.context()?.host.entry_exists(reg_type, entry) {
        return Err(ElunaError::UnknownEntry { kind: reg_type.entry_kind(), entry }.into());
    }
    bind(call, map, reg_type, EntryKey::new(event, entry), function, shots)
}

/// `RegisterUniqueXEvent(guid, instanceId, event, function[, shots])`
fn register_by_unique<E: HookEvent>(
    call: &mut MethodCall<'_>,
    reg_type: RegisterType,
    map: fn(&Bindings) -> &BindingMap<UniqueObjectKey<E>>,
) -> mlua::Result<usize> {
    let guid: u64 = call.check(1)?;
    let instance_id: u32 = call.check(2)?;
    let event = event_arg::<E>(call, 3, reg_type, instance_id)?;
    let function: Function = call.check(4)?;
    let shots: u32 = call.check_or(5, 0)?;
    bind(call, map, reg_type, UniqueObjectKey::new(event, guid, instance_id), function, shots)
}

/// `ClearXEvents([event])`
fn clear_by_event<E: HookEvent>(
    call: &mut MethodCall<'_>,
    map: fn(&Bindings) -> &BindingMap<EventKey<E>>,
) -> mlua::Result<usize> {
    let ctx = call.context()?;
    let registry = map(&ctx.bindings);
    match call.arg(1) {
        Value::Nil => registry.clear(),
        _ => {
            let event: u32 = call.check(1)?;
            if let Some(event) = E::from_id(event) {
                registry.clear_key(&EventKey::new(event));
            }
        }
    }
    Ok(0)
}

/// `ClearXEvents(entry[, event])`
fn clear_by_entry<E: HookEvent>(
    call: &mut MethodCall<'_>,
    map: fn(&Bindings) -> &BindingMap<EntryKey<E>>,
) -> mlua::Result<usize> {
    let ctx = call.context()?;
    let registry = map(&ctx.bindings);
    let entry: u32 = call.check(1)?;
    match call.arg(2) {
        Value::Nil => registry.clear_where(|key| key.entry == entry),
        _ => {
            let event: u32 = call.check(2)?;
            if let Some(event) = E::from_id(event) {
                registry.clear_key(&EntryKey::new(event, entry));
            }
        }
    }
    Ok(0)
}

/// `ClearUniqueXEvents(guid, instanceId[, event])`
fn clear_by_unique<E: HookEvent>(
    call: &mut MethodCall<'_>,
    map: fn(&Bindings) -> &BindingMap<UniqueObjectKey<E>>,
) -> mlua::Result<usize> {
    let ctx = call.context()?;
    let registry = map(&ctx.bindings);
    let guid: u64 = call.check(1)?;
    let instance_id: u32 = call.check(2)?;
    match call.arg(3) {
        Value::Nil => registry.clear_where(|key| key.guid == guid && key.instance_id == instance_id),
        _ => {
            let event: u32 = call.check(3)?;
            if let Some(event) = E::from_id(event) {
                registry.clear_key(&UniqueObjectKey::new(event, guid, instance_id));
            }
        }
    }
    Ok(0)
}

macro_rules! by_event {
    ($($register:ident, $clear:ident => $field:ident, $reg_type:ident;)*) => {$(
        fn $register(call: &mut MethodCall<'_>) -> mlua::Result<usize> {
            register_by_event(call, RegisterType::$reg_type, |b| &b.$field)
        }

        fn $clear(call: &mut MethodCall<'_>) -> mlua::Result<usize> {
            clear_by_event(call, |b| &b.$field)
        }
    )*};
}

macro_rules! by_entry {
    ($($register:ident, $clear:ident => $field:ident, $reg_type:ident;)*) => {$(
        fn $register(call: &mut MethodCall<'_>) -> mlua::Result<usize> {
            register_by_entry(call, RegisterType::$reg_type, |b| &b.$field)
        }

        fn $clear(call: &mut MethodCall<'_>) -> mlua::Result<usize> {
            clear_by_entry(call, |b| &b.$field)
        }
    )*};
}

by_event! {
    register_server_event, clear_server_events => server, Server;
    register_player_event, clear_player_events => player, Player;
    register_guild_event, clear_guild_events => guild, Guild;
    register_group_event, clear_group_events => group, Group;
    register_vehicle_event, clear_vehicle_events => vehicle, Vehicle;
    register_bg_event, clear_bg_events => bg, Bg;
}

by_entry! {
    register_packet_event, clear_packet_events => packet, Packet;
    register_creature_event, clear_creature_events => creature, Creature;
    register_creature_gossip_event, clear_creature_gossip_events => creature_gossip, CreatureGossip;
    register_gameobject_event, clear_gameobject_events => gameobject, GameObject;
    register_gameobject_gossip_event, clear_gameobject_gossip_events => gameobject_gossip, GameObjectGossip;
    register_spell_event, clear_spell_events => spell, Spell;
    register_item_event, clear_item_events => item, Item;
    register_item_gossip_event, clear_item_gossip_events => item_gossip, ItemGossip;
    register_player_gossip_event, clear_player_gossip_events => player_gossip, PlayerGossip;
    register_map_event, clear_map_events => map, Map;
    register_instance_event, clear_instance_events => instance, Instance;
}

fn register_unique_creature_event(call: &mut MethodCall<'_>) -> mlua::Result<usize> {
    register_by_unique(call, RegisterType::CreatureUnique, |b| &b.creature_unique)
}

fn clear_unique_creature_events(call: &mut MethodCall<'_>) -> mlua::Result<usize> {
    clear_by_unique(call, |b| &b.creature_unique)
}

// ---------------------------------------------------------------------------
// State queries
// ---------------------------------------------------------------------------

fn get_state_map_id(call: &mut MethodCall<'_>) -> mlua::Result<usize> {
    let map_id = call.context()?.info.script_map_id();
    Ok(call.push(i32::try_from(map_id).unwrap_or(-1)))
}

fn get_state_instance_id(call: &mut MethodCall<'_>) -> mlua::Result<usize> {
    let instance_id = call.context()?.info.instance_id;
    Ok(call.push(instance_id))
}

fn is_compatibility_mode(call: &mut MethodCall<'_>) -> mlua::Result<usize> {
    let compat = call.context()?.config.compatibility_mode;
    Ok(call.push(compat))
}

fn get_core_name(call: &mut MethodCall<'_>) -> mlua::Result<usize> {
    let name = call.context()?.host.core_name().to_string();
    Ok(call.push(name))
}

fn get_core_expansion(call: &mut MethodCall<'_>) -> mlua::Result<usize> {
    let expansion = call.context()?.host.core_expansion();
    Ok(call.push(expansion))
}

fn get_lua_engine(call: &mut MethodCall<'_>) -> mlua::Result<usize> {
    Ok(call.push("LuaJIT"))
}

/// Ask for this state to be rebuilt at its next safe point.
fn reload_eluna(call: &mut MethodCall<'_>) -> mlua::Result<usize> {
    let ctx = call.context()?;
    ctx.host.announce("Reloading Eluna...");
    ctx.request_reload();
    Ok(0)
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

fn joined_args(call: &MethodCall<'_>) -> mlua::Result<String> {
    let tostring: Function = call.lua().globals().get("tostring")?;
    let mut parts = Vec::with_capacity(call.arg_count());
    for narg in 1..=call.arg_count() {
        parts.push(tostring.call::<String>(call.arg(narg))?);
    }
    Ok(parts.join("\t"))
}

fn print_info(call: &mut MethodCall<'_>) -> mlua::Result<usize> {
    tracing::info!("[Eluna]: {}", joined_args(call)?);
    Ok(0)
}

fn print_error(call: &mut MethodCall<'_>) -> mlua::Result<usize> {
    tracing::error!("[Eluna]: {}", joined_args(call)?);
    Ok(0)
}

fn print_debug(call: &mut MethodCall<'_>) -> mlua::Result<usize> {
    tracing::debug!("[Eluna]: {}", joined_args(call)?);
    Ok(0)
}

// Guild, group, packet and battleground events are driven by the world
// thread; per-object and per-map events by the map threads.
const GLOBALS: &[ElunaGlobal] = &[
    ElunaGlobal::new("RegisterServerEvent", register_server_event),
    ElunaGlobal::new("RegisterPlayerEvent", register_player_event),
    ElunaGlobal::world("RegisterGuildEvent", register_guild_event),
    ElunaGlobal::world("RegisterGroupEvent", register_group_event),
    ElunaGlobal::new("RegisterVehicleEvent", register_vehicle_event),
    ElunaGlobal::world("RegisterBGEvent", register_bg_event),
    ElunaGlobal::world("RegisterPacketEvent", register_packet_event),
    ElunaGlobal::map("RegisterCreatureEvent", register_creature_event),
    ElunaGlobal::map("RegisterUniqueCreatureEvent", register_unique_creature_event),
    ElunaGlobal::map("RegisterCreatureGossipEvent", register_creature_gossip_event),
    ElunaGlobal::map("RegisterGameObjectEvent", register_gameobject_event),
    ElunaGlobal::map("RegisterGameObjectGossipEvent", register_gameobject_gossip_event),
    ElunaGlobal::map("RegisterSpellEvent", register_spell_event),
    ElunaGlobal::new("RegisterItemEvent", register_item_event),
    ElunaGlobal::new("RegisterItemGossipEvent", register_item_gossip_event),
    ElunaGlobal::new("RegisterPlayerGossipEvent", register_player_gossip_event),
    ElunaGlobal::map("RegisterMapEvent", register_map_event),
    ElunaGlobal::map("RegisterInstanceEvent", register_instance_event),
    ElunaGlobal::new("ClearServerEvents", clear_server_events),
    ElunaGlobal::new("ClearPlayerEvents", clear_player_events),
    ElunaGlobal::world("ClearGuildEvents", clear_guild_events),
    ElunaGlobal::world("ClearGroupEvents", clear_group_events),
    ElunaGlobal::new("ClearVehicleEvents", clear_vehicle_events),
    ElunaGlobal::world("ClearBGEvents", clear_bg_events),
    ElunaGlobal::world("ClearPacketEvents", clear_packet_events),
    ElunaGlobal::map("ClearCreatureEvents", clear_creature_events),
    ElunaGlobal::map("ClearUniqueCreatureEvents", clear_unique_creature_events),
    ElunaGlobal::map("ClearCreatureGossipEvents", clear_creature_gossip_events),
    ElunaGlobal::map("ClearGameObjectEvents", clear_gameobject_events),
    ElunaGlobal::map("ClearGameObjectGossipEvents", clear_gameobject_gossip_events),
    ElunaGlobal::map("ClearSpellEvents", clear_spell_events),
    ElunaGlobal::new("ClearItemEvents", clear_item_events),
    ElunaGlobal::new("ClearItemGossipEvents", clear_item_gossip_events),
    ElunaGlobal::new("ClearPlayerGossipEvents", clear_player_gossip_events),
    ElunaGlobal::map("ClearMapEvents", clear_map_events),
    ElunaGlobal::map("ClearInstanceEvents", clear_instance_events),
    ElunaGlobal::new("GetStateMapId", get_state_map_id),
    ElunaGlobal::new("GetStateInstanceId", get_state_instance_id),
    ElunaGlobal::new("IsCompatibilityMode", is_compatibility_mode),
    ElunaGlobal::new("GetCoreName", get_core_name),
    ElunaGlobal::new("GetCoreExpansion", get_core_expansion),
    ElunaGlobal::new("GetLuaEngine", get_lua_engine),
    ElunaGlobal::new("ReloadEluna", reload_eluna),
    ElunaGlobal::new("PrintInfo", print_info),
    ElunaGlobal::new("PrintError", print_error),
    ElunaGlobal::new("PrintDebug", print_debug),
];

pub(crate) fn register(registry: &TypeRegistry<'_>) -> mlua::Result<()> {
    registry.register_globals(GLOBALS)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::binding::EventKey;
    use crate::config::ElunaConfig;
    use crate::core::ElunaInfo;
    use crate::hooks::{CreatureEvents, PlayerEvents};
    use crate::host::NullHost;
    use crate::loader::ElunaLoader;
    use crate::scripting::Eluna;

    fn state(info: ElunaInfo, compat: bool) -> Eluna {
        let config = Arc::new(ElunaConfig { compatibility_mode: compat, ..ElunaConfig::default() });
        let loader = ElunaLoader::new(Arc::clone(&config));
        Eluna::new(info, config, loader, Arc::new(NullHost)).unwrap()
    }

    #[test]
    fn test_register_and_cancel() {
        let eluna = state(ElunaInfo::global(), false);
        eluna
            .run_string("cancel = RegisterPlayerEvent(3, function() end)", "=test")
            .unwrap();
        assert!(eluna.bindings().player.has_bindings_for(&EventKey::new(PlayerEvents::OnLogin)));

        eluna.run_string("cancel()", "=test").unwrap();
        assert!(!eluna.bindings().player.has_bindings_for(&EventKey::new(PlayerEvents::OnLogin)));
        // a second cancel is a no-op
        eluna.run_string("cancel()", "=test").unwrap();
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let eluna = state(ElunaInfo::global(), false);
        let err = eluna.run_string("RegisterPlayerEvent(999, function() end)", "=test").unwrap_err();
        assert!(err.to_string().contains("Unknown event type (regtype 2, id 0, event 999)"));
        assert_eq!(eluna.bindings().total(), 0);
    }

    #[test]
    fn test_non_function_is_rejected() {
        let eluna = state(ElunaInfo::global(), false);
        let err = eluna.run_string("RegisterServerEvent(13, 5)", "=test").unwrap_err();
        assert!(err
            .to_string()
            .contains("bad argument #2 to 'RegisterServerEvent' (function expected, got integer)"));
    }

    #[test]
    fn test_map_only_registration_in_world_state() {
        let eluna = state(ElunaInfo::global(), false);
        let err = eluna
            .run_string("RegisterCreatureEvent(1, 5, function() end)", "=test")
            .unwrap_err();
        assert!(err.to_string().contains("attempt to call a method that does not exist for state: -1"));
        assert_eq!(eluna.bindings().creature.len(), 0);
    }

    #[test]
    fn test_world_only_registration_in_map_state() {
        let eluna = state(ElunaInfo::map(0, 0), false);
        let err = eluna
            .run_string("RegisterGuildEvent(1, function() end)", "=test")
            .unwrap_err();
        assert!(err.to_string().contains("attempt to call a method that does not exist for state: 0"));
    }

    #[test]
    fn test_compatibility_mode_registers_everything() {
        let eluna = state(ElunaInfo::global(), true);
        eluna
            .run_string("RegisterCreatureEvent(1, 5, function() end)", "=test")
            .unwrap();
        assert_eq!(eluna.bindings().creature.len(), 1);
    }

    #[test]
    fn test_clear_entry_events() {
        let eluna = state(ElunaInfo::map(1, 0), false);
        eluna
            .run_string(
                r#"
                RegisterCreatureEvent(7, 5, function() end)
                RegisterCreatureEvent(7, 4, function() end)
                RegisterCreatureEvent(8, 5, function() end)
                ClearCreatureEvents(7, 4)
                "#,
                "=test",
            )
            .unwrap();
        assert_eq!(eluna.bindings().creature.len(), 2);

        eluna.run_string("ClearCreatureEvents(7)", "=test").unwrap();
        assert_eq!(eluna.bindings().creature.len(), 1);
        let _ = CreatureEvents::OnSpawn;
    }

    #[test]
    fn test_state_queries() {
        let eluna = state(ElunaInfo::map(530, 12), false);
        eluna
            .run_string(
                r#"
                assert(GetStateMapId() == 530)
                assert(GetStateInstanceId() == 12)
                assert(IsCompatibilityMode() == false)
                assert(GetCoreName() == "Unknown")
                assert(GetLuaEngine() == "LuaJIT")
                "#,
                "=test",
            )
            .unwrap();

        let world = state(ElunaInfo::global(), false);
        world.run_string("assert(GetStateMapId() == -1)", "=test").unwrap();
    }
}
