use std::sync::{Arc, OnceLock, Weak};

use eluna::config::ElunaConfig;
use eluna::host::{Host, NativeType, WorldEntity};
use eluna::loader::ElunaLoader;
use eluna::scripting::{object, ElunaRegister, MethodCall, Push, TypeRegistry};
use eluna::{Eluna, ElunaInfo};
use mlua::FromLua;

struct Creature {
    entry: u32,
    guid: u64,
}

impl NativeType for Creature {
    const TYPE_NAME: &'static str = "Creature";
}

impl WorldEntity for Creature {
    fn entry(&self) -> u32 {
        self.entry
    }

    fn guid(&self) -> u64 {
        self.guid
    }

    fn instance_id(&self) -> u32 {
        0
    }
}

struct Player;

impl NativeType for Player {
    const TYPE_NAME: &'static str = "Player";
}

fn get_entry(call: &mut MethodCall<'_>, creature: &mut Creature) -> mlua::Result<usize> {
    Ok(call.push(creature.entry))
}

const CREATURE_METHODS: &[ElunaRegister<Creature>] = &[ElunaRegister::new("GetEntry", get_entry)];

/// Registers `Creature` and `Player`, plus globals that re-enter the state
/// from script code:
/// - `Nest(diff)` fires the world update hook
/// - `Respawn(creature)` fires the spawn hook on that creature
/// - `Tick()` runs the state's safe point
#[derive(Default)]
struct TestHost {
    state: Arc<OnceLock<Weak<Eluna>>>,
}

impl Host for TestHost {
    fn register_types(&self, registry: &TypeRegistry<'_>) -> mlua::Result<()> {
        registry.register::<Creature>(CREATURE_METHODS)?;
        registry.register::<Player>(&[])?;

        let slot = Arc::clone(&self.state);
        let nest = registry.lua().create_function(move |_, diff: u32| {
            if let Some(eluna) = slot.get().and_then(Weak::upgrade) {
                eluna.on_world_update(diff);
            }
            Ok(())
        })?;
        registry.lua().globals().set("Nest", nest)?;

        let slot = Arc::clone(&self.state);
        let respawn = registry.lua().create_function(move |lua, creature: mlua::Value| {
            let Some(eluna) = slot.get().and_then(Weak::upgrade) else {
                return Ok(());
            };
            object::with_object::<Creature, _>(lua, &creature, |c| {
                eluna.on_creature_spawn(c);
            })
            .map_err(mlua::Error::runtime)?;
            Ok(())
        })?;
        registry.lua().globals().set("Respawn", respawn)?;

        let slot = Arc::clone(&self.state);
        let tick = registry.lua().create_function(move |_, ()| {
            if let Some(eluna) = slot.get().and_then(Weak::upgrade) {
                eluna.update(0);
            }
            Ok(())
        })?;
        registry.lua().globals().set("Tick", tick)
    }
}

fn state(info: ElunaInfo, code: &str) -> Arc<Eluna> {
    let host = Arc::new(TestHost::default());
    let slot = Arc::clone(&host.state);

    let config = Arc::new(ElunaConfig::default());
    let loader = ElunaLoader::new(Arc::clone(&config));
    loader.load_scripts().unwrap();
    let eluna = Arc::new(Eluna::new(info, config, loader, host).unwrap());
    let _ = slot.set(Arc::downgrade(&eluna));

    eluna.run_string(code, "=test").unwrap();
    eluna
}

fn global<T: FromLua>(eluna: &Eluna, name: &str) -> T {
    eluna.with_lua(|lua| lua.globals().get::<T>(name)).unwrap().unwrap()
}

fn repeat(line: &str, n: usize) -> String {
    (0..n).map(|_| line).collect::<Vec<_>>().join("\n")
}

#[test]
fn test_stack_balanced_in_every_mode() {
    for n in [0, 1, 5] {
        let world = state(ElunaInfo::global(), &repeat("RegisterServerEvent(13, function(e, diff) end)", n));
        world.on_world_update(10);
        assert_eq!(world.stack_depth(), 0, "plain mode with {} callbacks", n);

        let world = state(
            ElunaInfo::global(),
            &repeat("RegisterItemEvent(1, 2, function() return false end)", n),
        );
        world.on_item_use::<_, _, Creature>(&mut Player, &mut Creature { entry: 1, guid: 1 }, None);
        assert_eq!(world.stack_depth(), 0, "bool mode with {} callbacks", n);

        let map = state(
            ElunaInfo::map(0, 0),
            &repeat("RegisterCreatureEvent(1, 9, function(e, c, a, dmg) return false, dmg + 1 end)", n),
        );
        let mut damage = 10;
        map.on_damage_taken::<_, Creature>(&mut Creature { entry: 1, guid: 1 }, None, &mut damage);
        assert_eq!(map.stack_depth(), 0, "replace mode with {} callbacks", n);
        assert_eq!(damage, 10 + n as u32);
    }
}

#[test]
fn test_callbacks_run_in_registration_order() {
    let eluna = state(
        ElunaInfo::global(),
        r#"
        order = ""
        RegisterServerEvent(13, function() order = order .. "a" end)
        RegisterServerEvent(13, function() order = order .. "b" end)
        RegisterServerEvent(13, function() order = order .. "c" end)
        "#,
    );
    eluna.on_world_update(1);
    assert_eq!(global::<String>(&eluna, "order"), "abc");
}

#[test]
fn test_bool_merge_runs_every_callback() {
    let eluna = state(
        ElunaInfo::global(),
        r#"
        calls = 0
        RegisterItemEvent(3, 2, function() calls = calls + 1 return true end)
        RegisterItemEvent(3, 2, function() calls = calls + 1 return false end)
        RegisterItemEvent(3, 2, function() calls = calls + 1 return true end)
        RegisterItemEvent(3, 2, function() calls = calls + 1 return "yes" end)
        "#,
    );
    let allowed = eluna.on_item_use::<_, _, Creature>(&mut Player, &mut Creature { entry: 3, guid: 1 }, None);
    assert!(!allowed);
    assert_eq!(global::<i64>(&eluna, "calls"), 4);
}

#[test]
fn test_handles_expire_after_dispatch() {
    let eluna = state(
        ElunaInfo::map(0, 0),
        r#"
        RegisterCreatureEvent(20, 5, function(e, c)
            saved = c
            inside = c:IsValid()
            entry = c:GetEntry()
        end)
        "#,
    );
    let epoch = eluna.current_epoch();
    eluna.on_creature_spawn(&mut Creature { entry: 20, guid: 4 });

    assert!(global::<bool>(&eluna, "inside"));
    assert_eq!(global::<i64>(&eluna, "entry"), 20);
    assert_eq!(eluna.current_epoch(), epoch + 1);

    eluna.run_string("after = saved:IsValid()", "=test").unwrap();
    assert!(!global::<bool>(&eluna, "after"));

    let err = eluna.run_string("saved:GetEntry()", "=test").unwrap_err();
    assert!(err.to_string().contains(
        "bad argument #1 to 'GetEntry' (Creature expected, got pointer to nonexisting (invalidated) object (Creature). Check your code.)"
    ));
}

#[test]
fn test_explicit_invalidation() {
    let eluna = state(ElunaInfo::global(), "");
    let mut creature = Creature { entry: 1, guid: 1 };

    let handle = eluna.with_lua(|lua| (&mut creature).push_value(lua)).unwrap();
    assert!(eluna.with_lua(|lua| object::is_valid(lua, &handle)).unwrap().unwrap());

    assert!(eluna.invalidate_object(&mut creature as *mut Creature));
    assert!(!eluna.with_lua(|lua| object::is_valid(lua, &handle)).unwrap().unwrap());
    assert!(!eluna.invalidate_object(&mut creature as *mut Creature));

    // a later push builds a fresh handle
    let fresh = eluna.with_lua(|lua| (&mut creature).push_value(lua)).unwrap();
    assert!(eluna.with_lua(|lua| object::is_valid(lua, &fresh)).unwrap().unwrap());
}

#[test]
fn test_nested_dispatch_keeps_outer_handles() {
    let eluna = state(
        ElunaInfo::map(0, 0),
        r#"
        RegisterServerEvent(13, function(e, diff) nested_diff = diff end)
        RegisterCreatureEvent(30, 5, function(e, c)
            Nest(7)
            still_valid = c:IsValid()
        end)
        "#,
    );
    let epoch = eluna.current_epoch();
    eluna.on_creature_spawn(&mut Creature { entry: 30, guid: 2 });

    assert_eq!(global::<i64>(&eluna, "nested_diff"), 7);
    assert!(global::<bool>(&eluna, "still_valid"));
    assert_eq!(eluna.current_epoch(), epoch + 1);
    assert_eq!(eluna.stack_depth(), 0);
}

#[test]
fn test_reentering_dispatch_on_the_same_object() {
    let eluna = state(
        ElunaInfo::map(0, 0),
        r#"
        depth = 0
        RegisterCreatureEvent(40, 5, function(e, c)
            depth = depth + 1
            if depth == 1 then
                first = c
                Respawn(c)
                outer_entry = c:GetEntry()
            else
                inner_entry = first:GetEntry()
                same_handle = rawequal(first, c)
            end
        end)
        "#,
    );
    let mut creature = Creature { entry: 40, guid: 8 };
    eluna.on_creature_spawn(&mut creature);

    assert_eq!(global::<i64>(&eluna, "depth"), 2);
    assert_eq!(global::<i64>(&eluna, "inner_entry"), 40);
    assert_eq!(global::<i64>(&eluna, "outer_entry"), 40);
    assert!(global::<bool>(&eluna, "same_handle"));
    assert_eq!(eluna.stack_depth(), 0);

    // the store still maps the pointer to the original handle
    let handle = global::<mlua::Value>(&eluna, "first");
    let pushed = eluna.with_lua(|lua| (&mut creature).push_value(lua)).unwrap();
    assert_eq!(handle, pushed);
    assert!(eluna.invalidate_object(&mut creature as *mut Creature));
}

#[test]
fn test_reload_waits_while_a_chunk_is_running() {
    let eluna = state(
        ElunaInfo::global(),
        "marker = 1 RegisterServerEvent(13, function() ticks = (ticks or 0) + 1 end)",
    );
    assert_eq!(eluna.bindings().total(), 1);

    eluna.run_string("ReloadEluna() Tick()", "=test").unwrap();

    // nothing was torn down while the chunk held the state
    assert_eq!(eluna.bindings().total(), 1);
    assert_eq!(global::<i64>(&eluna, "marker"), 1);
    assert_eq!(global::<i64>(&eluna, "ticks"), 1);
    assert!(eluna.context().reload_requested());

    eluna.update(0);
    assert!(!eluna.context().reload_requested());
    assert_eq!(eluna.bindings().total(), 0);
    assert!(global::<mlua::Value>(&eluna, "marker").is_nil());
}

#[test]
fn test_unbound_hooks_skip_dispatch() {
    let eluna = state(ElunaInfo::map(0, 0), "RegisterCreatureEvent(1, 5, function() end)");
    let dispatches = eluna.dispatch_count();
    let epoch = eluna.current_epoch();

    eluna.on_world_update(1);
    let mut damage = 5;
    assert!(!eluna.on_damage_taken::<_, Creature>(&mut Creature { entry: 1, guid: 1 }, None, &mut damage));
    eluna.on_creature_spawn(&mut Creature { entry: 2, guid: 1 });

    assert_eq!(eluna.dispatch_count(), dispatches);
    assert_eq!(eluna.current_epoch(), epoch);
}

#[test]
fn test_limited_shots_expire() {
    let eluna = state(
        ElunaInfo::global(),
        "calls = 0 RegisterServerEvent(13, function() calls = calls + 1 end, 2)",
    );
    for _ in 0..3 {
        eluna.on_world_update(1);
    }
    assert_eq!(global::<i64>(&eluna, "calls"), 2);
    assert_eq!(eluna.bindings().total(), 0);
}

#[test]
fn test_error_does_not_stop_siblings() {
    let eluna = state(
        ElunaInfo::global(),
        r#"
        calls = 0
        RegisterServerEvent(13, function() calls = calls + 1 end)
        RegisterServerEvent(13, function() error("broken callback") end)
        RegisterServerEvent(13, function() calls = calls + 1 end)
        "#,
    );
    eluna.on_world_update(1);
    assert_eq!(global::<i64>(&eluna, "calls"), 2);
    assert_eq!(eluna.stack_depth(), 0);
}

#[test]
fn test_damage_replacement_chain() {
    let eluna = state(
        ElunaInfo::map(0, 0),
        "RegisterCreatureEvent(10, 9, function(e, c, a, dmg) return nil, dmg * 2 end)",
    );
    let mut creature = Creature { entry: 10, guid: 1 };
    let mut damage = 50;
    assert!(!eluna.on_damage_taken::<_, Creature>(&mut creature, None, &mut damage));
    assert_eq!(damage, 100);

    let eluna = state(
        ElunaInfo::map(0, 0),
        r#"
        RegisterCreatureEvent(10, 9, function(e, c, a, dmg) return nil, dmg + 1 end)
        RegisterCreatureEvent(10, 9, function(e, c, a, dmg) return nil, dmg * 2 end)
        RegisterCreatureEvent(10, 9, function(e, c, a, dmg) seen = dmg return "ignored" end)
        "#,
    );
    let mut damage = 50;
    assert!(!eluna.on_damage_taken::<_, Creature>(&mut creature, None, &mut damage));
    assert_eq!(damage, 102);
    assert_eq!(global::<i64>(&eluna, "seen"), 102);
}
