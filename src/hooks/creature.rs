//! Creature hooks.
//!
//! Every creature event is looked up twice: by template entry and by the
//! spawn's unique (guid, instance) key. Entry bindings run first.

use mlua::Value;

use super::{CreatureEvents, HookEvent};
use crate::binding::{Bound, EntryKey, UniqueObjectKey};
use crate::host::{NativeType, WorldEntity};
use crate::scripting::Eluna;

impl Eluna {
    fn creature_sources<C: WorldEntity>(
        &self,
        event: CreatureEvents,
        creature: &C,
    ) -> (Bound<'_, EntryKey<CreatureEvents>>, Bound<'_, UniqueObjectKey<CreatureEvents>>) {
        let bindings = self.bindings();
        (
            bindings.creature.bind(EntryKey::new(event, creature.entry())),
            bindings
                .creature_unique
                .bind(UniqueObjectKey::new(event, creature.guid(), creature.instance_id())),
        )
    }

    /// Damage about to be applied. Returns true when a script prevents the
    /// default handling. A numeric second result replaces `damage` for the
    /// native side and for later callbacks.
    pub fn on_damage_taken<C: WorldEntity, A: NativeType>(
        &self,
        creature: &mut C,
        attacker: Option<&mut A>,
        damage: &mut u32,
    ) -> bool {
        let (by_entry, by_guid) = self.creature_sources(CreatureEvents::OnDamageTaken, creature);
        self.call_all_functions_replace(&[&by_entry, &by_guid], false, |state, sources| {
            state.push(creature);
            state.push(attacker);
            state.push(*damage);

            let mut result = false;
            let mut frame = state.setup_stack(sources, CreatureEvents::OnDamageTaken.id(), 3);
            while frame.functions_left() > 0 {
                state.call_one_function(&mut frame, 2);
                if let Value::Boolean(true) = state.result(&frame, 0) {
                    result = true;
                }
                if let Some(value) = state.result_number::<u32>(&frame, 1) {
                    *damage = value;
                    state.replace_argument(&frame, 2, value);
                }
            }
            state.clean_up_stack(frame);
            result
        })
    }

    pub fn on_creature_spawn<C: WorldEntity>(&self, creature: &mut C) -> bool {
        let (by_entry, by_guid) = self.creature_sources(CreatureEvents::OnSpawn, creature);
        self.call_all_functions_bool(&[&by_entry, &by_guid], CreatureEvents::OnSpawn.id(), 1, false, |state| {
            state.push(creature);
        })
    }

    pub fn on_creature_died<C: WorldEntity, K: NativeType>(&self, creature: &mut C, killer: Option<&mut K>) -> bool {
        let (by_entry, by_guid) = self.creature_sources(CreatureEvents::OnDied, creature);
        self.call_all_functions_bool(&[&by_entry, &by_guid], CreatureEvents::OnDied.id(), 2, false, |state| {
            state.push(creature);
            state.push(killer);
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::ElunaConfig;
    use crate::core::ElunaInfo;
    use crate::host::NullHost;
    use crate::loader::ElunaLoader;

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

    fn map_state(code: &str) -> Eluna {
        let config = Arc::new(ElunaConfig::default());
        let loader = ElunaLoader::new(Arc::clone(&config));
        let eluna = Eluna::new(ElunaInfo::map(0, 0), config, loader, Arc::new(NullHost)).unwrap();
        eluna.run_string(code, "=test").unwrap();
        eluna
    }

    #[test]
    fn test_entry_then_unique_bindings() {
        let eluna = map_state(
            r#"
            order = ""
            RegisterUniqueCreatureEvent(77, 0, 5, function() order = order .. "u" end)
            RegisterCreatureEvent(10, 5, function() order = order .. "e" end)
            "#,
        );
        let mut creature = Creature { entry: 10, guid: 77 };
        eluna.on_creature_spawn(&mut creature);
        let order = eluna.with_lua(|lua| lua.globals().get::<String>("order")).unwrap().unwrap();
        assert_eq!(order, "eu");
    }

    #[test]
    fn test_other_entry_is_not_dispatched() {
        let eluna = map_state("RegisterCreatureEvent(10, 9, function() return true, 1 end)");
        let mut creature = Creature { entry: 11, guid: 1 };
        let mut damage = 50;
        let before = eluna.dispatch_count();
        assert!(!eluna.on_damage_taken::<_, Creature>(&mut creature, None, &mut damage));
        assert_eq!(damage, 50);
        assert_eq!(eluna.dispatch_count(), before);
    }

    #[test]
    fn test_damage_prevent_flag() {
        let eluna = map_state("RegisterCreatureEvent(10, 9, function() return true end)");
        let mut creature = Creature { entry: 10, guid: 1 };
        let mut damage = 50;
        assert!(eluna.on_damage_taken::<_, Creature>(&mut creature, None, &mut damage));
        assert_eq!(damage, 50);
    }
}
