//! Gossip hooks for creatures and gameobjects.
//!
//! With no bindings the hooks return false so the host shows its own menu.
//! Otherwise the result starts at true and a script returning false hands
//! the menu back to the host.

use super::{GossipEvents, HookEvent};
use crate::binding::{BindingMap, BindingQuery, Bindings, EntryKey};
use crate::host::{NativeType, WorldEntity};
use crate::scripting::{Eluna, LuaState};

/// A gossip speaker and the registry its bindings live in.
pub trait GossipTarget: WorldEntity {
    fn gossip_bindings(bindings: &Bindings) -> &BindingMap<EntryKey<GossipEvents>>;
}

impl Eluna {
    fn gossip_hook<T: GossipTarget>(
        &self,
        event: GossipEvents,
        entry: u32,
        nargs: usize,
        push: impl FnOnce(&LuaState),
    ) -> bool {
        let source = T::gossip_bindings(self.bindings()).bind(EntryKey::new(event, entry));
        if !source.has_bindings() {
            return false;
        }
        self.call_all_functions_bool(&[&source], event.id(), nargs, true, push)
    }

    pub fn on_gossip_hello<P: NativeType, T: GossipTarget>(&self, player: &mut P, target: &mut T) -> bool {
        let entry = target.entry();
        self.gossip_hook::<T>(GossipEvents::OnHello, entry, 2, |state| {
            state.push(player);
            state.push(target);
        })
    }

    pub fn on_gossip_select<P: NativeType, T: GossipTarget>(
        &self,
        player: &mut P,
        target: &mut T,
        sender: u32,
        action: u32,
    ) -> bool {
        let entry = target.entry();
        self.gossip_hook::<T>(GossipEvents::OnSelect, entry, 4, |state| {
            state.push(player);
            state.push(target);
            state.push(sender);
            state.push(action);
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

    struct Player;
    impl NativeType for Player {
        const TYPE_NAME: &'static str = "Player";
    }

    struct GameObject(u32);
    impl NativeType for GameObject {
        const TYPE_NAME: &'static str = "GameObject";
    }

    impl WorldEntity for GameObject {
        fn entry(&self) -> u32 {
            self.0
        }

        fn guid(&self) -> u64 {
            u64::from(self.0)
        }

        fn instance_id(&self) -> u32 {
            0
        }
    }

    impl GossipTarget for GameObject {
        fn gossip_bindings(bindings: &Bindings) -> &BindingMap<EntryKey<GossipEvents>> {
            &bindings.gameobject_gossip
        }
    }

    fn map_state(code: &str) -> Eluna {
        let config = Arc::new(ElunaConfig::default());
        let loader = ElunaLoader::new(Arc::clone(&config));
        let eluna = Eluna::new(ElunaInfo::map(1, 0), config, loader, Arc::new(NullHost)).unwrap();
        eluna.run_string(code, "=test").unwrap();
        eluna
    }

    #[test]
    fn test_unbound_gossip_returns_false() {
        let eluna = map_state("");
        assert!(!eluna.on_gossip_hello(&mut Player, &mut GameObject(3)));
    }

    #[test]
    fn test_bound_gossip_defaults_to_true() {
        let eluna = map_state("RegisterGameObjectGossipEvent(3, 1, function() end)");
        assert!(eluna.on_gossip_hello(&mut Player, &mut GameObject(3)));
        assert!(!eluna.on_gossip_hello(&mut Player, &mut GameObject(4)));
    }

    #[test]
    fn test_select_receives_sender_and_action() {
        let eluna = map_state(
            r#"RegisterGameObjectGossipEvent(3, 2, function(e, p, go, sender, action)
                picked = sender * 100 + action
                return false
            end)"#,
        );
        assert!(!eluna.on_gossip_select(&mut Player, &mut GameObject(3), 2, 7));
        let picked = eluna.with_lua(|lua| lua.globals().get::<i64>("picked")).unwrap().unwrap();
        assert_eq!(picked, 207);
    }
}
