//! Item hooks.

use super::{HookEvent, ItemEvents};
use crate::binding::EntryKey;
use crate::host::{NativeType, WorldEntity};
use crate::scripting::Eluna;

impl Eluna {
    /// Item used by a player. Returns false when a script cancels the use.
    pub fn on_item_use<P: NativeType, I: WorldEntity, T: NativeType>(
        &self,
        player: &mut P,
        item: &mut I,
        target: Option<&mut T>,
    ) -> bool {
        let source = self.bindings().item.bind(EntryKey::new(ItemEvents::OnUse, item.entry()));
        self.call_all_functions_bool(&[&source], ItemEvents::OnUse.id(), 3, true, |state| {
            state.push(player);
            state.push(item);
            state.push(target);
        })
    }

    /// Timed item expired. Only the template entry survives, so that is
    /// what scripts receive.
    pub fn on_item_expire<P: NativeType>(&self, player: &mut P, entry: u32) -> bool {
        let source = self.bindings().item.bind(EntryKey::new(ItemEvents::OnExpire, entry));
        self.call_all_functions_bool(&[&source], ItemEvents::OnExpire.id(), 2, false, |state| {
            state.push(player);
            state.push(entry);
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

    struct Item(u32);
    impl NativeType for Item {
        const TYPE_NAME: &'static str = "Item";
    }

    impl WorldEntity for Item {
        fn entry(&self) -> u32 {
            self.0
        }

        fn guid(&self) -> u64 {
            0
        }

        fn instance_id(&self) -> u32 {
            0
        }
    }

    fn world(code: &str) -> Eluna {
        let config = Arc::new(ElunaConfig::default());
        let loader = ElunaLoader::new(Arc::clone(&config));
        let eluna = Eluna::new(ElunaInfo::global(), config, loader, Arc::new(NullHost)).unwrap();
        eluna.run_string(code, "=test").unwrap();
        eluna
    }

    #[test]
    fn test_item_use_defaults_to_allowed() {
        let eluna = world("");
        assert!(eluna.on_item_use::<_, _, Item>(&mut Player, &mut Item(5), None));
    }

    #[test]
    fn test_item_use_any_false_cancels() {
        let eluna = world(
            r#"
            RegisterItemEvent(5, 2, function() calls = (calls or 0) + 1 return false end)
            RegisterItemEvent(5, 2, function() calls = calls + 1 return true end)
            "#,
        );
        assert!(!eluna.on_item_use::<_, _, Item>(&mut Player, &mut Item(5), None));
        let calls = eluna.with_lua(|lua| lua.globals().get::<i64>("calls")).unwrap().unwrap();
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_item_expire_receives_entry() {
        let eluna = world("RegisterItemEvent(9, 4, function(e, p, entry) expired = entry end)");
        assert!(!eluna.on_item_expire(&mut Player, 9));
        let expired = eluna.with_lua(|lua| lua.globals().get::<i64>("expired")).unwrap().unwrap();
        assert_eq!(expired, 9);
    }
}
