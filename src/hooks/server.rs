//! World, map and packet hooks.

use super::{HookEvent, InstanceEvents, PacketEvents, ServerEvents};
use crate::binding::{BindingQuery, Bound, EntryKey, EventKey};
use crate::host::NativeType;
use crate::scripting::packet::WorldPacket;
use crate::scripting::{object, Eluna, LuaState};

impl Eluna {
    fn server_event(&self, event: ServerEvents) -> Bound<'_, EventKey<ServerEvents>> {
        self.bindings().server.bind(EventKey::new(event))
    }

    pub fn on_lua_state_open(&self) {
        let source = self.server_event(ServerEvents::OnLuaStateOpen);
        self.call_all_functions(&[&source], ServerEvents::OnLuaStateOpen.id(), 0, |_| {});
    }

    pub fn on_lua_state_close(&self) {
        let source = self.server_event(ServerEvents::OnLuaStateClose);
        self.call_all_functions(&[&source], ServerEvents::OnLuaStateClose.id(), 0, |_| {});
    }

    pub fn on_world_update(&self, diff: u32) {
        let source = self.server_event(ServerEvents::WorldOnUpdate);
        self.call_all_functions(&[&source], ServerEvents::WorldOnUpdate.id(), 1, |state| {
            state.push(diff);
        });
    }

    pub fn on_startup(&self) {
        let source = self.server_event(ServerEvents::WorldOnStartup);
        self.call_all_functions(&[&source], ServerEvents::WorldOnStartup.id(), 0, |_| {});
    }

    pub fn on_shutdown(&self) {
        let source = self.server_event(ServerEvents::WorldOnShutdown);
        self.call_all_functions(&[&source], ServerEvents::WorldOnShutdown.id(), 0, |_| {});
    }

    pub fn on_config_load(&self, reload: bool) {
        let source = self.server_event(ServerEvents::WorldOnConfigLoad);
        self.call_all_functions(&[&source], ServerEvents::WorldOnConfigLoad.id(), 1, |state| {
            state.push(reload);
        });
    }

    /// Outgoing packet. Returns false when a script blocks it; a returned
    /// packet replaces the one being sent.
    pub fn on_packet_send<P: NativeType>(&self, player: Option<&mut P>, packet: &mut WorldPacket) -> bool {
        self.packet_hook(ServerEvents::OnPacketSend, PacketEvents::OnPacketSend, player, packet)
    }

    /// Incoming packet. Same contract as `on_packet_send`.
    pub fn on_packet_receive<P: NativeType>(&self, player: Option<&mut P>, packet: &mut WorldPacket) -> bool {
        self.packet_hook(ServerEvents::OnPacketReceive, PacketEvents::OnPacketReceive, player, packet)
    }

    /// Any-opcode bindings fire first, then bindings for this opcode.
    fn packet_hook<P: NativeType>(
        &self,
        any: ServerEvents,
        one: PacketEvents,
        mut player: Option<&mut P>,
        packet: &mut WorldPacket,
    ) -> bool {
        let mut result = true;

        let source = self.server_event(any);
        self.packet_dispatch(&source, any.id(), player.as_deref_mut(), packet, &mut result);

        let source = self.bindings().packet.bind(EntryKey::new(one, u32::from(packet.opcode())));
        self.packet_dispatch(&source, one.id(), player, packet, &mut result);

        result
    }

    fn packet_dispatch<P: NativeType>(
        &self,
        source: &dyn BindingQuery,
        event_id: u32,
        player: Option<&mut P>,
        packet: &mut WorldPacket,
        result: &mut bool,
    ) {
        self.call_all_functions_replace(&[source], (), |state: &LuaState, sources| {
            let copy = object::push_owned(state.lua(), packet.clone()).unwrap_or(mlua::Value::Nil);
            state.push(copy);
            state.push(player);

            let mut frame = state.setup_stack(sources, event_id, 2);
            while frame.functions_left() > 0 {
                state.call_one_function(&mut frame, 2);
                if let mlua::Value::Boolean(false) = state.result(&frame, 0) {
                    *result = false;
                }
                if let Some(replacement) = state.result_object::<WorldPacket, _>(&frame, 1, |p| p.clone()) {
                    *packet = replacement;
                }
            }
            state.clean_up_stack(frame);
        });
    }

    /// Map tick. Scripts receive the map id of the state.
    pub fn on_map_update(&self, diff: u32) {
        let map_id = self.info().map_id;
        let source = self.server_event(ServerEvents::MapOnUpdate);
        self.call_all_functions(&[&source], ServerEvents::MapOnUpdate.id(), 2, |state| {
            state.push(map_id);
            state.push(diff);
        });
    }

    /// Instance tick: map-keyed bindings, then instance-keyed ones.
    pub fn on_instance_update(&self, diff: u32) {
        let info = self.info();
        let event = InstanceEvents::OnUpdate;

        let by_map = self.bindings().map.bind(EntryKey::new(event, info.map_id));
        self.call_all_functions(&[&by_map], event.id(), 2, |state| {
            state.push(info.instance_id);
            state.push(diff);
        });

        let by_instance = self.bindings().instance.bind(EntryKey::new(event, info.instance_id));
        self.call_all_functions(&[&by_instance], event.id(), 2, |state| {
            state.push(info.instance_id);
            state.push(diff);
        });
    }

    pub fn on_player_enter_map<P: NativeType>(&self, player: &mut P) {
        let map_id = self.info().map_id;
        let source = self.server_event(ServerEvents::MapOnPlayerEnter);
        self.call_all_functions(&[&source], ServerEvents::MapOnPlayerEnter.id(), 2, |state| {
            state.push(map_id);
            state.push(player);
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::ElunaConfig;
    use crate::core::ElunaInfo;
    use crate::host::NullHost;
    use crate::loader::ElunaLoader;
    use crate::scripting::packet::WorldPacket;
    use crate::scripting::Eluna;

    struct Player;
    impl crate::host::NativeType for Player {
        const TYPE_NAME: &'static str = "Player";
    }

    fn state(info: ElunaInfo) -> Eluna {
        let config = Arc::new(ElunaConfig::default());
        let loader = ElunaLoader::new(Arc::clone(&config));
        Eluna::new(info, config, loader, Arc::new(NullHost)).unwrap()
    }

    fn global_number(eluna: &Eluna, name: &str) -> i64 {
        eluna
            .with_lua(|lua| lua.globals().get::<Option<i64>>(name))
            .unwrap()
            .unwrap()
            .unwrap_or(0)
    }

    #[test]
    fn test_world_update_receives_diff() {
        let eluna = state(ElunaInfo::global());
        eluna
            .run_string("RegisterServerEvent(13, function(e, diff) last = diff end)", "=test")
            .unwrap();
        eluna.on_world_update(40);
        assert_eq!(global_number(&eluna, "last"), 40);
        assert_eq!(eluna.stack_depth(), 0);
    }

    #[test]
    fn test_packet_block_and_replace() {
        let eluna = state(ElunaInfo::global());
        eluna
            .run_string(
                r#"
                RegisterServerEvent(7, function(e, packet, player)
                    seen = packet:GetOpcode()
                    local p = CreatePacket(99, 1)
                    p:WriteUByte(1)
                    return false, p
                end)
                "#,
                "=test",
            )
            .unwrap();

        let mut packet = WorldPacket::new(12, vec![]);
        let allowed = eluna.on_packet_send::<Player>(None, &mut packet);
        assert!(!allowed);
        assert_eq!(global_number(&eluna, "seen"), 12);
        assert_eq!(packet.opcode(), 99);
        assert_eq!(packet.data(), &[1]);
        assert_eq!(eluna.stack_depth(), 0);
    }

    #[test]
    fn test_opcode_bindings_only_match_their_opcode() {
        let eluna = state(ElunaInfo::global());
        eluna
            .run_string("RegisterPacketEvent(5, 5, function() hits = (hits or 0) + 1 end)", "=test")
            .unwrap();

        let mut other = WorldPacket::new(6, vec![]);
        assert!(eluna.on_packet_receive::<Player>(None, &mut other));
        assert_eq!(global_number(&eluna, "hits"), 0);

        let mut matching = WorldPacket::new(5, vec![]);
        assert!(eluna.on_packet_receive::<Player>(None, &mut matching));
        assert_eq!(global_number(&eluna, "hits"), 1);
    }

    #[test]
    fn test_lua_state_open_hook() {
        let eluna = state(ElunaInfo::global());
        eluna
            .run_string("RegisterServerEvent(33, function() opened = (opened or 0) + 1 end)", "=test")
            .unwrap();
        eluna.on_lua_state_open();
        assert_eq!(global_number(&eluna, "opened"), 1);
    }

    #[test]
    fn test_instance_update_fires_map_then_instance() {
        let eluna = state(ElunaInfo::map(33, 4));
        eluna
            .run_string(
                r#"
                order = ""
                RegisterMapEvent(33, 3, function(e, id, diff) order = order .. "m" .. id end)
                RegisterInstanceEvent(4, 3, function(e, id, diff) order = order .. "i" .. diff end)
                "#,
                "=test",
            )
            .unwrap();
        eluna.on_instance_update(9);
        let order = eluna
            .with_lua(|lua| lua.globals().get::<String>("order"))
            .unwrap()
            .unwrap();
        assert_eq!(order, "m4i9");
    }
}
