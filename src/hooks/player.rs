//! Player hooks.
//!
//! Money, experience, reputation and skill hooks chain their amount through
//! every callback: a numeric result replaces the amount for the native side
//! and for the callbacks still to run.

use mlua::Value;

use super::{HookEvent, PlayerEvents};
use crate::binding::{Bound, EventKey};
use crate::core::parse_reload_command;
use crate::host::NativeType;
use crate::scripting::{Check, Eluna, LuaState, Push};

impl Eluna {
    fn player_event(&self, event: PlayerEvents) -> Bound<'_, EventKey<PlayerEvents>> {
        self.bindings().player.bind(EventKey::new(event))
    }

    pub fn on_login<P: NativeType>(&self, player: &mut P) {
        let source = self.player_event(PlayerEvents::OnLogin);
        self.call_all_functions(&[&source], PlayerEvents::OnLogin.id(), 1, |state| {
            state.push(player);
        });
    }

    pub fn on_logout<P: NativeType>(&self, player: &mut P) {
        let source = self.player_event(PlayerEvents::OnLogout);
        self.call_all_functions(&[&source], PlayerEvents::OnLogout.id(), 1, |state| {
            state.push(player);
        });
    }

    /// Run a replacement chain over `amount`, the argument at `index` of
    /// the `nargs` that `push` pushes.
    fn replace_amount<V: Check + Push + Copy>(
        &self,
        event: PlayerEvents,
        amount: &mut V,
        nargs: usize,
        index: usize,
        push: impl FnOnce(&LuaState, V),
    ) {
        let source = self.player_event(event);
        let start = *amount;
        *amount = self.call_all_functions_replace(&[&source], start, |state, sources| {
            push(state, start);
            let mut current = start;
            let mut frame = state.setup_stack(sources, event.id(), nargs);
            while frame.functions_left() > 0 {
                state.call_one_function(&mut frame, 1);
                if let Some(value) = state.result_number::<V>(&frame, 0) {
                    current = value;
                    state.replace_argument(&frame, index, value);
                }
            }
            state.clean_up_stack(frame);
            current
        });
    }

    pub fn on_money_changed<P: NativeType>(&self, player: &mut P, amount: &mut i32) {
        self.replace_amount(PlayerEvents::OnMoneyChange, amount, 2, 1, |state, amount| {
            state.push(player);
            state.push(amount);
        });
    }

    pub fn on_give_xp<P: NativeType, V: NativeType>(&self, player: &mut P, amount: &mut u32, victim: Option<&mut V>) {
        self.replace_amount(PlayerEvents::OnGiveXp, amount, 3, 1, |state, amount| {
            state.push(player);
            state.push(amount);
            state.push(victim);
        });
    }

    pub fn on_reputation_change<P: NativeType>(
        &self,
        player: &mut P,
        faction_id: u32,
        standing: &mut i32,
        incremental: bool,
    ) {
        self.replace_amount(PlayerEvents::OnReputationChange, standing, 4, 2, |state, standing| {
            state.push(player);
            state.push(faction_id);
            state.push(standing);
            state.push(incremental);
        });
    }

    pub fn on_skill_change<P: NativeType>(&self, player: &mut P, skill_id: u32, value: &mut u32) {
        self.replace_amount(PlayerEvents::OnSkillChange, value, 3, 2, |state, value| {
            state.push(player);
            state.push(skill_id);
            state.push(value);
        });
    }

    /// Chat message. Returns false when a script blocks it; a string result
    /// replaces the message.
    pub fn on_chat<P: NativeType>(&self, player: &mut P, msg_type: u32, lang: u32, msg: &mut String) -> bool {
        let source = self.player_event(PlayerEvents::OnChat);
        self.call_all_functions_replace(&[&source], true, |state, sources| {
            state.push(player);
            state.push(msg.as_str());
            state.push(msg_type);
            state.push(lang);

            let mut result = true;
            let mut frame = state.setup_stack(sources, PlayerEvents::OnChat.id(), 4);
            while frame.functions_left() > 0 {
                state.call_one_function(&mut frame, 2);
                if let Value::Boolean(false) = state.result(&frame, 0) {
                    result = false;
                }
                if let Value::String(text) = state.result(&frame, 1) {
                    *msg = String::from_utf8_lossy(&*text.as_bytes()).into_owned();
                }
            }
            state.clean_up_stack(frame);
            result
        })
    }

    /// Console or chat command. `reload eluna` is intercepted and requests a
    /// reload of this state; everything else goes to the command bindings.
    /// Returns false when the command was handled.
    pub fn on_command<P: NativeType>(&self, player: Option<&mut P>, text: &str) -> bool {
        if parse_reload_command(text).is_ok() {
            self.context().host.announce("Reloading Eluna...");
            self.request_reload();
            return false;
        }

        let source = self.player_event(PlayerEvents::OnCommand);
        self.call_all_functions_bool(&[&source], PlayerEvents::OnCommand.id(), 2, true, |state| {
            state.push(player);
            state.push(text);
        })
    }
}
