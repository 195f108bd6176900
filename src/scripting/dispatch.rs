//! Guard-and-dispatch helpers used by every hook call site.
//!
//! The existence guard runs against the registries before the state lock is
//! taken or anything is pushed, so hooks with no bindings cost a few hash
//! lookups.

use mlua::Value;

use super::stack::LuaState;
use super::Eluna;
use crate::binding::BindingQuery;

impl Eluna {
    fn any_bound(sources: &[&dyn BindingQuery]) -> bool {
        sources.iter().any(|source| source.has_bindings())
    }

    /// Fire every callback; results are ignored. `push` must push exactly
    /// `nargs` arguments.
    pub fn call_all_functions(
        &self,
        sources: &[&dyn BindingQuery],
        event_id: u32,
        nargs: usize,
        push: impl FnOnce(&LuaState),
    ) {
        if !Self::any_bound(sources) {
            return;
        }

        self.with_state(|state| {
            push(state);
            let mut frame = state.setup_stack(sources, event_id, nargs);
            while frame.functions_left() > 0 {
                state.call_one_function(&mut frame, 0);
            }
            state.clean_up_stack(frame);
        });
    }

    /// Fire every callback and merge boolean results: the result flips away
    /// from `default` once any callback returns the opposite boolean.
    /// Non-boolean results are ignored and every callback runs.
    pub fn call_all_functions_bool(
        &self,
        sources: &[&dyn BindingQuery],
        event_id: u32,
        nargs: usize,
        default: bool,
        push: impl FnOnce(&LuaState),
    ) -> bool {
        if !Self::any_bound(sources) {
            return default;
        }

        self.with_state(|state| {
            push(state);
            let mut result = default;
            let mut frame = state.setup_stack(sources, event_id, nargs);
            while frame.functions_left() > 0 {
                state.call_one_function(&mut frame, 1);
                if let Value::Boolean(value) = state.result(&frame, 0) {
                    if value != default {
                        result = value;
                    }
                }
            }
            state.clean_up_stack(frame);
            result
        })
        .unwrap_or(default)
    }

    /// Guarded access for hooks that drive the frame themselves, typically
    /// to feed replacement values back through `replace_argument`.
    ///
    /// `body` receives the state and `sources` and must run a complete
    /// `setup_stack` → `call_one_function`* → `clean_up_stack` cycle.
    /// Returns `fallback` when nothing is bound.
    pub fn call_all_functions_replace<R>(
        &self,
        sources: &[&dyn BindingQuery],
        fallback: R,
        body: impl FnOnce(&LuaState, &[&dyn BindingQuery]) -> R,
    ) -> R {
        if !Self::any_bound(sources) {
            return fallback;
        }
        self.with_state(|state| body(state, sources)).unwrap_or(fallback)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::binding::EventKey;
    use crate::config::ElunaConfig;
    use crate::core::ElunaInfo;
    use crate::hooks::{HookEvent, ServerEvents};
    use crate::host::NullHost;
    use crate::loader::ElunaLoader;
    use crate::scripting::Eluna;

    fn world(code: &str) -> Eluna {
        let config = Arc::new(ElunaConfig::default());
        let loader = ElunaLoader::new(Arc::clone(&config));
        let eluna = Eluna::new(ElunaInfo::global(), config, loader, Arc::new(NullHost)).unwrap();
        eluna.run_string(code, "=test").unwrap();
        eluna
    }

    #[test]
    fn test_declared_arity_is_checked() {
        let eluna = world("RegisterServerEvent(13, function() end)");
        let source = eluna.bindings().server.bind(EventKey::new(ServerEvents::WorldOnUpdate));
        eluna.call_all_functions(&[&source], ServerEvents::WorldOnUpdate.id(), 1, |state| {
            state.push(10u32);
        });
        assert_eq!(eluna.stack_depth(), 0);
    }

    #[test]
    #[should_panic(expected = "setup_stack: 2 arguments declared but 1 pushed")]
    fn test_arity_mismatch_panics() {
        let eluna = world("RegisterServerEvent(13, function() end)");
        let source = eluna.bindings().server.bind(EventKey::new(ServerEvents::WorldOnUpdate));
        eluna.call_all_functions(&[&source], ServerEvents::WorldOnUpdate.id(), 2, |state| {
            state.push(10u32);
        });
    }

    #[test]
    #[should_panic(expected = "setup_stack: 0 arguments declared but 1 pushed")]
    fn test_bool_arity_mismatch_panics() {
        let eluna = world("RegisterServerEvent(13, function() return false end)");
        let source = eluna.bindings().server.bind(EventKey::new(ServerEvents::WorldOnUpdate));
        eluna.call_all_functions_bool(&[&source], ServerEvents::WorldOnUpdate.id(), 0, true, |state| {
            state.push(10u32);
        });
    }
}
