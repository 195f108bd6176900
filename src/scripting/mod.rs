//! Scripting state: one interpreter plus the registries that feed it.
//!
//! An `Eluna` owns:
//! - an `ElunaContext` shared with the interpreter through app data (state
//!   identity, binding registries, epoch clock, config, host, reload flag)
//! - the interpreter itself behind a reentrant lock, so a hook fired from
//!   inside a callback on the same thread nests instead of deadlocking
//! - the shared script loader whose bytecode cache it runs
//!
//! The context outlives interpreter rebuilds, so the epoch stays monotonic
//! across reloads.

pub mod bigint;
pub mod dispatch;
pub mod globals;
pub mod object;
pub mod packet;
pub mod stack;
pub mod template;

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::c_void;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use mlua::{ChunkMode, Lua, Table, Value};
use parking_lot::ReentrantMutex;

use crate::binding::Bindings;
use crate::config::ElunaConfig;
use crate::core::ElunaInfo;
use crate::error::{ElunaError, Result};
use crate::host::Host;
use crate::loader::{CacheState, ElunaLoader, LuaScript, ScriptCache};

pub use object::{CallstackClock, ElunaObject};
pub use stack::{arg_error, CallFrame, Check, LuaState, ObjectGuid, Push};
pub use template::{ElunaGlobal, ElunaRegister, MethodCall, MethodScope, TypeRegistry};

// ---------------------------------------------------------------------------
// ElunaContext
// ---------------------------------------------------------------------------

pub struct ElunaContext {
    pub info: ElunaInfo,
    pub bindings: Bindings,
    pub clock: CallstackClock,
    pub config: Arc<ElunaConfig>,
    pub host: Arc<dyn Host>,
    reload_requested: AtomicBool,
    dispatches: AtomicU64,
}

impl ElunaContext {
    fn new(info: ElunaInfo, config: Arc<ElunaConfig>, host: Arc<dyn Host>) -> Self {
        Self {
            info,
            bindings: Bindings::new(),
            clock: CallstackClock::new(),
            config,
            host,
            reload_requested: AtomicBool::new(false),
            dispatches: AtomicU64::new(0),
        }
    }

    pub fn request_reload(&self) {
        self.reload_requested.store(true, Ordering::Release);
    }

    pub fn reload_requested(&self) -> bool {
        self.reload_requested.load(Ordering::Acquire)
    }

    fn count_dispatch(&self) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
    }
}

/// Context of the state that owns `lua`.
pub fn context(lua: &Lua) -> mlua::Result<Arc<ElunaContext>> {
    lua.app_data_ref::<Arc<ElunaContext>>()
        .map(|ctx| Arc::clone(&ctx))
        .ok_or_else(|| mlua::Error::runtime("interpreter has no Eluna context"))
}

// ---------------------------------------------------------------------------
// Eluna
// ---------------------------------------------------------------------------

pub struct Eluna {
    ctx: Arc<ElunaContext>,
    state: ReentrantMutex<RefCell<LuaState>>,
    loader: Arc<ElunaLoader>,
}

fn open_state(ctx: &Arc<ElunaContext>) -> mlua::Result<LuaState> {
    // SAFETY: the standard libraries are all loaded and cached scripts are
    // precompiled bytecode, neither of which the safe constructor allows.
    let lua = unsafe { Lua::unsafe_new() };
    lua.set_app_data(Arc::clone(ctx));

    object::install(&lua)?;
    bigint::register(&lua)?;

    let registry = TypeRegistry::new(&lua, ctx);
    packet::register(&registry)?;
    globals::register(&registry)?;
    ctx.host.register_types(&registry)?;

    LuaState::new(lua, Arc::clone(ctx))
}

impl Eluna {
    /// Build a state, run the scripts that apply to it and fire
    /// `OnLuaStateOpen`.
    pub fn new(
        info: ElunaInfo,
        config: Arc<ElunaConfig>,
        loader: Arc<ElunaLoader>,
        host: Arc<dyn Host>,
    ) -> Result<Self> {
        let ctx = Arc::new(ElunaContext::new(info, config, host));
        let state = open_state(&ctx)?;

        let eluna = Self {
            ctx,
            state: ReentrantMutex::new(RefCell::new(state)),
            loader,
        };
        eluna.run_scripts();
        eluna.on_lua_state_open();
        Ok(eluna)
    }

    pub fn info(&self) -> ElunaInfo {
        self.ctx.info
    }

    pub fn context(&self) -> &Arc<ElunaContext> {
        &self.ctx
    }

    pub fn bindings(&self) -> &Bindings {
        &self.ctx.bindings
    }

    pub fn loader(&self) -> &Arc<ElunaLoader> {
        &self.loader
    }

    pub fn current_epoch(&self) -> u64 {
        self.ctx.clock.current()
    }

    /// Number of dispatch cycles set up so far, across reloads.
    pub fn dispatch_count(&self) -> u64 {
        self.ctx.dispatches.load(Ordering::Relaxed)
    }

    /// Run `f` with the interpreter state. `None` while the state is being
    /// rebuilt.
    pub fn with_state<R>(&self, f: impl FnOnce(&LuaState) -> R) -> Option<R> {
        let guard = self.state.lock();
        let state = guard.try_borrow().ok()?;
        Some(f(&state))
    }

    pub fn with_lua<R>(&self, f: impl FnOnce(&Lua) -> R) -> Option<R> {
        self.with_state(|state| f(state.lua()))
    }

    pub fn stack_depth(&self) -> usize {
        self.with_state(LuaState::stack_depth).unwrap_or(0)
    }

    /// Execute a chunk of source in this state.
    pub fn run_string(&self, code: &str, name: &str) -> Result<()> {
        self.with_state(|state| state.lua().load(code).set_name(name).exec())
            .ok_or(ElunaError::Busy)?
            .map_err(ElunaError::from)
    }

    /// Invalidate the handle for a host object that is about to be freed.
    pub fn invalidate_object<T>(&self, ptr: *mut T) -> bool {
        self.with_state(|state| object::invalidate(state.lua(), ptr.cast::<c_void>()))
            .and_then(|r| r.ok())
            .unwrap_or(false)
    }

    pub fn request_reload(&self) {
        self.ctx.request_reload();
    }

    /// Per-tick safe point: apply a pending reload, then fire the world or
    /// map update hook.
    pub fn update(&self, diff: u32) {
        if self.ctx.reload_requested() && self.loader.state() == CacheState::Ready {
            self.reload_now();
        }

        if self.ctx.info.is_global() {
            self.on_world_update(diff);
        } else {
            self.on_map_update(diff);
            if self.ctx.info.instance_id != 0 {
                self.on_instance_update(diff);
            }
        }
    }

    fn reload_now(&self) {
        let guard = self.state.lock();
        // A dispatch or a running chunk still holds the state; retried at
        // the next safe point.
        if guard.try_borrow_mut().is_err() {
            return;
        }

        let fresh = match open_state(&self.ctx) {
            Ok(state) => state,
            Err(e) => {
                tracing::error!("[Eluna]: Failed to rebuild state, keeping the current one: {}", e);
                self.ctx.reload_requested.store(false, Ordering::Release);
                return;
            }
        };

        self.on_lua_state_close();
        self.ctx.bindings.clear_all();
        match guard.try_borrow_mut() {
            Ok(mut state) => *state = fresh,
            Err(_) => {
                tracing::error!("[Eluna]: State borrowed during reload");
                return;
            }
        }
        self.ctx.reload_requested.store(false, Ordering::Release);

        self.run_scripts();
        self.on_lua_state_open();
        tracing::info!(
            "[Eluna]: Reloaded state for map: {}, instance: {}",
            self.ctx.info.script_map_id(),
            self.ctx.info.instance_id
        );
    }

    fn applies(&self, script: &LuaScript) -> bool {
        self.ctx.config.compatibility_mode
            || script.map_id == -1
            || script.map_id == self.ctx.info.script_map_id()
    }

    /// Execute the cached scripts for this state in cache order.
    fn run_scripts(&self) {
        let cache = self.loader.cache();
        let start = Instant::now();

        let count = self.with_state(|state| {
            let lua = state.lua();
            if let Err(e) = set_require_paths(lua, &cache) {
                tracing::error!("[Eluna]: Failed to set require paths: {}", e);
            }

            let mut loaded: HashMap<&str, &Path> = HashMap::new();
            let mut count = 0;
            for script in cache.scripts.iter().filter(|s| self.applies(s)) {
                if let Some(previous) = loaded.get(script.filename.as_str()) {
                    tracing::error!(
                        "[Eluna]: Error loading `{}`. File with same name already loaded from `{}`, rename either file",
                        script.filepath.display(),
                        previous.display()
                    );
                    continue;
                }
                loaded.insert(&script.filename, &script.filepath);

                match run_chunk(lua, script) {
                    Ok(()) => count += 1,
                    Err(e) => tracing::error!("[Eluna]: Error loading `{}`: {}", script.filepath.display(), e),
                }
            }
            count
        });

        tracing::info!(
            "[Eluna]: Executed {} Lua scripts in {} ms for map: {}, instance: {}",
            count.unwrap_or(0),
            start.elapsed().as_millis(),
            self.ctx.info.script_map_id(),
            self.ctx.info.instance_id
        );
    }
}

fn set_require_paths(lua: &Lua, cache: &ScriptCache) -> mlua::Result<()> {
    let package: Table = lua.globals().get("package")?;
    package.set("path", cache.require_path.as_str())?;
    package.set("cpath", cache.require_cpath.as_str())?;
    Ok(())
}

fn run_chunk(lua: &Lua, script: &LuaScript) -> mlua::Result<()> {
    let value: Value = lua
        .load(script.bytecode.as_slice())
        .set_name(format!("@{}", script.filepath.display()))
        .set_mode(ChunkMode::Binary)
        .call(())?;

    let loaded: Table = lua.globals().get::<Table>("package")?.get("loaded")?;
    let value = if value.is_nil() { Value::Boolean(true) } else { value };
    loaded.set(script.filename.as_str(), value)
}
