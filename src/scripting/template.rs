//! Method tables for handle types and global functions.
//!
//! Each entry is wrapped in a thunk that resolves `self`, runs the native
//! method and checks the declared result count against what was pushed.
//! In multi-state mode an entry whose scope excludes the current state is
//! replaced by a stub that raises when called.

use std::sync::Arc;

use mlua::{Function, Lua, MultiValue, Table, Value};

use super::object::{self, TYPES_KEY};
use super::stack::{arg_error, Check, Push};
use super::ElunaContext;
use crate::core::ElunaInfo;
use crate::host::NativeType;

/// Which states a method exists in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodScope {
    None,
    World,
    Map,
    All,
}

pub type Method<T> = fn(&mut MethodCall<'_>, &mut T) -> mlua::Result<usize>;
pub type GlobalMethod = fn(&mut MethodCall<'_>) -> mlua::Result<usize>;

pub struct ElunaRegister<T: 'static> {
    pub name: &'static str,
    /// `None` registers a stub for methods this host does not implement.
    pub method: Option<Method<T>>,
    pub scope: MethodScope,
}

impl<T: 'static> ElunaRegister<T> {
    pub const fn new(name: &'static str, method: Method<T>) -> Self {
        Self { name, method: Some(method), scope: MethodScope::All }
    }

    pub const fn scoped(name: &'static str, method: Method<T>, scope: MethodScope) -> Self {
        Self { name, method: Some(method), scope }
    }

    pub const fn unimplemented(name: &'static str) -> Self {
        Self { name, method: None, scope: MethodScope::All }
    }
}

pub struct ElunaGlobal {
    pub name: &'static str,
    pub method: Option<GlobalMethod>,
    pub scope: MethodScope,
}

impl ElunaGlobal {
    pub const fn new(name: &'static str, method: GlobalMethod) -> Self {
        Self { name, method: Some(method), scope: MethodScope::All }
    }

    pub const fn world(name: &'static str, method: GlobalMethod) -> Self {
        Self { name, method: Some(method), scope: MethodScope::World }
    }

    pub const fn map(name: &'static str, method: GlobalMethod) -> Self {
        Self { name, method: Some(method), scope: MethodScope::Map }
    }

    pub const fn unimplemented(name: &'static str) -> Self {
        Self { name, method: None, scope: MethodScope::All }
    }
}

// ---------------------------------------------------------------------------
// MethodCall
// ---------------------------------------------------------------------------

/// Arguments and results of one native call.
///
/// Argument numbers are the ones scripts see: for methods `self` is #1.
pub struct MethodCall<'lua> {
    lua: &'lua Lua,
    name: &'static str,
    args: Vec<Value>,
    first_arg: usize,
    results: Vec<Value>,
}

impl<'lua> MethodCall<'lua> {
    fn new(lua: &'lua Lua, name: &'static str, args: Vec<Value>, first_arg: usize) -> Self {
        Self { lua, name, args, first_arg, results: Vec::new() }
    }

    pub fn lua(&self) -> &'lua Lua {
        self.lua
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn context(&self) -> mlua::Result<Arc<ElunaContext>> {
        super::context(self.lua)
    }

    pub fn arg_count(&self) -> usize {
        self.args.len() + self.first_arg - 1
    }

    pub fn arg(&self, narg: usize) -> Value {
        narg.checked_sub(self.first_arg)
            .and_then(|i| self.args.get(i))
            .cloned()
            .unwrap_or(Value::Nil)
    }

    pub fn arg_error(&self, narg: usize, msg: &str) -> mlua::Error {
        arg_error(narg, self.name, msg)
    }

    pub fn check<V: Check>(&self, narg: usize) -> mlua::Result<V> {
        V::check(self.lua, &self.arg(narg)).map_err(|msg| self.arg_error(narg, &msg))
    }

    /// Like `check`, but nil or a missing argument yields `default`.
    pub fn check_or<V: Check>(&self, narg: usize, default: V) -> mlua::Result<V> {
        match self.arg(narg) {
            Value::Nil => Ok(default),
            value => V::check(self.lua, &value).map_err(|msg| self.arg_error(narg, &msg)),
        }
    }

    /// Run `f` on the handle at `narg`. With `required = false` a mismatched
    /// or stale handle gives `Ok(None)` instead of an error.
    pub fn check_object<T: NativeType, R>(
        &self,
        narg: usize,
        required: bool,
        f: impl FnOnce(&mut T) -> R,
    ) -> mlua::Result<Option<R>> {
        match object::with_object::<T, R>(self.lua, &self.arg(narg), f) {
            Ok(Some(r)) => Ok(Some(r)),
            Ok(None) if required => {
                Err(self.arg_error(narg, &format!("{} expected, got nil", T::TYPE_NAME)))
            }
            Ok(None) => Ok(None),
            Err(msg) if required => Err(self.arg_error(narg, &msg)),
            Err(_) => Ok(None),
        }
    }

    /// Push one result. Returns 1 so methods can sum their pushes.
    pub fn push<V: Push>(&mut self, value: V) -> usize {
        let value = value.push_value(self.lua);
        self.results.push(value);
        1
    }

    fn finish(self, declared: usize) -> MultiValue {
        if self.results.len() != declared {
            tracing::error!(
                "[Eluna]: {} returned unexpected amount of arguments {} out of {}. Report to devs",
                self.name,
                self.results.len(),
                declared
            );
            return MultiValue::new();
        }
        self.results.into_iter().collect()
    }
}

// ---------------------------------------------------------------------------
// TypeRegistry
// ---------------------------------------------------------------------------

/// Installs method tables and globals into one fresh interpreter.
pub struct TypeRegistry<'a> {
    lua: &'a Lua,
    info: ElunaInfo,
    compatibility: bool,
}

impl<'a> TypeRegistry<'a> {
    pub(crate) fn new(lua: &'a Lua, ctx: &ElunaContext) -> Self {
        Self {
            lua,
            info: ctx.info,
            compatibility: ctx.config.compatibility_mode,
        }
    }

    pub fn lua(&self) -> &'a Lua {
        self.lua
    }

    fn in_scope(&self, scope: MethodScope) -> bool {
        if self.compatibility {
            return true;
        }
        match scope {
            MethodScope::None => false,
            MethodScope::World => self.info.is_global(),
            MethodScope::Map => !self.info.is_global(),
            MethodScope::All => true,
        }
    }

    fn scope_stub(&self) -> mlua::Result<Function> {
        let map_id = self.info.script_map_id();
        self.lua.create_function(move |_, _: MultiValue| -> mlua::Result<()> {
            Err(mlua::Error::runtime(format!(
                "attempt to call a method that does not exist for state: {}",
                map_id
            )))
        })
    }

    fn unimplemented_stub(&self, name: &'static str) -> mlua::Result<Function> {
        self.lua.create_function(move |_, _: MultiValue| -> mlua::Result<()> {
            Err(mlua::Error::runtime(format!(
                "attempt to call method '{}' that is not implemented on this core",
                name
            )))
        })
    }

    /// Method table for `T`, created (and exposed as a global of the type's
    /// name) on first use.
    fn type_table<T: NativeType>(&self) -> mlua::Result<Table> {
        let types: Table = self.lua.named_registry_value(TYPES_KEY)?;
        if let Some(table) = types.raw_get::<Option<Table>>(T::TYPE_NAME)? {
            return Ok(table);
        }

        let table = self.lua.create_table()?;
        table.raw_set(
            "GetObjectType",
            self.lua.create_function(|_, _: MultiValue| Ok(T::TYPE_NAME))?,
        )?;
        table.raw_set(
            "IsValid",
            self.lua.create_function(|lua, this: Value| object::is_valid(lua, &this))?,
        )?;
        types.raw_set(T::TYPE_NAME, table.clone())?;
        self.lua.globals().set(T::TYPE_NAME, table.clone())?;
        Ok(table)
    }

    /// Register `T` and install `methods` into its table.
    pub fn register<T: NativeType>(&self, methods: &[ElunaRegister<T>]) -> mlua::Result<()> {
        let table = self.type_table::<T>()?;
        for reg in methods {
            let function = match reg.method {
                _ if !self.in_scope(reg.scope) => self.scope_stub()?,
                None => self.unimplemented_stub(reg.name)?,
                Some(method) => method_thunk::<T>(self.lua, reg.name, method)?,
            };
            table.raw_set(reg.name, function)?;
        }
        Ok(())
    }

    pub fn register_globals(&self, globals: &[ElunaGlobal]) -> mlua::Result<()> {
        let table = self.lua.globals();
        for reg in globals {
            let function = match reg.method {
                _ if !self.in_scope(reg.scope) => self.scope_stub()?,
                None => self.unimplemented_stub(reg.name)?,
                Some(method) => global_thunk(self.lua, reg.name, method)?,
            };
            table.set(reg.name, function)?;
        }
        Ok(())
    }
}

fn method_thunk<T: NativeType>(lua: &Lua, name: &'static str, method: Method<T>) -> mlua::Result<Function> {
    lua.create_function(move |lua, args: MultiValue| {
        let mut args = args.into_iter();
        let this = args.next().unwrap_or(Value::Nil);
        let mut call = MethodCall::new(lua, name, args.collect(), 2);

        let declared = match object::with_object::<T, _>(lua, &this, |target| method(&mut call, target)) {
            Ok(Some(result)) => result?,
            Ok(None) => {
                return Err(call.arg_error(1, &format!("{} expected, got nil", T::TYPE_NAME)));
            }
            Err(msg) => return Err(call.arg_error(1, &msg)),
        };
        Ok(call.finish(declared))
    })
}

fn global_thunk(lua: &Lua, name: &'static str, method: GlobalMethod) -> mlua::Result<Function> {
    lua.create_function(move |lua, args: MultiValue| {
        let mut call = MethodCall::new(lua, name, args.into_iter().collect(), 1);
        let declared = method(&mut call)?;
        Ok(call.finish(declared))
    })
}
