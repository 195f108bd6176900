//! Script-side object handles and the callstack epoch.
//!
//! A handle either points at a host-owned object (`Payload::Ref`, never
//! freed by the handle) or owns a value outright (`Payload::Owned`). Ref
//! handles are stamped with the epoch of the dispatch cycle that pushed them
//! and go stale once the clock moves past it.

use std::any::{Any, TypeId};
use std::ffi::c_void;
use std::sync::atomic::{AtomicU64, Ordering};

use mlua::{AnyUserData, LightUserData, Lua, MetaMethod, Table, UserData, UserDataMethods, Value};

use crate::host::NativeType;

/// Registry table: type name → method table.
pub(crate) const TYPES_KEY: &str = "eluna.types";
/// Registry table (weak values): pointer → handle.
pub(crate) const OBJECTS_KEY: &str = "eluna.objects";

// ---------------------------------------------------------------------------
// CallstackClock
// ---------------------------------------------------------------------------

/// Epoch source for one state. Starts at 1; 0 marks an invalidated handle.
#[derive(Debug)]
pub struct CallstackClock {
    epoch: AtomicU64,
}

impl CallstackClock {
    pub fn new() -> Self {
        Self { epoch: AtomicU64::new(1) }
    }

    pub fn current(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Move to the next epoch, staling every outstanding Ref handle.
    pub fn advance(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl Default for CallstackClock {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// ElunaObject
// ---------------------------------------------------------------------------

pub enum Payload {
    Ref { ptr: *mut c_void, epoch: u64 },
    Owned(Box<dyn Any + Send>),
}

pub struct ElunaObject {
    type_name: &'static str,
    type_id: TypeId,
    payload: Payload,
}

// Ref pointers are only dereferenced by the thread holding the state lock.
unsafe impl Send for ElunaObject {}

impl ElunaObject {
    fn new_ref<T: NativeType>(ptr: *mut T, epoch: u64) -> Self {
        Self {
            type_name: T::TYPE_NAME,
            type_id: TypeId::of::<T>(),
            payload: Payload::Ref { ptr: ptr.cast(), epoch },
        }
    }

    fn new_owned<T: NativeType + Send>(value: T) -> Self {
        Self {
            type_name: T::TYPE_NAME,
            type_id: TypeId::of::<T>(),
            payload: Payload::Owned(Box::new(value)),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is_owned(&self) -> bool {
        matches!(self.payload, Payload::Owned(_))
    }

    /// Owned handles are always valid; Ref handles only in their epoch.
    pub fn is_valid(&self, current: u64) -> bool {
        match self.payload {
            Payload::Ref { epoch, .. } => epoch != 0 && epoch == current,
            Payload::Owned(_) => true,
        }
    }

    pub fn invalidate(&mut self) {
        if let Payload::Ref { epoch, .. } = &mut self.payload {
            *epoch = 0;
        }
    }

    fn restamp(&mut self, current: u64) {
        if let Payload::Ref { epoch, .. } = &mut self.payload {
            *epoch = current;
        }
    }

    fn address(&self) -> usize {
        match &self.payload {
            Payload::Ref { ptr, .. } => *ptr as usize,
            Payload::Owned(b) => (&**b as *const (dyn Any + Send)).cast::<()>() as usize,
        }
    }

    /// Borrow the target as `T` if the handle is of that type.
    fn target_mut<T: NativeType>(&mut self) -> Option<&mut T> {
        if self.type_id != TypeId::of::<T>() {
            return None;
        }
        match &mut self.payload {
            // SAFETY: the type id matched and the caller checked the epoch; the
            // host guarantees the pointee outlives the dispatch cycle.
            Payload::Ref { ptr, .. } => Some(unsafe { &mut *ptr.cast::<T>() }),
            Payload::Owned(b) => b.downcast_mut::<T>(),
        }
    }
}

impl UserData for ElunaObject {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::Index, |lua, this, key: Value| {
            let types: Table = lua.named_registry_value(TYPES_KEY)?;
            match types.raw_get::<Option<Table>>(this.type_name)? {
                Some(table) => table.raw_get::<Value>(key),
                None => Ok(Value::Nil),
            }
        });

        methods.add_meta_method(MetaMethod::NewIndex, |_, this, (_key, _value): (Value, Value)| -> mlua::Result<()> {
            Err(mlua::Error::runtime(format!("attempt to modify a field of a {} handle", this.type_name)))
        });

        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            Ok(format!("{}: (0x{:x})", this.type_name, this.address()))
        });

        methods.add_meta_function(MetaMethod::Eq, |_, (a, b): (AnyUserData, AnyUserData)| {
            let (Ok(a), Ok(b)) = (a.borrow::<ElunaObject>(), b.borrow::<ElunaObject>()) else {
                return Ok(false);
            };
            Ok(a.type_id == b.type_id && a.address() == b.address())
        });
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub(crate) fn install(lua: &Lua) -> mlua::Result<()> {
    lua.set_named_registry_value(TYPES_KEY, lua.create_table()?)?;

    let store = lua.create_table()?;
    let mode = lua.create_table()?;
    mode.set("__mode", "v")?;
    store.set_metatable(Some(mode));
    lua.set_named_registry_value(OBJECTS_KEY, store)?;
    Ok(())
}

fn current_epoch(lua: &Lua) -> mlua::Result<u64> {
    Ok(super::context(lua)?.clock.current())
}

/// Push a host pointer. Repeated pushes of the same pointer reuse one handle,
/// re-stamped with the current epoch.
pub fn push_ref<T: NativeType>(lua: &Lua, ptr: *mut T) -> mlua::Result<Value> {
    if ptr.is_null() {
        return Ok(Value::Nil);
    }

    let types: Table = lua.named_registry_value(TYPES_KEY)?;
    if !types.contains_key(T::TYPE_NAME)? {
        tracing::error!("[Eluna]: `{}` missing metatable", T::TYPE_NAME);
        return Ok(Value::Nil);
    }

    let epoch = current_epoch(lua)?;
    let store: Table = lua.named_registry_value(OBJECTS_KEY)?;
    let key = LightUserData(ptr.cast());

    if let Value::UserData(ud) = store.raw_get::<Value>(key)? {
        let reused = match ud.borrow_mut::<ElunaObject>() {
            Ok(mut obj) if obj.type_id == TypeId::of::<T>() => {
                obj.restamp(epoch);
                true
            }
            _ => false,
        };
        if reused {
            return Ok(Value::UserData(ud));
        }
    }

    let ud = lua.create_userdata(ElunaObject::new_ref(ptr, epoch))?;
    store.raw_set(key, ud.clone())?;
    Ok(Value::UserData(ud))
}

/// Push a value the handle owns, e.g. a packet built by a script.
pub fn push_owned<T: NativeType + Send>(lua: &Lua, value: T) -> mlua::Result<Value> {
    let types: Table = lua.named_registry_value(TYPES_KEY)?;
    if !types.contains_key(T::TYPE_NAME)? {
        tracing::error!("[Eluna]: `{}` missing metatable", T::TYPE_NAME);
        return Ok(Value::Nil);
    }
    Ok(Value::UserData(lua.create_userdata(ElunaObject::new_owned(value))?))
}

/// Invalidate and forget the handle for `ptr`, if one exists.
pub fn invalidate(lua: &Lua, ptr: *mut c_void) -> mlua::Result<bool> {
    let store: Table = lua.named_registry_value(OBJECTS_KEY)?;
    let key = LightUserData(ptr);
    let Value::UserData(ud) = store.raw_get::<Value>(key)? else {
        return Ok(false);
    };
    if let Ok(mut obj) = ud.borrow_mut::<ElunaObject>() {
        obj.invalidate();
    }
    store.raw_set(key, Value::Nil)?;
    Ok(true)
}

/// Validity of any handle value; non-handles are never valid.
pub fn is_valid(lua: &Lua, value: &Value) -> mlua::Result<bool> {
    let Value::UserData(ud) = value else {
        return Ok(false);
    };
    let Ok(obj) = ud.borrow::<ElunaObject>() else {
        return Ok(false);
    };
    Ok(obj.is_valid(current_epoch(lua)?))
}

/// Run `f` on the object behind `value`.
///
/// `Ok(None)` means nil. `Err` carries the argument message:
/// "T expected, got X" or the stale-handle message.
///
/// For Ref handles the userdata borrow ends before `f` runs, so `f` may
/// dispatch hooks that push or use the same handle.
pub fn with_object<T: NativeType, R>(
    lua: &Lua,
    value: &Value,
    f: impl FnOnce(&mut T) -> R,
) -> Result<Option<R>, String> {
    let ud = match value {
        Value::Nil => return Ok(None),
        Value::UserData(ud) => ud,
        other => return Err(format!("{} expected, got {}", T::TYPE_NAME, other.type_name())),
    };

    let target = {
        let Ok(obj) = ud.borrow::<ElunaObject>() else {
            return Err(format!("{} expected, got userdata", T::TYPE_NAME));
        };

        let current = current_epoch(lua).map_err(|e| e.to_string())?;
        if !obj.is_valid(current) {
            return Err(format!(
                "{} expected, got pointer to nonexisting (invalidated) object ({}). Check your code.",
                T::TYPE_NAME,
                obj.type_name
            ));
        }
        if obj.type_id != TypeId::of::<T>() {
            return Err(format!("{} expected, got {}", T::TYPE_NAME, obj.type_name));
        }

        match obj.payload {
            Payload::Ref { ptr, .. } => Some(ptr.cast::<T>()),
            Payload::Owned(_) => None,
        }
    };

    match target {
        // SAFETY: type and epoch were checked above; the host guarantees the
        // pointee outlives the dispatch cycle that pushed it.
        Some(ptr) => Ok(Some(f(unsafe { &mut *ptr }))),
        None => {
            let Ok(mut obj) = ud.borrow_mut::<ElunaObject>() else {
                return Err(format!("{} is in use", T::TYPE_NAME));
            };
            match obj.target_mut::<T>() {
                Some(target) => Ok(Some(f(target))),
                None => Err(format!("{} expected, got {}", T::TYPE_NAME, obj.type_name)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy;
    impl NativeType for Dummy {
        const TYPE_NAME: &'static str = "Dummy";
    }

    #[test]
    fn test_clock_starts_at_one() {
        let clock = CallstackClock::new();
        assert_eq!(clock.current(), 1);
        assert_eq!(clock.advance(), 2);
        assert_eq!(clock.current(), 2);
    }

    #[test]
    fn test_ref_validity_follows_epoch() {
        let mut value = Dummy;
        let mut obj = ElunaObject::new_ref(&mut value as *mut Dummy, 3);
        assert!(obj.is_valid(3));
        assert!(!obj.is_valid(4));
        obj.restamp(4);
        assert!(obj.is_valid(4));
        obj.invalidate();
        assert!(!obj.is_valid(4));
        assert!(!obj.is_valid(0));
    }

    #[test]
    fn test_owned_is_always_valid() {
        let mut obj = ElunaObject::new_owned(Dummy);
        assert!(obj.is_owned());
        assert!(obj.is_valid(1));
        obj.invalidate();
        assert!(obj.is_valid(99));
        assert!(obj.target_mut::<Dummy>().is_some());
    }
}
