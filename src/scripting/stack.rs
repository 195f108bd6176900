//! Working stack, value marshalling and the frame primitives.
//!
//! Hook call sites push their arguments, then drive one dispatch cycle:
//!
//! ```text
//! push*  →  setup_stack  →  call_one_function × N  →  clean_up_stack
//! ```
//!
//! Layout during a cycle (bottom to top):
//! `event_id, [arguments], [functions not yet called], [results]`.
//! Functions are stored in reverse so the top one is always the next in
//! registration order.

use std::cell::{Cell, RefCell};
use std::sync::Arc;

use mlua::{Function, Lua, MultiValue, Value};

use super::bigint::{self, LongLong, ULongLong};
use super::object;
use super::ElunaContext;
use crate::binding::BindingQuery;
use crate::host::NativeType;

// ---------------------------------------------------------------------------
// Push
// ---------------------------------------------------------------------------

/// Conversion of a native value into a script value.
///
/// Total: allocation failures are logged and produce nil.
pub trait Push {
    fn push_value(self, lua: &Lua) -> Value;
}

fn or_nil(what: &str, result: mlua::Result<Value>) -> Value {
    result.unwrap_or_else(|e| {
        tracing::error!("[Eluna]: failed to push {}: {}", what, e);
        Value::Nil
    })
}

impl Push for () {
    fn push_value(self, _: &Lua) -> Value {
        Value::Nil
    }
}

impl Push for Value {
    fn push_value(self, _: &Lua) -> Value {
        self
    }
}

impl Push for bool {
    fn push_value(self, _: &Lua) -> Value {
        Value::Boolean(self)
    }
}

macro_rules! push_integer {
    ($($t:ty),*) => {$(
        impl Push for $t {
            fn push_value(self, _: &Lua) -> Value {
                Value::Integer(self as mlua::Integer)
            }
        }
    )*};
}

push_integer!(i8, i16, i32, u8, u16, u32);

impl Push for f32 {
    fn push_value(self, _: &Lua) -> Value {
        Value::Number(f64::from(self))
    }
}

impl Push for f64 {
    fn push_value(self, _: &Lua) -> Value {
        Value::Number(self)
    }
}

impl Push for &str {
    fn push_value(self, lua: &Lua) -> Value {
        or_nil("string", lua.create_string(self).map(Value::String))
    }
}

impl Push for String {
    fn push_value(self, lua: &Lua) -> Value {
        self.as_str().push_value(lua)
    }
}

impl Push for i64 {
    fn push_value(self, lua: &Lua) -> Value {
        or_nil("LongLong", lua.create_userdata(LongLong(self)).map(Value::UserData))
    }
}

impl Push for u64 {
    fn push_value(self, lua: &Lua) -> Value {
        or_nil("ULongLong", lua.create_userdata(ULongLong(self)).map(Value::UserData))
    }
}

impl Push for Function {
    fn push_value(self, _: &Lua) -> Value {
        Value::Function(self)
    }
}

impl<T: Push> Push for Option<T> {
    fn push_value(self, lua: &Lua) -> Value {
        match self {
            Some(v) => v.push_value(lua),
            None => Value::Nil,
        }
    }
}

impl<T: NativeType> Push for &mut T {
    fn push_value(self, lua: &Lua) -> Value {
        or_nil(T::TYPE_NAME, object::push_ref(lua, self as *mut T))
    }
}

/// 64-bit object identifier, pushed as `ULongLong`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectGuid(pub u64);

impl Push for ObjectGuid {
    fn push_value(self, lua: &Lua) -> Value {
        self.0.push_value(lua)
    }
}

// ---------------------------------------------------------------------------
// Check
// ---------------------------------------------------------------------------

/// Conversion of a script value into a native value.
///
/// The error is the inner argument message, e.g.
/// "value must be less than or equal to 255"; callers wrap it into
/// "bad argument #N to 'f' (...)".
pub trait Check: Sized {
    fn check(lua: &Lua, value: &Value) -> Result<Self, String>;
}

/// Format a script argument error.
pub fn arg_error(narg: usize, fname: &str, msg: &str) -> mlua::Error {
    mlua::Error::runtime(format!("bad argument #{} to '{}' ({})", narg, fname, msg))
}

fn number(value: &Value) -> Result<f64, String> {
    match value {
        Value::Integer(i) => Ok(*i as f64),
        Value::Number(n) => Ok(*n),
        Value::String(s) => {
            let text = String::from_utf8_lossy(&*s.as_bytes()).into_owned();
            text.trim()
                .parse::<f64>()
                .map_err(|_| "number expected, got string".to_string())
        }
        other => Err(format!("number expected, got {}", other.type_name())),
    }
}

impl Check for bool {
    fn check(_: &Lua, value: &Value) -> Result<Self, String> {
        Ok(!matches!(value, Value::Nil | Value::Boolean(false)))
    }
}

macro_rules! check_integer {
    ($($t:ty),*) => {$(
        impl Check for $t {
            fn check(_: &Lua, value: &Value) -> Result<Self, String> {
                let n = number(value)?;
                if n > <$t>::MAX as f64 {
                    Err(format!("value must be less than or equal to {}", <$t>::MAX))
                } else if n < <$t>::MIN as f64 {
                    Err(format!("value must be greater than or equal to {}", <$t>::MIN))
                } else {
                    Ok(n as $t)
                }
            }
        }
    )*};
}

check_integer!(i8, i16, i32, u8, u16, u32);

impl Check for f32 {
    fn check(_: &Lua, value: &Value) -> Result<Self, String> {
        number(value).map(|n| n as f32)
    }
}

impl Check for f64 {
    fn check(_: &Lua, value: &Value) -> Result<Self, String> {
        number(value)
    }
}

impl Check for String {
    fn check(_: &Lua, value: &Value) -> Result<Self, String> {
        match value {
            Value::String(s) => Ok(String::from_utf8_lossy(&*s.as_bytes()).into_owned()),
            Value::Integer(i) => Ok(i.to_string()),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(format!("string expected, got {}", other.type_name())),
        }
    }
}

impl Check for i64 {
    fn check(_: &Lua, value: &Value) -> Result<Self, String> {
        bigint::to_i64(value)
    }
}

impl Check for u64 {
    fn check(_: &Lua, value: &Value) -> Result<Self, String> {
        bigint::to_u64(value)
    }
}

impl Check for ObjectGuid {
    fn check(lua: &Lua, value: &Value) -> Result<Self, String> {
        u64::check(lua, value).map(ObjectGuid)
    }
}

impl Check for Function {
    fn check(_: &Lua, value: &Value) -> Result<Self, String> {
        match value {
            Value::Function(f) => Ok(f.clone()),
            other => Err(format!("function expected, got {}", other.type_name())),
        }
    }
}

impl Check for Value {
    fn check(_: &Lua, value: &Value) -> Result<Self, String> {
        Ok(value.clone())
    }
}

// ---------------------------------------------------------------------------
// LuaState
// ---------------------------------------------------------------------------

/// One interpreter with its working stack.
///
/// Every method takes `&self`; nested dispatch re-enters through the same
/// shared reference, so no `RefCell` borrow is held across a script call.
pub struct LuaState {
    pub(crate) lua: Lua,
    pub(crate) ctx: Arc<ElunaContext>,
    stack: RefCell<Vec<Value>>,
    push_counter: Cell<usize>,
    event_level: Cell<u32>,
    traceback_call: Option<Function>,
}

/// Indices of one dispatch cycle on the working stack.
#[derive(Debug)]
pub struct CallFrame {
    /// Position of the event id; arguments follow it.
    base: usize,
    arg_count: usize,
    func_count: usize,
    result_base: usize,
    result_count: usize,
}

impl CallFrame {
    pub fn functions_left(&self) -> usize {
        self.func_count
    }

    pub fn arg_count(&self) -> usize {
        self.arg_count
    }

    pub fn result_count(&self) -> usize {
        self.result_count
    }

    fn arg_base(&self) -> usize {
        self.base + 1
    }

    fn functions_top(&self) -> usize {
        self.arg_base() + self.arg_count + self.func_count
    }
}

// xpcall in 5.1 takes no extra arguments, so the call is wrapped in a closure.
const TRACEBACK_CALL: &str = r#"
local traceback, unpack, select = debug.traceback, unpack, select
return function(f, ...)
    local n = select('#', ...)
    local args = { ... }
    return xpcall(function() return f(unpack(args, 1, n)) end, traceback)
end
"#;

impl LuaState {
    pub(crate) fn new(lua: Lua, ctx: Arc<ElunaContext>) -> mlua::Result<Self> {
        let traceback_call = if ctx.config.traceback {
            Some(lua.load(TRACEBACK_CALL).set_name("=eluna_traceback").eval::<Function>()?)
        } else {
            None
        };

        Ok(Self {
            lua,
            ctx,
            stack: RefCell::new(Vec::new()),
            push_counter: Cell::new(0),
            event_level: Cell::new(0),
            traceback_call,
        })
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// Current dispatch nesting depth.
    pub fn event_level(&self) -> u32 {
        self.event_level.get()
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.borrow().len()
    }

    pub fn push_counter(&self) -> usize {
        self.push_counter.get()
    }

    /// Push one argument for the next `setup_stack`.
    pub fn push<V: Push>(&self, value: V) {
        let value = value.push_value(&self.lua);
        self.stack.borrow_mut().push(value);
        self.push_counter.set(self.push_counter.get() + 1);
    }

    /// Insert the event id below the last `nargs` pushed values and append
    /// every callback bound in `sources`.
    ///
    /// Panics if `nargs` differs from the number of values pushed since the
    /// previous cycle started.
    pub fn setup_stack(&self, sources: &[&dyn BindingQuery], event_id: u32, nargs: usize) -> CallFrame {
        assert_eq!(
            nargs,
            self.push_counter.get(),
            "setup_stack: {} arguments declared but {} pushed",
            nargs,
            self.push_counter.get()
        );
        self.push_counter.set(0);

        let mut functions = Vec::new();
        for source in sources {
            if let Err(e) = source.push_refs(&self.lua, &mut functions) {
                tracing::error!("[Eluna]: failed to fetch callbacks for event {}: {}", event_id, e);
            }
        }
        self.ctx.count_dispatch();

        let mut stack = self.stack.borrow_mut();
        assert!(stack.len() >= nargs, "setup_stack: stack holds fewer than {} values", nargs);
        let base = stack.len() - nargs;
        stack.insert(base, Value::Integer(event_id as mlua::Integer));

        let func_count = functions.len();
        stack.extend(functions.into_iter().rev());

        CallFrame {
            base,
            arg_count: nargs,
            func_count,
            result_base: stack.len(),
            result_count: 0,
        }
    }

    /// Call the next callback with the event id and arguments, leaving
    /// exactly `nres` results (nil padded) on top. Results of the previous
    /// call are discarded first.
    pub fn call_one_function(&self, frame: &mut CallFrame, nres: usize) {
        assert!(frame.func_count > 0, "call_one_function: no callbacks left");

        let (callee, args) = {
            let mut stack = self.stack.borrow_mut();
            stack.truncate(frame.functions_top());
            let callee = stack.pop().unwrap_or(Value::Nil);
            frame.func_count -= 1;
            let args: MultiValue = stack[frame.base..frame.arg_base() + frame.arg_count]
                .iter()
                .cloned()
                .collect();
            (callee, args)
        };

        let results = self.execute_call(callee, args, nres);

        let mut stack = self.stack.borrow_mut();
        frame.result_base = stack.len();
        frame.result_count = results.len();
        stack.extend(results);
    }

    fn execute_call(&self, callee: Value, args: MultiValue, nres: usize) -> Vec<Value> {
        let mut results = Vec::with_capacity(nres);

        match callee {
            Value::Function(f) => {
                self.event_level.set(self.event_level.get() + 1);
                let outcome = self.protected_call(f, args);
                self.event_level.set(self.event_level.get() - 1);

                match outcome {
                    Ok(values) => results.extend(values.into_iter().take(nres)),
                    Err(msg) => tracing::error!("[Eluna]: {}", msg),
                }
            }
            other => {
                tracing::error!("[Eluna]: registered value is {}, not a function", other.type_name());
            }
        }

        results.resize(nres, Value::Nil);
        results
    }

    fn protected_call(&self, f: Function, mut args: MultiValue) -> Result<MultiValue, String> {
        let Some(helper) = &self.traceback_call else {
            return f.call::<MultiValue>(args).map_err(|e| e.to_string());
        };

        args.push_front(Value::Function(f));
        let values = helper.call::<MultiValue>(args).map_err(|e| e.to_string())?;
        let mut values = values.into_iter();
        match values.next() {
            Some(Value::Boolean(true)) => Ok(values.collect()),
            _ => Err(match values.next() {
                Some(Value::String(s)) => String::from_utf8_lossy(&*s.as_bytes()).into_owned(),
                Some(other) => format!("error object is a {} value", other.type_name()),
                None => "unknown error".to_string(),
            }),
        }
    }

    /// Result `i` of the last call.
    pub fn result(&self, frame: &CallFrame, i: usize) -> Value {
        if i >= frame.result_count {
            return Value::Nil;
        }
        self.stack
            .borrow()
            .get(frame.result_base + i)
            .cloned()
            .unwrap_or(Value::Nil)
    }

    /// Result `i` converted with `Check`; nil gives `None`, a failed
    /// conversion is logged and gives `None`.
    pub fn result_as<V: Check>(&self, frame: &CallFrame, i: usize) -> Option<V> {
        let value = self.result(frame, i);
        if value.is_nil() {
            return None;
        }
        match V::check(&self.lua, &value) {
            Ok(v) => Some(v),
            Err(msg) => {
                tracing::error!("[Eluna]: bad return value #{} ({})", i + 1, msg);
                None
            }
        }
    }

    /// Result `i` if it is a number, converted with `Check`. Any other value
    /// means "no replacement" and is ignored silently.
    pub fn result_number<V: Check>(&self, frame: &CallFrame, i: usize) -> Option<V> {
        match self.result(frame, i) {
            Value::Integer(_) | Value::Number(_) => self.result_as(frame, i),
            _ => None,
        }
    }

    /// Run `f` on the handle returned as result `i`, if it is a valid `T`.
    pub fn result_object<T: NativeType, R>(&self, frame: &CallFrame, i: usize, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let value = self.result(frame, i);
        match object::with_object::<T, R>(&self.lua, &value, f) {
            Ok(r) => r,
            Err(msg) => {
                tracing::error!("[Eluna]: bad return value #{} ({})", i + 1, msg);
                None
            }
        }
    }

    pub fn pop_results(&self, frame: &mut CallFrame) {
        self.stack.borrow_mut().truncate(frame.result_base);
        frame.result_count = 0;
    }

    /// Overwrite argument `index` (0-based, event id excluded) so later
    /// callbacks observe `value`.
    pub fn replace_argument<V: Push>(&self, frame: &CallFrame, index: usize, value: V) {
        assert!(index < frame.arg_count, "replace_argument: index {} out of {}", index, frame.arg_count);
        let value = value.push_value(&self.lua);
        self.stack.borrow_mut()[frame.arg_base() + index] = value;
    }

    /// Drop the frame. Only the argument window may remain; the stack returns
    /// to its depth before the first push. At depth zero the epoch advances.
    pub fn clean_up_stack(&self, mut frame: CallFrame) {
        self.pop_results(&mut frame);
        {
            let mut stack = self.stack.borrow_mut();
            assert_eq!(frame.func_count, 0, "clean_up_stack: {} callbacks not called", frame.func_count);
            assert_eq!(
                stack.len(),
                frame.arg_base() + frame.arg_count,
                "clean_up_stack: unbalanced stack"
            );
            stack.truncate(frame.base);
        }

        if self.event_level.get() == 0 {
            self.ctx.clock.advance();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_ranges() {
        let lua = Lua::new();
        assert_eq!(u8::check(&lua, &Value::Integer(255)).unwrap(), 255);
        assert_eq!(
            u8::check(&lua, &Value::Integer(256)).unwrap_err(),
            "value must be less than or equal to 255"
        );
        assert_eq!(
            u32::check(&lua, &Value::Integer(-1)).unwrap_err(),
            "value must be greater than or equal to 0"
        );
        assert_eq!(
            i8::check(&lua, &Value::Number(-129.0)).unwrap_err(),
            "value must be greater than or equal to -128"
        );
        assert_eq!(i32::check(&lua, &Value::Number(12.0)).unwrap(), 12);
    }

    #[test]
    fn test_number_expected() {
        let lua = Lua::new();
        assert_eq!(
            i32::check(&lua, &Value::Boolean(true)).unwrap_err(),
            "number expected, got boolean"
        );
        let s = Value::String(lua.create_string(" 42 ").unwrap());
        assert_eq!(u16::check(&lua, &s).unwrap(), 42);
    }

    #[test]
    fn test_bool_truthiness() {
        let lua = Lua::new();
        assert!(!bool::check(&lua, &Value::Nil).unwrap());
        assert!(!bool::check(&lua, &Value::Boolean(false)).unwrap());
        assert!(bool::check(&lua, &Value::Integer(0)).unwrap());
    }

    #[test]
    fn test_string_accepts_numbers() {
        let lua = Lua::new();
        assert_eq!(String::check(&lua, &Value::Integer(7)).unwrap(), "7");
        assert!(String::check(&lua, &Value::Nil).is_err());
    }

    #[test]
    fn test_push_64bit_as_userdata() {
        let lua = Lua::new();
        match 5i64.push_value(&lua) {
            Value::UserData(ud) => assert_eq!(ud.borrow::<LongLong>().unwrap().0, 5),
            other => panic!("unexpected {}", other.type_name()),
        }
        assert_eq!(u64::check(&lua, &ObjectGuid(9).push_value(&lua)).unwrap(), 9);
        assert!(None::<u32>.push_value(&lua).is_nil());
    }

    #[test]
    fn test_arg_error_format() {
        let err = arg_error(2, "SetLevel", "number expected, got nil");
        assert!(err.to_string().contains("bad argument #2 to 'SetLevel' (number expected, got nil)"));
    }
}
