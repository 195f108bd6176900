//! 64-bit integer value types.
//!
//! LuaJIT numbers are doubles, so 64-bit values travel as `LongLong` /
//! `ULongLong` userdata with full arithmetic and comparison metamethods.
//! Arithmetic wraps; dividing by zero raises "division by zero".

use mlua::{Lua, MetaMethod, UserData, UserDataMethods, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LongLong(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ULongLong(pub u64);

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

/// Read a signed 64-bit value from a handle, number or decimal string.
pub fn to_i64(value: &Value) -> Result<i64, String> {
    match value {
        Value::Integer(i) => Ok(*i as i64),
        Value::Number(n) => Ok(*n as i64),
        Value::String(s) => {
            let text = String::from_utf8_lossy(&*s.as_bytes()).into_owned();
            text.trim()
                .parse::<i64>()
                .map_err(|_| format!("string `{}` could not be converted to int64", text))
        }
        Value::UserData(ud) => {
            if let Ok(v) = ud.borrow::<LongLong>() {
                Ok(v.0)
            } else if let Ok(v) = ud.borrow::<ULongLong>() {
                Ok(v.0 as i64)
            } else {
                Err("int64 (as string) expected, got userdata".to_string())
            }
        }
        other => Err(format!("int64 (as string) expected, got {}", other.type_name())),
    }
}

/// Read an unsigned 64-bit value from a handle, number or decimal string.
pub fn to_u64(value: &Value) -> Result<u64, String> {
    match value {
        Value::Integer(i) => Ok(*i as u64),
        Value::Number(n) => Ok(*n as u64),
        Value::String(s) => {
            let text = String::from_utf8_lossy(&*s.as_bytes()).into_owned();
            text.trim()
                .parse::<u64>()
                .map_err(|_| format!("string `{}` could not be converted to uint64", text))
        }
        Value::UserData(ud) => {
            if let Ok(v) = ud.borrow::<ULongLong>() {
                Ok(v.0)
            } else if let Ok(v) = ud.borrow::<LongLong>() {
                Ok(v.0 as u64)
            } else {
                Err("uint64 (as string) expected, got userdata".to_string())
            }
        }
        other => Err(format!("uint64 (as string) expected, got {}", other.type_name())),
    }
}

fn operand_i64(value: &Value) -> mlua::Result<i64> {
    to_i64(value).map_err(mlua::Error::runtime)
}

fn operand_u64(value: &Value) -> mlua::Result<u64> {
    to_u64(value).map_err(mlua::Error::runtime)
}

fn division_by_zero() -> mlua::Error {
    mlua::Error::runtime("division by zero")
}

// ---------------------------------------------------------------------------
// LongLong
// ---------------------------------------------------------------------------

impl UserData for LongLong {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("GetObjectType", |_, _, ()| Ok("LongLong"));

        methods.add_meta_function(MetaMethod::Add, |_, (a, b): (Value, Value)| {
            Ok(LongLong(operand_i64(&a)?.wrapping_add(operand_i64(&b)?)))
        });
        methods.add_meta_function(MetaMethod::Sub, |_, (a, b): (Value, Value)| {
            Ok(LongLong(operand_i64(&a)?.wrapping_sub(operand_i64(&b)?)))
        });
        methods.add_meta_function(MetaMethod::Mul, |_, (a, b): (Value, Value)| {
            Ok(LongLong(operand_i64(&a)?.wrapping_mul(operand_i64(&b)?)))
        });
        methods.add_meta_function(MetaMethod::Div, |_, (a, b): (Value, Value)| {
            let divisor = operand_i64(&b)?;
            if divisor == 0 {
                return Err(division_by_zero());
            }
            Ok(LongLong(operand_i64(&a)?.wrapping_div(divisor)))
        });
        methods.add_meta_function(MetaMethod::Mod, |_, (a, b): (Value, Value)| {
            let divisor = operand_i64(&b)?;
            if divisor == 0 {
                return Err(division_by_zero());
            }
            Ok(LongLong(operand_i64(&a)?.wrapping_rem(divisor)))
        });
        methods.add_meta_function(MetaMethod::Pow, |_, (a, b): (Value, Value)| {
            let exp = u32::try_from(operand_i64(&b)?)
                .map_err(|_| mlua::Error::runtime("exponent must be between 0 and 4294967295"))?;
            Ok(LongLong(operand_i64(&a)?.wrapping_pow(exp)))
        });
        methods.add_meta_method(MetaMethod::Unm, |_, this, _: Value| Ok(LongLong(this.0.wrapping_neg())));

        methods.add_meta_function(MetaMethod::Eq, |_, (a, b): (Value, Value)| {
            Ok(operand_i64(&a)? == operand_i64(&b)?)
        });
        methods.add_meta_function(MetaMethod::Lt, |_, (a, b): (Value, Value)| {
            Ok(operand_i64(&a)? < operand_i64(&b)?)
        });
        methods.add_meta_function(MetaMethod::Le, |_, (a, b): (Value, Value)| {
            Ok(operand_i64(&a)? <= operand_i64(&b)?)
        });
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| Ok(this.0.to_string()));
    }
}

// ---------------------------------------------------------------------------
// ULongLong
// ---------------------------------------------------------------------------

impl UserData for ULongLong {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("GetObjectType", |_, _, ()| Ok("ULongLong"));

        methods.add_meta_function(MetaMethod::Add, |_, (a, b): (Value, Value)| {
            Ok(ULongLong(operand_u64(&a)?.wrapping_add(operand_u64(&b)?)))
        });
        methods.add_meta_function(MetaMethod::Sub, |_, (a, b): (Value, Value)| {
            Ok(ULongLong(operand_u64(&a)?.wrapping_sub(operand_u64(&b)?)))
        });
        methods.add_meta_function(MetaMethod::Mul, |_, (a, b): (Value, Value)| {
            Ok(ULongLong(operand_u64(&a)?.wrapping_mul(operand_u64(&b)?)))
        });
        methods.add_meta_function(MetaMethod::Div, |_, (a, b): (Value, Value)| {
            let divisor = operand_u64(&b)?;
            if divisor == 0 {
                return Err(division_by_zero());
            }
            Ok(ULongLong(operand_u64(&a)? / divisor))
        });
        methods.add_meta_function(MetaMethod::Mod, |_, (a, b): (Value, Value)| {
            let divisor = operand_u64(&b)?;
            if divisor == 0 {
                return Err(division_by_zero());
            }
            Ok(ULongLong(operand_u64(&a)? % divisor))
        });
        methods.add_meta_function(MetaMethod::Pow, |_, (a, b): (Value, Value)| {
            let exp = u32::try_from(operand_u64(&b)?)
                .map_err(|_| mlua::Error::runtime("exponent must be between 0 and 4294967295"))?;
            Ok(ULongLong(operand_u64(&a)?.wrapping_pow(exp)))
        });
        methods.add_meta_method(MetaMethod::Unm, |_, this, _: Value| Ok(ULongLong(this.0.wrapping_neg())));

        methods.add_meta_function(MetaMethod::Eq, |_, (a, b): (Value, Value)| {
            Ok(operand_u64(&a)? == operand_u64(&b)?)
        });
        methods.add_meta_function(MetaMethod::Lt, |_, (a, b): (Value, Value)| {
            Ok(operand_u64(&a)? < operand_u64(&b)?)
        });
        methods.add_meta_function(MetaMethod::Le, |_, (a, b): (Value, Value)| {
            Ok(operand_u64(&a)? <= operand_u64(&b)?)
        });
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| Ok(this.0.to_string()));
    }
}

/// Install `CreateLongLong` / `CreateULongLong`.
pub(crate) fn register(lua: &Lua) -> mlua::Result<()> {
    let globals = lua.globals();
    globals.set(
        "CreateLongLong",
        lua.create_function(|_, value: Option<Value>| {
            let value = value.unwrap_or(Value::Integer(0));
            to_i64(&value)
                .map(LongLong)
                .map_err(|msg| mlua::Error::runtime(format!("bad argument #1 to 'CreateLongLong' ({})", msg)))
        })?,
    )?;
    globals.set(
        "CreateULongLong",
        lua.create_function(|_, value: Option<Value>| {
            let value = value.unwrap_or(Value::Integer(0));
            to_u64(&value)
                .map(ULongLong)
                .map_err(|msg| mlua::Error::runtime(format!("bad argument #1 to 'CreateULongLong' ({})", msg)))
        })?,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lua() -> Lua {
        let lua = Lua::new();
        register(&lua).unwrap();
        lua
    }

    #[test]
    fn test_arithmetic() {
        let lua = lua();
        let s: String = lua
            .load(r#"return tostring((CreateLongLong("9000000000") + 1) * 2 - 2)"#)
            .eval()
            .unwrap();
        assert_eq!(s, "18000000000");

        let s: String = lua.load(r#"return tostring(CreateLongLong(17) % 5)"#).eval().unwrap();
        assert_eq!(s, "2");

        let s: String = lua.load(r#"return tostring(CreateULongLong(2) ^ 40)"#).eval().unwrap();
        assert_eq!(s, "1099511627776");
    }

    #[test]
    fn test_wrapping() {
        let lua = lua();
        let s: String = lua
            .load(r#"return tostring(CreateLongLong("9223372036854775807") + 1)"#)
            .eval()
            .unwrap();
        assert_eq!(s, "-9223372036854775808");

        let s: String = lua.load(r#"return tostring(-CreateULongLong(1))"#).eval().unwrap();
        assert_eq!(s, "18446744073709551615");

        let s: String = lua
            .load(r#"return tostring(CreateLongLong("-9223372036854775808") / -1)"#)
            .eval()
            .unwrap();
        assert_eq!(s, "-9223372036854775808");
    }

    #[test]
    fn test_division_by_zero() {
        let lua = lua();
        let err = lua.load("return CreateLongLong(1) / 0").exec().unwrap_err();
        assert!(err.to_string().contains("division by zero"));

        let err = lua.load("return CreateULongLong(1) % CreateULongLong(0)").exec().unwrap_err();
        assert!(err.to_string().contains("division by zero"));
    }

    #[test]
    fn test_comparisons() {
        let lua = lua();
        let ok: bool = lua
            .load(
                r#"
                local a, b = CreateLongLong(-5), CreateLongLong(3)
                return a < b and a <= a and not (b < a) and a == CreateLongLong(-5)
                "#,
            )
            .eval()
            .unwrap();
        assert!(ok);
    }

    #[test]
    fn test_conversion_errors() {
        assert!(to_i64(&Value::Boolean(true)).unwrap_err().contains("int64 (as string) expected"));

        let lua = lua();
        let err = lua.load(r#"return CreateULongLong("12abc")"#).exec().unwrap_err();
        assert!(err.to_string().contains("could not be converted"));
    }

    #[test]
    fn test_object_type() {
        let lua = lua();
        let name: String = lua.load("return CreateULongLong(1):GetObjectType()").eval().unwrap();
        assert_eq!(name, "ULongLong");
    }
}
