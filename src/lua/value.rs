//! Conversion between runtime values and [`LuaValue`].

use crate::errors::{ChdkError, Result};
use crate::types::LuaValue;
use mlua::{IntoLua, Lua, Table, Value};
use std::collections::BTreeMap;

/// Tables nested deeper than this are assumed to be cyclic.
const MAX_DEPTH: usize = 32;

/// Convert a runtime value into native data.
///
/// Tables whose keys are exactly `1..n` become [`LuaValue::List`] (the empty
/// table included), all other tables become [`LuaValue::Table`] with their
/// keys stringified. Integral numbers are reported as integers.
pub fn from_lua(value: &Value) -> Result<LuaValue> {
    convert(value, 0)
}

fn convert(value: &Value, depth: usize) -> Result<LuaValue> {
    Ok(match value {
        Value::Nil => LuaValue::Nil,
        Value::Boolean(b) => LuaValue::Boolean(*b),
        Value::Integer(i) => LuaValue::Integer(*i as i64),
        Value::Number(n) => normalize_number(*n),
        Value::String(s) => match String::from_utf8(s.as_bytes().to_vec()) {
            Ok(text) => LuaValue::String(text),
            Err(e) => LuaValue::Bytes(e.into_bytes()),
        },
        Value::Table(t) => convert_table(t, depth)?,
        other => LuaValue::Opaque(other.type_name().to_string()),
    })
}

fn normalize_number(n: f64) -> LuaValue {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        LuaValue::Integer(n as i64)
    } else {
        LuaValue::Number(n)
    }
}

fn convert_table(table: &Table, depth: usize) -> Result<LuaValue> {
    if depth >= MAX_DEPTH {
        return Err(ChdkError::Runtime(
            "table nesting too deep, refusing to convert (cyclic table?)".to_string(),
        ));
    }

    let mut entries = Vec::new();
    for pair in table.clone().pairs::<Value, Value>() {
        let (key, value) = pair?;
        entries.push((key, convert(&value, depth + 1)?));
    }

    let mut indices: Vec<i64> = Vec::with_capacity(entries.len());
    for (key, _) in &entries {
        match sequence_index(key) {
            Some(i) => indices.push(i),
            None => break,
        }
    }

    if indices.len() == entries.len() {
        indices.sort_unstable();
        let contiguous = indices.iter().enumerate().all(|(pos, i)| *i == pos as i64 + 1);
        if contiguous {
            let mut items: Vec<(i64, LuaValue)> = entries
                .into_iter()
                .filter_map(|(k, v)| sequence_index(&k).map(|i| (i, v)))
                .collect();
            items.sort_by_key(|(i, _)| *i);
            return Ok(LuaValue::List(items.into_iter().map(|(_, v)| v).collect()));
        }
    }

    let mut map = BTreeMap::new();
    for (key, value) in entries {
        map.insert(key_to_string(&key), value);
    }
    Ok(LuaValue::Table(map))
}

fn sequence_index(key: &Value) -> Option<i64> {
    match key {
        Value::Integer(i) => Some(*i as i64),
        Value::Number(n) if n.fract() == 0.0 => Some(*n as i64),
        _ => None,
    }
}

fn key_to_string(key: &Value) -> String {
    match key {
        Value::String(s) => String::from_utf8_lossy(&s.as_bytes()).into_owned(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => match normalize_number(*n) {
            LuaValue::Integer(i) => i.to_string(),
            _ => n.to_string(),
        },
        Value::Boolean(b) => b.to_string(),
        other => other.type_name().to_string(),
    }
}

/// Convert native data into a runtime value. [`LuaValue::Opaque`] becomes `nil`.
pub fn to_lua(lua: &Lua, value: &LuaValue) -> Result<Value> {
    Ok(match value {
        LuaValue::Nil | LuaValue::Opaque(_) => Value::Nil,
        LuaValue::Boolean(b) => Value::Boolean(*b),
        LuaValue::Integer(i) => i.into_lua(lua)?,
        LuaValue::Number(n) => Value::Number(*n),
        LuaValue::String(s) => Value::String(lua.create_string(s)?),
        LuaValue::Bytes(b) => Value::String(lua.create_string(b)?),
        LuaValue::List(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                table.raw_set(i + 1, to_lua(lua, item)?)?;
            }
            Value::Table(table)
        }
        LuaValue::Table(map) => {
            let table = lua.create_table()?;
            for (key, item) in map {
                table.set(key.as_str(), to_lua(lua, item)?)?;
            }
            Value::Table(table)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(lua: &Lua, code: &str) -> LuaValue {
        let value: Value = lua.load(code).eval().unwrap();
        from_lua(&value).unwrap()
    }

    #[test]
    fn test_scalars() {
        let lua = Lua::new();
        assert_eq!(eval(&lua, "return nil"), LuaValue::Nil);
        assert_eq!(eval(&lua, "return true"), LuaValue::Boolean(true));
        assert_eq!(eval(&lua, "return 42"), LuaValue::Integer(42));
        assert_eq!(eval(&lua, "return 1.5"), LuaValue::Number(1.5));
        assert_eq!(eval(&lua, "return 'A/DCIM'"), LuaValue::from("A/DCIM"));
    }

    #[test]
    fn test_binary_string_becomes_bytes() {
        let lua = Lua::new();
        assert_eq!(
            eval(&lua, "return '\\255\\216\\255'"),
            LuaValue::Bytes(vec![0xff, 0xd8, 0xff])
        );
    }

    #[test]
    fn test_sequence_becomes_list() {
        let lua = Lua::new();
        assert_eq!(
            eval(&lua, "return {'a', 'b', 'c'}"),
            LuaValue::List(vec!["a".into(), "b".into(), "c".into()])
        );
        assert_eq!(eval(&lua, "return {}"), LuaValue::List(vec![]));
    }

    #[test]
    fn test_sparse_table_stays_a_map() {
        let lua = Lua::new();
        let value = eval(&lua, "return {[1] = 'a', [3] = 'c'}");
        let map = value.as_table().unwrap();
        assert_eq!(map.get("1"), Some(&LuaValue::from("a")));
        assert_eq!(map.get("3"), Some(&LuaValue::from("c")));
    }

    #[test]
    fn test_nested_tables() {
        let lua = Lua::new();
        let value = eval(
            &lua,
            "return {dir = 'A/DCIM/100CANON', exp = 12, raw = {size = 100}}",
        );
        assert_eq!(value.get("dir"), Some(&LuaValue::from("A/DCIM/100CANON")));
        assert_eq!(value.get("exp").and_then(LuaValue::as_i64), Some(12));
        assert_eq!(
            value.get("raw").and_then(|r| r.get("size")),
            Some(&LuaValue::Integer(100))
        );
    }

    #[test]
    fn test_cyclic_table_is_an_error() {
        let lua = Lua::new();
        let value: Value = lua.load("local t = {} t.self = t return t").eval().unwrap();
        assert!(from_lua(&value).is_err());
    }

    #[test]
    fn test_functions_are_opaque() {
        let lua = Lua::new();
        assert_eq!(
            eval(&lua, "return print"),
            LuaValue::Opaque("function".to_string())
        );
    }

    #[test]
    fn test_native_values_reach_lua() {
        let lua = Lua::new();
        let mut map = BTreeMap::new();
        map.insert("name".to_string(), LuaValue::from("IMG_0001.JPG"));
        map.insert(
            "sizes".to_string(),
            LuaValue::List(vec![LuaValue::Integer(1), LuaValue::Integer(2)]),
        );
        let value = to_lua(&lua, &LuaValue::Table(map)).unwrap();
        lua.globals().set("t", value).unwrap();
        let check: bool = lua
            .load("return t.name == 'IMG_0001.JPG' and #t.sizes == 2 and t.sizes[2] == 2")
            .eval()
            .unwrap();
        assert!(check);
    }
}
