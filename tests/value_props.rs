//! Property-based tests for values crossing the Lua boundary.
//!
//! Strings and numbers travel between the host, the embedded runtime and
//! the camera; these checks make sure nothing is lost on the way.

use chdkptp::device::ExecOptions;
use chdkptp::lua::{from_lua, to_lua, LuaContext};
use chdkptp::testing::mock_device;
use chdkptp::types::LuaValue;
use chdkptp::util::{lua_string_literal, Distance};
use proptest::prelude::*;

proptest! {
    /// Quoted strings evaluate back to the original text
    #[test]
    fn string_literals_survive_lua(text in any::<String>()) {
        let ctx = LuaContext::bare().unwrap();
        let value: mlua::Value = ctx.eval(&format!("return {}", lua_string_literal(&text))).unwrap();
        prop_assert_eq!(from_lua(&value).unwrap(), LuaValue::String(text));
    }

    /// Integers that fit a double exactly stay integers
    #[test]
    fn integers_stay_integers(n in -(1i64 << 52)..(1i64 << 52)) {
        let ctx = LuaContext::bare().unwrap();
        let value = to_lua(ctx.lua(), &LuaValue::Integer(n)).unwrap();
        prop_assert_eq!(from_lua(&value).unwrap(), LuaValue::Integer(n));
    }

    /// Lists keep their order and length
    #[test]
    fn lists_keep_order(items in prop::collection::vec(any::<i32>(), 1..16)) {
        let ctx = LuaContext::bare().unwrap();
        let list = LuaValue::List(items.iter().map(|i| LuaValue::Integer(i64::from(*i))).collect());
        let value = to_lua(ctx.lua(), &list).unwrap();
        prop_assert_eq!(from_lua(&value).unwrap(), list);
    }

    /// Millimetre distances are passed through unchanged
    #[test]
    fn millimetre_distances(mm in 0u32..1_000_000) {
        let distance: Distance = format!("{mm}mm").parse().unwrap();
        prop_assert_eq!(distance.to_mm(), i64::from(mm));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Text returned by a camera script arrives unchanged
    #[test]
    fn camera_returns_text_unchanged(text in "[ -~]{0,64}") {
        let device = mock_device().unwrap();
        let code = format!("return {}", lua_string_literal(&text));
        let value = device.lua_execute(&code, &ExecOptions::default()).unwrap();
        prop_assert_eq!(value, LuaValue::String(text));
    }
}
