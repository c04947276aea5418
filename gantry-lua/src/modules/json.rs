//! JSON module for pipeline scripts
//!
//! `encode` and `decode` return a `(result, error_message)` pair; the
//! error message is empty on success. Conversion goes through
//! [`ScriptValue`], so only null/bool/number/string/list/map shapes cross
//! the boundary.

use crate::module::BridgeModule;
use crate::value::ScriptValue;
use mlua::prelude::*;

/// Registers a global `json` table with `encode` and `decode`
pub struct JsonModule;

impl BridgeModule for JsonModule {
    fn id(&self) -> &'static str {
        "json"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let table = lua.create_table()?;

        table.set(
            "encode",
            lua.create_function(|_, value: LuaValue| {
                let encoded = ScriptValue::from_lua(&value)
                    .map_err(|e| e.to_string())
                    .and_then(|v| v.encode_json().map_err(|e| e.to_string()));
                match encoded {
                    Ok(text) => Ok((text, String::new())),
                    Err(message) => Ok((String::new(), message)),
                }
            })?,
        )?;

        table.set(
            "decode",
            lua.create_function(|lua, text: String| {
                match ScriptValue::decode_json(&text) {
                    Ok(value) => Ok((value.into_lua(lua)?, String::new())),
                    Err(e) => Ok((LuaValue::Nil, e.to_string())),
                }
            })?,
        )?;

        lua.globals().set(self.id(), table)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lua_with_json() -> Lua {
        let lua = Lua::new();
        JsonModule.register(&lua).unwrap();
        lua
    }

    #[test]
    fn test_encode_map() {
        let lua = lua_with_json();
        let (text, err): (String, String) = lua
            .load(r#"return json.encode({name = "gantry", count = 3})"#)
            .eval()
            .unwrap();
        assert_eq!(err, "");
        assert_eq!(text, r#"{"count":3.0,"name":"gantry"}"#);
    }

    #[test]
    fn test_decode_into_table() {
        let lua = lua_with_json();
        let name: String = lua
            .load(
                r#"
                local parsed, err = json.decode('{"name": "gantry", "tags": ["a", "b"]}')
                assert(err == "")
                return parsed.name .. "/" .. parsed.tags[2]
            "#,
            )
            .eval()
            .unwrap();
        assert_eq!(name, "gantry/b");
    }

    #[test]
    fn test_decode_error_is_reported_not_raised() {
        let lua = lua_with_json();
        let (value, err): (LuaValue, String) =
            lua.load(r#"return json.decode("{broken")"#).eval().unwrap();
        assert!(matches!(value, LuaValue::Nil));
        assert!(!err.is_empty());
    }
}
