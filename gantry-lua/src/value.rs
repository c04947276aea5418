//! Capability-neutral script values
//!
//! [`ScriptValue`] is the tagged value exchanged at the host/script
//! boundary: null, boolean, number, string, ordered list, or string-keyed
//! map. The interpreter side converts it to and from native Lua values;
//! the host side bridges it to JSON for the `json` module and for any
//! external serialization.

use mlua::prelude::*;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<ScriptValue>),
    Map(BTreeMap<String, ScriptValue>),
}

impl ScriptValue {
    /// Converts a Lua value into a [`ScriptValue`]
    ///
    /// A table whose keys are all integers becomes a list ordered by key;
    /// any other table becomes a string-keyed map. Values with no neutral
    /// representation (functions, userdata) become null, and scalar
    /// non-string map keys are stringified.
    pub fn from_lua(value: &LuaValue) -> LuaResult<ScriptValue> {
        match value {
            LuaValue::Nil => Ok(ScriptValue::Null),
            LuaValue::Boolean(b) => Ok(ScriptValue::Bool(*b)),
            LuaValue::Integer(i) => Ok(ScriptValue::Number(*i as f64)),
            LuaValue::Number(n) => Ok(ScriptValue::Number(*n)),
            LuaValue::String(s) => Ok(ScriptValue::String(s.to_str()?.to_string())),
            LuaValue::Table(table) => Self::from_lua_table(table),
            _ => Ok(ScriptValue::Null),
        }
    }

    fn from_lua_table(table: &LuaTable) -> LuaResult<ScriptValue> {
        let mut integer_keyed: Vec<(i64, ScriptValue)> = Vec::new();
        let mut is_list = true;

        let mut entries: Vec<(LuaValue, LuaValue)> = Vec::new();
        for pair in table.clone().pairs::<LuaValue, LuaValue>() {
            let (key, value) = pair?;
            if is_list {
                if let LuaValue::Integer(i) = key {
                    integer_keyed.push((i, Self::from_lua(&value)?));
                } else {
                    is_list = false;
                }
            }
            entries.push((key, value));
        }

        if is_list {
            integer_keyed.sort_by_key(|(i, _)| *i);
            return Ok(ScriptValue::List(
                integer_keyed.into_iter().map(|(_, v)| v).collect(),
            ));
        }

        let mut map = BTreeMap::new();
        for (key, value) in entries {
            let key = match &key {
                LuaValue::String(s) => s.to_str()?.to_string(),
                LuaValue::Integer(i) => i.to_string(),
                LuaValue::Number(n) => n.to_string(),
                LuaValue::Boolean(b) => b.to_string(),
                other => {
                    return Err(LuaError::RuntimeError(format!(
                        "unsupported table key type: {}",
                        other.type_name()
                    )));
                }
            };
            map.insert(key, Self::from_lua(&value)?);
        }

        Ok(ScriptValue::Map(map))
    }

    /// Converts this value into a native Lua value
    pub fn into_lua(&self, lua: &Lua) -> LuaResult<LuaValue> {
        match self {
            ScriptValue::Null => Ok(LuaValue::Nil),
            ScriptValue::Bool(b) => Ok(LuaValue::Boolean(*b)),
            ScriptValue::Number(n) => Ok(LuaValue::Number(*n)),
            ScriptValue::String(s) => Ok(LuaValue::String(lua.create_string(s)?)),
            ScriptValue::List(items) => {
                let table = lua.create_table()?;
                for (idx, item) in items.iter().enumerate() {
                    table.set(idx + 1, item.into_lua(lua)?)?;
                }
                Ok(LuaValue::Table(table))
            }
            ScriptValue::Map(entries) => {
                let table = lua.create_table()?;
                for (key, item) in entries {
                    table.set(key.as_str(), item.into_lua(lua)?)?;
                }
                Ok(LuaValue::Table(table))
            }
        }
    }

    /// Bridges this value to a JSON value
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ScriptValue::Null => serde_json::Value::Null,
            ScriptValue::Bool(b) => serde_json::Value::Bool(*b),
            ScriptValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ScriptValue::String(s) => serde_json::Value::String(s.clone()),
            ScriptValue::List(items) => {
                serde_json::Value::Array(items.iter().map(ScriptValue::to_json).collect())
            }
            ScriptValue::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Builds a value from parsed JSON
    pub fn from_json(value: &serde_json::Value) -> ScriptValue {
        match value {
            serde_json::Value::Null => ScriptValue::Null,
            serde_json::Value::Bool(b) => ScriptValue::Bool(*b),
            serde_json::Value::Number(n) => ScriptValue::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => ScriptValue::String(s.clone()),
            serde_json::Value::Array(items) => {
                ScriptValue::List(items.iter().map(ScriptValue::from_json).collect())
            }
            serde_json::Value::Object(entries) => ScriptValue::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), ScriptValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Serializes this value as JSON text
    pub fn encode_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_json())
    }

    /// Parses JSON text into a value
    pub fn decode_json(text: &str) -> Result<ScriptValue, serde_json::Error> {
        let parsed: serde_json::Value = serde_json::from_str(text)?;
        Ok(Self::from_json(&parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_keyed_table_is_ordered_list() {
        let lua = Lua::new();
        let value: LuaValue = lua.load(r#"return {"a", "b", "c"}"#).eval().unwrap();

        let converted = ScriptValue::from_lua(&value).unwrap();
        assert_eq!(
            converted,
            ScriptValue::List(vec![
                ScriptValue::String("a".to_string()),
                ScriptValue::String("b".to_string()),
                ScriptValue::String("c".to_string()),
            ])
        );
    }

    #[test]
    fn test_string_keyed_table_is_map() {
        let lua = Lua::new();
        let value: LuaValue = lua
            .load(r#"return {name = "gantry", count = 2, ok = true}"#)
            .eval()
            .unwrap();

        let converted = ScriptValue::from_lua(&value).unwrap();
        let ScriptValue::Map(map) = converted else {
            panic!("expected a map");
        };
        assert_eq!(map.get("name"), Some(&ScriptValue::String("gantry".to_string())));
        assert_eq!(map.get("count"), Some(&ScriptValue::Number(2.0)));
        assert_eq!(map.get("ok"), Some(&ScriptValue::Bool(true)));
    }

    #[test]
    fn test_nested_table_conversion() {
        let lua = Lua::new();
        let value: LuaValue = lua
            .load(r#"return {items = {1, 2}, meta = {kind = "x"}}"#)
            .eval()
            .unwrap();

        let converted = ScriptValue::from_lua(&value).unwrap();
        let ScriptValue::Map(map) = converted else {
            panic!("expected a map");
        };
        assert_eq!(
            map.get("items"),
            Some(&ScriptValue::List(vec![
                ScriptValue::Number(1.0),
                ScriptValue::Number(2.0),
            ]))
        );
    }

    #[test]
    fn test_function_value_becomes_null() {
        let lua = Lua::new();
        let value: LuaValue = lua.load(r#"return function() end"#).eval().unwrap();
        assert_eq!(ScriptValue::from_lua(&value).unwrap(), ScriptValue::Null);
    }

    #[test]
    fn test_into_lua_list_indexing() {
        let lua = Lua::new();
        let value = ScriptValue::List(vec![
            ScriptValue::String("first".to_string()),
            ScriptValue::Number(2.0),
        ]);

        lua.globals()
            .set("v", value.into_lua(&lua).unwrap())
            .unwrap();
        let first: String = lua.load("return v[1]").eval().unwrap();
        let second: f64 = lua.load("return v[2]").eval().unwrap();
        assert_eq!(first, "first");
        assert_eq!(second, 2.0);
    }

    #[test]
    fn test_json_bridge() {
        let decoded = ScriptValue::decode_json(r#"{"a": [1, "x"], "b": null}"#).unwrap();
        let ScriptValue::Map(map) = &decoded else {
            panic!("expected a map");
        };
        assert_eq!(map.get("b"), Some(&ScriptValue::Null));

        let encoded = decoded.encode_json().unwrap();
        assert_eq!(ScriptValue::decode_json(&encoded).unwrap(), decoded);
    }
}
