//! Lua sandbox creation
//!
//! Script steps run untrusted-ish build logic, so the interpreter state is
//! restricted: only the table, string, math, and coroutine standard
//! libraries are loaded, and the module-loading globals are removed. Every
//! other capability a script needs (logging, environment access, HTTP) is
//! registered explicitly by the caller through a bridge module.

use mlua::{Lua, LuaOptions, Result as LuaResult, StdLib};

/// Create a restricted Lua state
///
/// The sandbox prevents:
/// - file system access (no `io` library)
/// - process and clock access (no `os` library)
/// - loading external code (`require`, `dofile`, `loadfile` removed)
pub fn create_sandbox() -> LuaResult<Lua> {
    let lua = Lua::new_with(
        StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::COROUTINE,
        LuaOptions::default(),
    )?;

    lua.globals().set("require", mlua::Nil)?;
    lua.globals().set("dofile", mlua::Nil)?;
    lua.globals().set("loadfile", mlua::Nil)?;

    Ok(lua)
}
