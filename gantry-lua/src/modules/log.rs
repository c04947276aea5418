//! Logging module for pipeline scripts
//!
//! Scripts emit lines into the same per-pipeline log the other step kinds
//! write to; the sink trait keeps this crate independent of how the host
//! persists them.

use crate::module::BridgeModule;
use gantry_core::domain::log::LogLevel;
use mlua::prelude::*;
use std::sync::Arc;

/// Receiving end for script log lines
pub trait ScriptLogSink: Send + Sync {
    fn write(&self, level: LogLevel, message: &str);
}

/// Registers a global `log` table with one function per level
pub struct LogModule {
    sink: Arc<dyn ScriptLogSink>,
}

impl LogModule {
    pub fn new(sink: Arc<dyn ScriptLogSink>) -> Self {
        Self { sink }
    }

    fn level_fn(&self, lua: &Lua, level: LogLevel) -> LuaResult<LuaFunction> {
        let sink = self.sink.clone();
        lua.create_function(move |_, msg: String| {
            sink.write(level, &msg);
            Ok(())
        })
    }
}

impl BridgeModule for LogModule {
    fn id(&self) -> &'static str {
        "log"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let table = lua.create_table()?;
        table.set("debug", self.level_fn(lua, LogLevel::Debug)?)?;
        table.set("info", self.level_fn(lua, LogLevel::Info)?)?;
        table.set("warning", self.level_fn(lua, LogLevel::Warning)?)?;
        table.set("error", self.level_fn(lua, LogLevel::Error)?)?;

        lua.globals().set(self.id(), table)?;
        Ok(())
    }
}
