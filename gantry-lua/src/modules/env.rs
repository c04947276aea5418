//! Environment module for pipeline scripts
//!
//! The environment is the inter-step channel: values written here are
//! visible to every later step and to `${NAME}` rendering. `env.fail` is
//! the script-facing way to mark the whole pipeline as failed; the
//! processor treats that signal as authoritative even when the script
//! itself returns cleanly.

use crate::module::BridgeModule;
use mlua::prelude::*;
use std::sync::Arc;

/// Host-side access to the pipeline's shared environment
pub trait EnvBridge: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    /// Marks the pipeline as failed with the given reason
    fn fail(&self, reason: &str);
}

/// Registers a global `env` table with `get`, `set`, and `fail`
pub struct EnvModule {
    bridge: Arc<dyn EnvBridge>,
}

impl EnvModule {
    pub fn new(bridge: Arc<dyn EnvBridge>) -> Self {
        Self { bridge }
    }
}

impl BridgeModule for EnvModule {
    fn id(&self) -> &'static str {
        "env"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let table = lua.create_table()?;

        {
            let bridge = self.bridge.clone();
            table.set(
                "get",
                lua.create_function(move |_, (name, default): (String, Option<String>)| {
                    Ok(bridge.get(&name).or(default))
                })?,
            )?;
        }

        {
            let bridge = self.bridge.clone();
            table.set(
                "set",
                lua.create_function(move |_, (name, value): (String, String)| {
                    bridge.set(&name, &value);
                    Ok(())
                })?,
            )?;
        }

        {
            let bridge = self.bridge.clone();
            table.set(
                "fail",
                lua.create_function(move |_, reason: String| {
                    bridge.fail(&reason);
                    Ok(())
                })?,
            )?;
        }

        lua.globals().set(self.id(), table)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::{ProcessCtx, SharedEnv};

    struct SharedEnvBridge(SharedEnv);

    impl EnvBridge for SharedEnvBridge {
        fn get(&self, key: &str) -> Option<String> {
            self.0.get(key)
        }

        fn set(&self, key: &str, value: &str) {
            self.0.set(key, value);
        }

        fn fail(&self, reason: &str) {
            self.0.fail(reason);
        }
    }

    fn module_with_env() -> (Lua, SharedEnv) {
        let env = SharedEnv::new(ProcessCtx::new());
        let lua = Lua::new();
        EnvModule::new(Arc::new(SharedEnvBridge(env.clone())))
            .register(&lua)
            .unwrap();
        (lua, env)
    }

    #[test]
    fn test_env_get_set() {
        let (lua, env) = module_with_env();
        env.set("EXISTING", "old");

        lua.load(r#"env.set("NEW", env.get("EXISTING") .. "-suffix")"#)
            .exec()
            .unwrap();
        assert_eq!(env.get("NEW"), Some("old-suffix".to_string()));

        let missing: Option<String> = lua.load(r#"return env.get("MISSING")"#).eval().unwrap();
        assert_eq!(missing, None);

        let defaulted: String = lua
            .load(r#"return env.get("MISSING", "fallback")"#)
            .eval()
            .unwrap();
        assert_eq!(defaulted, "fallback");
    }

    #[test]
    fn test_env_fail_writes_status_variables() {
        let (lua, env) = module_with_env();

        lua.load(r#"env.fail("bad input")"#).exec().unwrap();
        assert!(env.pipeline_failed());
        assert_eq!(env.fail_reason(), "bad input");
    }
}
