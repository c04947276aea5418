use mlua::prelude::*;

/// Trait for host bridge modules.
///
/// Each module exposes one host capability to scripts as a global table.
/// The script executor registers a fresh set of modules onto a VM before
/// every run, binding them to the running step's log sink, environment,
/// and HTTP client; re-registration simply overwrites the globals left by
/// the previous step.
pub trait BridgeModule: Send + Sync {
    /// Global table name the module is reachable under in scripts.
    ///
    /// Must be a valid Lua identifier and unique across registered modules.
    fn id(&self) -> &'static str;

    /// Registers this module's functions into the Lua state.
    fn register(&self, lua: &Lua) -> LuaResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestModule;

    impl BridgeModule for TestModule {
        fn id(&self) -> &'static str {
            "test"
        }

        fn register(&self, lua: &Lua) -> LuaResult<()> {
            let table = lua.create_table()?;
            table.set("value", 42)?;
            lua.globals().set(self.id(), table)?;
            Ok(())
        }
    }

    #[test]
    fn test_module_registration() {
        let lua = Lua::new();
        TestModule.register(&lua).unwrap();

        let value: i32 = lua.load("return test.value").eval().unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_reregistration_overwrites() {
        let lua = Lua::new();
        TestModule.register(&lua).unwrap();
        lua.load("test.value = 7").exec().unwrap();

        TestModule.register(&lua).unwrap();
        let value: i32 = lua.load("return test.value").eval().unwrap();
        assert_eq!(value, 42);
    }
}
