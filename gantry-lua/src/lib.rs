//! Gantry Lua Infrastructure
//!
//! Embedded-interpreter support for script steps:
//! - A restricted Lua sandbox with no I/O, OS, or module-loading access
//! - The bridge-module trait and the host capability modules scripts see
//!   (`log`, `env`, `http`, `json`)
//! - [`ScriptValue`], the capability-neutral tagged value exchanged at the
//!   host/script boundary
//! - A reusable VM pool

pub mod module;
pub mod modules;
pub mod pool;
pub mod sandbox;
pub mod value;

pub use module::BridgeModule;
pub use modules::{EnvBridge, EnvModule, HttpBridge, HttpExchange, HttpModule, JsonModule,
    LogModule, ScriptLogSink};
pub use pool::VmPool;
pub use sandbox::create_sandbox;
pub use value::ScriptValue;
