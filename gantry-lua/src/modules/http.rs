//! Outbound HTTP module for pipeline scripts
//!
//! Calls return a `(status, body, error_message)` triple instead of
//! raising, so scripts can branch on transport failures without pcall.
//! The bridge is synchronous; script steps already run on a blocking
//! thread.

use crate::module::BridgeModule;
use mlua::prelude::*;
use std::sync::Arc;

/// Outcome of one outbound HTTP call
#[derive(Debug, Clone, Default)]
pub struct HttpExchange {
    /// HTTP status code, 0 when the request never completed
    pub status: u16,
    pub body: String,
    /// Transport error message, empty on success
    pub error: String,
}

impl HttpExchange {
    /// An exchange representing a transport-level failure
    pub fn transport_error(message: impl Into<String>) -> Self {
        Self {
            status: 0,
            body: String::new(),
            error: message.into(),
        }
    }
}

/// Host-side outbound HTTP client
pub trait HttpBridge: Send + Sync {
    fn get(&self, url: &str) -> HttpExchange;
    fn post(&self, url: &str, body: &str, content_type: &str) -> HttpExchange;

    fn post_json(&self, url: &str, body: &str) -> HttpExchange {
        self.post(url, body, "application/json")
    }
}

/// Registers a global `http` table with `get`, `post`, and `post_json`
pub struct HttpModule {
    bridge: Arc<dyn HttpBridge>,
}

impl HttpModule {
    pub fn new(bridge: Arc<dyn HttpBridge>) -> Self {
        Self { bridge }
    }
}

fn exchange_to_tuple(exchange: HttpExchange) -> (u16, String, String) {
    (exchange.status, exchange.body, exchange.error)
}

impl BridgeModule for HttpModule {
    fn id(&self) -> &'static str {
        "http"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let table = lua.create_table()?;

        {
            let bridge = self.bridge.clone();
            table.set(
                "get",
                lua.create_function(move |_, url: String| {
                    Ok(exchange_to_tuple(bridge.get(&url)))
                })?,
            )?;
        }

        {
            let bridge = self.bridge.clone();
            table.set(
                "post",
                lua.create_function(
                    move |_, (url, body, content_type): (String, String, String)| {
                        Ok(exchange_to_tuple(bridge.post(&url, &body, &content_type)))
                    },
                )?,
            )?;
        }

        {
            let bridge = self.bridge.clone();
            table.set(
                "post_json",
                lua.create_function(move |_, (url, body): (String, String)| {
                    Ok(exchange_to_tuple(bridge.post_json(&url, &body)))
                })?,
            )?;
        }

        lua.globals().set(self.id(), table)?;
        Ok(())
    }
}
