//! Reusable interpreter pool
//!
//! Instances are created lazily when the pool is empty and returned after
//! successful runs. The pool never evicts: under contention it grows past
//! its initial capacity and stays there. Step concurrency is bounded by
//! the worker count, so the steady-state size converges there too.

use mlua::{Lua, Result as LuaResult};
use std::sync::Mutex;

use crate::sandbox::create_sandbox;

/// Mutex-guarded stack of idle sandboxed VMs
pub struct VmPool {
    idle: Mutex<Vec<Lua>>,
}

impl VmPool {
    /// Creates a pool that preallocates room for `capacity` idle VMs
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    /// Takes an idle VM, creating a fresh sandbox when none is available
    pub fn get(&self) -> LuaResult<Lua> {
        if let Some(lua) = self.idle.lock().expect("pool lock").pop() {
            return Ok(lua);
        }
        create_sandbox()
    }

    /// Returns a VM for reuse
    ///
    /// Interrupted or poisoned VMs should be dropped instead of returned.
    pub fn put(&self, lua: Lua) {
        self.idle.lock().expect("pool lock").push(lua);
    }

    /// Number of idle VMs currently held
    pub fn idle_count(&self) -> usize {
        self.idle.lock().expect("pool lock").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_creates_lazily() {
        let pool = VmPool::with_capacity(2);
        assert_eq!(pool.idle_count(), 0);

        let lua = pool.get().unwrap();
        assert_eq!(pool.idle_count(), 0);

        pool.put(lua);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_pool_reuses_returned_vm() {
        let pool = VmPool::with_capacity(1);

        let lua = pool.get().unwrap();
        lua.globals().set("marker", 99).unwrap();
        pool.put(lua);

        let reused = pool.get().unwrap();
        let marker: i32 = reused.load("return marker").eval().unwrap();
        assert_eq!(marker, 99);
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn test_pool_grows_past_capacity() {
        let pool = VmPool::with_capacity(1);

        let a = pool.get().unwrap();
        let b = pool.get().unwrap();
        pool.put(a);
        pool.put(b);
        assert_eq!(pool.idle_count(), 2);
    }
}
