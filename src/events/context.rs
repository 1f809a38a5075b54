use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;

use crate::error::Result;

/// Request-scoped cache shared by the handlers of one dispatch.
///
/// Lets several handlers reuse a derived value (an invoice looked up by
/// reference, say) without re-reading it per handler.
#[derive(Debug, Default)]
pub struct EventContext {
    cache: Mutex<HashMap<String, Value>>,
}

impl EventContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.cache.lock().unwrap().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: Value) {
        self.cache.lock().unwrap().insert(key.to_string(), value);
    }

    pub fn has(&self, key: &str) -> bool {
        self.cache.lock().unwrap().contains_key(key)
    }

    pub fn delete(&self, key: &str) {
        self.cache.lock().unwrap().remove(key);
    }

    /// Return the cached value for `key`, computing and caching it on first
    /// use. The factory runs at most once per context; a factory error is
    /// not cached, so the next caller retries.
    ///
    /// The lock is held across the factory call, so factories must not
    /// re-enter the context.
    pub fn get_or_compute<F>(&self, key: &str, factory: F) -> Result<Value>
    where
        F: FnOnce() -> Result<Value>,
    {
        let mut cache = self.cache.lock().unwrap();
        if let Some(v) = cache.get(key) {
            return Ok(v.clone());
        }
        let value = factory()?;
        cache.insert(key.to_string(), value.clone());
        Ok(value)
    }

    pub fn clear(&self) {
        self.cache.lock().unwrap().clear();
    }
}
