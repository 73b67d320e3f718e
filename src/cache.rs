//! Cache integration.
//!
//! The connection layer consumes a cache through the [`Cache`] trait for
//! query-result caching and lazy counter persistence; any backend can plug
//! in. [`MemoryCache`] is the in-process reference implementation used by
//! tests and the lazy counters when nothing else is supplied.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value as JsonValue;

/// Key/value cache consumed by the connection layer.
///
/// `inc`/`dec` adjust a numeric counter and return the new value, treating a
/// missing key as zero. Tagged entries can be invalidated as a group via
/// `clear_tag`.
pub trait Cache: Send + Sync {
    fn get(&self, key: &str) -> Option<JsonValue>;
    fn set(&self, key: &str, value: JsonValue, ttl: Option<Duration>);
    fn delete(&self, key: &str);
    fn has(&self, key: &str) -> bool;

    fn inc(&self, key: &str, step: f64) -> f64;

    fn dec(&self, key: &str, step: f64) -> f64 {
        self.inc(key, -step)
    }

    /// Store a value under a tag so `clear_tag` can drop the whole group.
    fn set_tagged(&self, tag: &str, key: &str, value: JsonValue, ttl: Option<Duration>);

    fn clear_tag(&self, tag: &str);
}

/// Tag-scoped handle over a cache.
pub struct TagScope<'a> {
    cache: &'a dyn Cache,
    tag: String,
}

impl<'a> TagScope<'a> {
    pub fn new(cache: &'a dyn Cache, tag: impl Into<String>) -> Self {
        Self {
            cache,
            tag: tag.into(),
        }
    }

    pub fn set(&self, key: &str, value: JsonValue, ttl: Option<Duration>) {
        self.cache.set_tagged(&self.tag, key, value, ttl);
    }

    pub fn clear(&self) {
        self.cache.clear_tag(&self.tag);
    }
}

struct Entry {
    value: JsonValue,
    expires: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires.is_some_and(|at| Instant::now() > at)
    }
}

#[derive(Default)]
struct MemoryInner {
    entries: HashMap<String, Entry>,
    tags: HashMap<String, HashSet<String>>,
}

/// In-process cache with TTL and tag support.
#[derive(Default)]
pub struct MemoryCache {
    inner: Mutex<MemoryInner>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Option<JsonValue> {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        match inner.entries.get(key) {
            Some(entry) if !entry.expired() => Some(entry.value.clone()),
            Some(_) => {
                inner.entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn set(&self, key: &str, value: JsonValue, ttl: Option<Duration>) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires: ttl.map(|d| Instant::now() + d),
            },
        );
    }

    fn delete(&self, key: &str) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.entries.remove(key);
    }

    fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn inc(&self, key: &str, step: f64) -> f64 {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        let current = inner
            .entries
            .get(key)
            .filter(|e| !e.expired())
            .and_then(|e| e.value.as_f64())
            .unwrap_or(0.0);
        let next = current + step;
        inner.entries.insert(
            key.to_string(),
            Entry {
                value: JsonValue::from(next),
                expires: None,
            },
        );
        next
    }

    fn set_tagged(&self, tag: &str, key: &str, value: JsonValue, ttl: Option<Duration>) {
        self.set(key, value, ttl);
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner
            .tags
            .entry(tag.to_string())
            .or_default()
            .insert(key.to_string());
    }

    fn clear_tag(&self, tag: &str) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        if let Some(keys) = inner.tags.remove(tag) {
            for key in keys {
                inner.entries.remove(&key);
            }
        }
    }
}
