//! Fact lookup with a run-scoped cache
//!
//! Confines resolve facts, features and file existence checks through a
//! [`FactCache`]. Hosts built for a run share [`FactCache::shared`], the
//! process-wide instance, so it sits behind a mutex. Keys for facts and
//! features carry the owning host's scope; existence checks are about the
//! local filesystem and are shared. Callers reset the cache once a run is
//! over so the next run sees fresh values.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

static SHARED: LazyLock<Arc<FactCache>> = LazyLock::new(|| Arc::new(FactCache::new()));

/// Somewhere fact values come from
pub trait FactSource: Send + Sync {
    /// The raw value of a fact, if the host has one
    fn fact(&self, name: &str) -> Option<String>;

    /// Every fact this source knows, for seeding top scope
    fn all(&self) -> HashMap<String, String>;
}

/// A fixed set of facts, e.g. loaded from a file or supplied by a test
#[derive(Debug, Clone, Default)]
pub struct StaticFacts(HashMap<String, String>);

impl StaticFacts {
    pub fn new(facts: HashMap<String, String>) -> Self {
        Self(facts)
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.0.insert(name.to_string(), value.to_string());
        self
    }
}

impl FactSource for StaticFacts {
    fn fact(&self, name: &str) -> Option<String> {
        self.0.get(name).cloned()
    }

    fn all(&self) -> HashMap<String, String> {
        self.0.clone()
    }
}

/// Memoized lookups, valid until the next [`FactCache::reset`]
#[derive(Debug, Default)]
pub struct FactCache {
    values: Mutex<HashMap<String, Option<String>>>,
}

impl FactCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache
    pub fn shared() -> Arc<Self> {
        Arc::clone(&SHARED)
    }

    /// Return the cached value for `key`, computing it on first use
    ///
    /// The lock is not held while `compute` runs, so two callers racing on
    /// the same key may both compute it; the first insert wins.
    pub fn get_or_compute(&self, key: &str, compute: impl FnOnce() -> Option<String>) -> Option<String> {
        if let Some(value) = self.lock().get(key) {
            return value.clone();
        }
        let value = compute();
        self.lock()
            .entry(key.to_string())
            .or_insert(value)
            .clone()
    }

    /// Forget everything; called between runs
    pub fn reset(&self) {
        let mut values = self.lock();
        log::debug!("Resetting fact cache ({} entries)", values.len());
        values.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Option<String>>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
