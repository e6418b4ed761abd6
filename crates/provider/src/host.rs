//! The execution environment confines are evaluated against

use crate::facts::{FactCache, FactSource, StaticFacts};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Hands every host its own cache scope
static NEXT_SCOPE: AtomicUsize = AtomicUsize::new(0);

type Check = Arc<dyn Fn() -> bool + Send + Sync>;

/// Named capabilities of the host (`posix`, `root`, ...), checked lazily
#[derive(Clone, Default)]
pub struct FeatureSet {
    checks: IndexMap<String, Check>,
}

impl fmt::Debug for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.checks.keys()).finish()
    }
}

impl FeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a feature whose availability is decided by `check`
    pub fn with_check<F>(mut self, name: &str, check: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.checks.insert(name.to_lowercase(), Arc::new(check));
        self
    }

    /// Register a feature with a fixed answer
    pub fn with(self, name: &str, enabled: bool) -> Self {
        self.with_check(name, move || enabled)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.checks.keys().map(String::as_str)
    }

    fn detect(&self, name: &str) -> bool {
        self.checks.get(&name.to_lowercase()).is_some_and(|p| p())
    }
}

/// Facts, settings and features of the machine being configured
#[derive(Clone)]
pub struct Host {
    facts: Arc<dyn FactSource>,
    settings: HashMap<String, String>,
    features: FeatureSet,
    cache: Arc<FactCache>,
    /// Prefix for this host's fact and feature entries in a shared cache
    scope: usize,
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("scope", &self.scope)
            .field("settings", &self.settings)
            .field("features", &self.features)
            .field("cached", &self.cache.len())
            .finish()
    }
}

impl Host {
    pub fn new(facts: Arc<dyn FactSource>) -> Self {
        Self {
            facts,
            settings: HashMap::new(),
            features: FeatureSet::new(),
            cache: Arc::new(FactCache::new()),
            scope: NEXT_SCOPE.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// A host described entirely by a static fact map
    pub fn from_facts(facts: HashMap<String, String>) -> Self {
        Self::new(Arc::new(StaticFacts::new(facts)))
    }

    pub fn with_settings(mut self, settings: HashMap<String, String>) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_features(mut self, features: FeatureSet) -> Self {
        self.features = features;
        self
    }

    /// Share an existing cache, e.g. [`FactCache::shared`]
    pub fn with_cache(mut self, cache: Arc<FactCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &Arc<FactCache> {
        &self.cache
    }

    /// A fact value, cached for the rest of the run
    pub fn fact(&self, name: &str) -> Option<String> {
        let facts = Arc::clone(&self.facts);
        self.cache
            .get_or_compute(&format!("fact:{}:{name}", self.scope), || facts.fact(name))
    }

    pub fn facts(&self) -> HashMap<String, String> {
        self.facts.all()
    }

    /// A setting value; settings are read fresh on every call
    pub fn setting(&self, name: &str) -> Option<&str> {
        self.settings.get(name).map(String::as_str)
    }

    pub fn has_setting(&self, name: &str) -> bool {
        self.settings.contains_key(name)
    }

    /// Whether a named feature is available, cached for the rest of the run
    pub fn feature(&self, name: &str) -> bool {
        let features = &self.features;
        self.cache
            .get_or_compute(&format!("feature:{}:{name}", self.scope), || {
                features.detect(name).then(String::new)
            })
            .is_some()
    }

    /// Whether a file exists, or a bare command name resolves on `PATH`
    pub fn exists(&self, target: &str) -> bool {
        self.cache
            .get_or_compute(&format!("exists:{target}"), || {
                let found = if Path::new(target).is_absolute() {
                    Path::new(target).exists()
                } else {
                    which::which(target).is_ok()
                };
                found.then(String::new)
            })
            .is_some()
    }

    /// Drop every cached value; call once a run is over
    pub fn reset(&self) {
        self.cache.reset();
    }
}
