//! Provider registration and selection
//!
//! Providers are registered per resource type at startup. For each lookup
//! the registry keeps the suitable ones (every confine holds), prefers those
//! marked default for the host's facts, ranks them by how specific that
//! default match is, and on a tie takes the most recently registered one.

use crate::confine::{Confine, ConfineSet};
use crate::error::{Error, Result};
use crate::host::Host;
use crate::provider::Provider;
use catalog::{Resource, normalize_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// One `defaultfor` declaration: fact name (or `feature`) to accepted values
pub type DefaultFor = Vec<(String, Vec<String>)>;

/// A provider as registered for a resource type
#[derive(Clone)]
pub struct ProviderEntry {
    pub type_name: String,
    pub name: String,
    pub confines: ConfineSet,
    pub defaults: Vec<DefaultFor>,
    pub provider: Arc<dyn Provider>,
}

impl fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("type_name", &self.type_name)
            .field("name", &self.name)
            .field("confines", &self.confines)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl ProviderEntry {
    pub fn new(type_name: &str, name: &str, provider: Arc<dyn Provider>) -> Self {
        Self {
            type_name: normalize_name(type_name),
            name: name.to_lowercase(),
            confines: ConfineSet::new(),
            defaults: Vec::new(),
            provider,
        }
    }

    pub fn confine(mut self, confine: Confine) -> Self {
        self.confines.push(confine);
        self
    }

    /// Mark this provider as the default wherever every pair matches
    pub fn defaultfor(mut self, pairs: &[(&str, &[&str])]) -> Self {
        self.defaults.push(
            pairs
                .iter()
                .map(|(key, values)| {
                    (
                        key.to_string(),
                        values.iter().map(|v| v.to_lowercase()).collect(),
                    )
                })
                .collect(),
        );
        self
    }

    pub fn suitable(&self, host: &Host) -> bool {
        self.confines.suitable(host)
    }

    /// The first `defaultfor` declaration matching the host
    pub fn default_match(&self, host: &Host) -> Option<&DefaultFor> {
        self.defaults.iter().find(|default| {
            default.iter().all(|(key, values)| {
                if key == "feature" {
                    values.iter().all(|f| host.feature(f))
                } else {
                    host.fact(key)
                        .is_some_and(|v| values.iter().any(|want| want.eq_ignore_ascii_case(&v)))
                }
            })
        })
    }

    /// `100 * len(matching defaultfor)`, 0 when nothing matches
    pub fn specificity(&self, host: &Host) -> usize {
        self.default_match(host).map_or(0, |m| m.len() * 100)
    }
}

/// Every registered provider, grouped by resource type in registration order
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    by_type: HashMap<String, Vec<ProviderEntry>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider; re-registering a name replaces it and moves it
    /// to the end of the registration order
    pub fn register(&mut self, entry: ProviderEntry) {
        log::debug!("Registering provider {} for {}", entry.name, entry.type_name);
        let entries = self.by_type.entry(entry.type_name.clone()).or_default();
        entries.retain(|e| e.name != entry.name);
        entries.push(entry);
    }

    pub fn providers(&self, type_name: &str) -> &[ProviderEntry] {
        self.by_type
            .get(&normalize_name(type_name))
            .map_or(&[], Vec::as_slice)
    }

    pub fn has_type(&self, type_name: &str) -> bool {
        !self.providers(type_name).is_empty()
    }

    pub fn get(&self, type_name: &str, name: &str) -> Option<&ProviderEntry> {
        let name = name.to_lowercase();
        self.providers(type_name).iter().find(|e| e.name == name)
    }

    /// Providers whose every confine holds, in registration order
    pub fn suitable(&self, type_name: &str, host: &Host) -> Vec<&ProviderEntry> {
        self.providers(type_name)
            .iter()
            .filter(|e| e.suitable(host))
            .collect()
    }

    /// Pick the provider for a type
    pub fn select(&self, type_name: &str, host: &Host) -> Result<&ProviderEntry> {
        let suitable = self.suitable(type_name, host);
        if suitable.is_empty() {
            return Err(Error::NoSuitableProvider {
                type_name: normalize_name(type_name),
                diagnostics: self.diagnostics(type_name, host),
            });
        }

        let defaults: Vec<&ProviderEntry> = suitable
            .iter()
            .copied()
            .filter(|e| e.default_match(host).is_some())
            .collect();
        let candidates = if defaults.is_empty() { suitable } else { defaults };

        let best = candidates
            .iter()
            .map(|e| e.specificity(host))
            .max()
            .unwrap_or(0);
        let tied: Vec<&ProviderEntry> = candidates
            .into_iter()
            .filter(|e| e.specificity(host) == best)
            .collect();

        let Some(chosen) = tied.last().copied() else {
            return Err(Error::NoSuitableProvider {
                type_name: normalize_name(type_name),
                diagnostics: Vec::new(),
            });
        };
        if tied.len() > 1 && best > 0 {
            let names: Vec<&str> = tied.iter().map(|e| e.name.as_str()).collect();
            log::warn!(
                "Found multiple default providers for {}: {}; using {}",
                chosen.type_name,
                names.join(", "),
                chosen.name
            );
        }
        log::debug!("Selected provider {} for {}", chosen.name, chosen.type_name);
        Ok(chosen)
    }

    /// Look up an explicitly requested provider, which must still be suitable
    pub fn select_named(&self, type_name: &str, name: &str, host: &Host) -> Result<&ProviderEntry> {
        let entry = self.get(type_name, name).ok_or_else(|| Error::UnknownProvider {
            type_name: normalize_name(type_name),
            provider: name.to_string(),
        })?;
        let reasons = entry.confines.failures(host);
        if !reasons.is_empty() {
            return Err(Error::UnsuitableProvider {
                type_name: entry.type_name.clone(),
                provider: entry.name.clone(),
                reasons,
            });
        }
        Ok(entry)
    }

    /// Provider for a resource, honouring its `provider` parameter
    pub fn for_resource(&self, resource: &Resource, host: &Host) -> Result<&ProviderEntry> {
        match resource.get_str("provider") {
            Some(name) => self.select_named(resource.type_name(), name, host),
            None => self.select(resource.type_name(), host),
        }
    }

    /// One line per unsuitable provider naming its failing confines
    pub fn diagnostics(&self, type_name: &str, host: &Host) -> Vec<String> {
        self.providers(type_name)
            .iter()
            .filter_map(|e| {
                let failures = e.confines.failures(host);
                (!failures.is_empty()).then(|| format!("{}: {}", e.name, failures.join("; ")))
            })
            .collect()
    }
}
