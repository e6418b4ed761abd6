//! Confinement predicates
//!
//! A provider is suitable on a host only when every one of its confines
//! holds. Confines are evaluated fresh on each lookup; the values they read
//! (facts, features, file existence) come through the host's run cache.

use crate::host::Host;
use std::fmt;
use std::sync::Arc;

/// A boolean condition, fixed or computed at evaluation time
#[derive(Clone)]
pub enum Condition {
    Value(bool),
    Check(Arc<dyn Fn(&Host) -> bool + Send + Sync>),
}

impl Condition {
    fn evaluate(&self, host: &Host) -> bool {
        match self {
            Self::Value(value) => *value,
            Self::Check(check) => check(host),
        }
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => write!(f, "{value}"),
            Self::Check(_) => f.write_str("<check>"),
        }
    }
}

/// One confinement predicate
#[derive(Debug, Clone)]
pub enum Confine {
    /// Every listed file or command must exist
    Exists(Vec<String>),
    /// The condition must hold
    True(Condition),
    /// The condition must not hold
    False(Condition),
    /// Every listed feature must be available
    Feature(Vec<String>),
    /// A setting (if one by that name exists) or fact must equal one of the
    /// values, compared case-insensitively
    Variable { name: String, values: Vec<String> },
}

impl Confine {
    pub fn exists(targets: &[&str]) -> Self {
        Self::Exists(targets.iter().map(ToString::to_string).collect())
    }

    pub fn feature(names: &[&str]) -> Self {
        Self::Feature(names.iter().map(ToString::to_string).collect())
    }

    pub fn variable(name: &str, values: &[&str]) -> Self {
        Self::Variable {
            name: name.to_string(),
            values: values.iter().map(ToString::to_string).collect(),
        }
    }

    pub fn check<F>(check: F) -> Self
    where
        F: Fn(&Host) -> bool + Send + Sync + 'static,
    {
        Self::True(Condition::Check(Arc::new(check)))
    }

    /// `None` when the confine holds, otherwise why it does not
    pub fn failure(&self, host: &Host) -> Option<String> {
        match self {
            Self::Exists(targets) => targets
                .iter()
                .find(|t| !host.exists(t))
                .map(|t| format!("file {t} does not exist")),
            Self::True(condition) => {
                (!condition.evaluate(host)).then(|| "false value when expecting true".to_string())
            }
            Self::False(condition) => {
                condition.evaluate(host).then(|| "true value when expecting false".to_string())
            }
            Self::Feature(names) => names
                .iter()
                .find(|n| !host.feature(n))
                .map(|n| format!("feature {n} is missing")),
            Self::Variable { name, values } => {
                let (source, actual) = if host.has_setting(name) {
                    ("setting", host.setting(name).map(ToString::to_string))
                } else {
                    ("fact", host.fact(name))
                };
                let matched = actual
                    .as_deref()
                    .is_some_and(|a| values.iter().any(|v| v.eq_ignore_ascii_case(a)));
                if matched {
                    None
                } else {
                    let shown = actual.map_or_else(|| "unset".to_string(), |a| a.to_lowercase());
                    Some(format!(
                        "{source} {name} is {shown}, not one of [{}]",
                        values.join(", ").to_lowercase()
                    ))
                }
            }
        }
    }

    pub fn valid(&self, host: &Host) -> bool {
        self.failure(host).is_none()
    }
}

/// All confines declared by one provider
#[derive(Debug, Clone, Default)]
pub struct ConfineSet {
    confines: Vec<Confine>,
}

impl ConfineSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, confine: Confine) {
        self.confines.push(confine);
    }

    pub fn len(&self) -> usize {
        self.confines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.confines.is_empty()
    }

    pub fn suitable(&self, host: &Host) -> bool {
        self.confines.iter().all(|c| c.valid(host))
    }

    /// Reasons for every failing confine, in declaration order
    pub fn failures(&self, host: &Host) -> Vec<String> {
        self.confines.iter().filter_map(|c| c.failure(host)).collect()
    }
}
