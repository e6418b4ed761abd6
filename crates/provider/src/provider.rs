//! The provider interface
//!
//! A provider knows how to read and change one kind of system resource on
//! one kind of platform. Providers are stateless with respect to a run: they
//! read the declared resource each call and keep any derived "current value"
//! state to themselves.

use anyhow::{Result, bail};
use catalog::{Resource, Value};
use indexmap::IndexMap;

/// Current values of a resource's properties, keyed by property name
///
/// Providers managing existence report it under `ensure` (`absent` when
/// the resource does not exist).
pub type State = IndexMap<String, Value>;

/// Operations the transaction drives for each managed resource
pub trait Provider: Send + Sync {
    /// Read the current state of the resource from the system
    fn retrieve(&self, resource: &Resource) -> Result<State>;

    /// Bring an absent resource into existence with its declared properties
    fn create(&self, resource: &Resource) -> Result<()> {
        bail!("{} does not support creating resources", resource.reference)
    }

    /// Remove a present resource
    fn destroy(&self, resource: &Resource) -> Result<()> {
        bail!("{} does not support removing resources", resource.reference)
    }

    /// Change one out-of-sync property to its declared value
    fn sync(&self, resource: &Resource, property: &str, desired: &Value) -> Result<()>;

    /// React to a notification from a changed dependency
    fn refresh(&self, resource: &Resource) -> Result<()> {
        log::debug!("{} does not respond to refresh", resource.reference);
        Ok(())
    }

    /// Whether `current` already satisfies `desired`
    fn insync(&self, _property: &str, current: &Value, desired: &Value) -> bool {
        values_match(current, desired)
    }

    /// Called once after all of a resource's changes have been synced
    fn flush(&self, _resource: &Resource) -> Result<()> {
        Ok(())
    }
}

/// Structural comparison treating scalars by their string form
pub fn values_match(current: &Value, desired: &Value) -> bool {
    match (current, desired) {
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_match(x, y))
        }
        (Value::Array(a), single) if a.len() == 1 => values_match(&a[0], single),
        (Value::Undef, Value::Undef) => true,
        (Value::Undef, _) | (_, Value::Undef) => false,
        (a, b) => a == b || a.to_string() == b.to_string(),
    }
}

/// Log line for one property change
pub fn change_message(property: &str, current: &Value, desired: &Value) -> String {
    match (property, current) {
        ("ensure", Value::String(s)) if s == "absent" => "created".to_string(),
        ("ensure", _) if desired.as_str() == Some("absent") => "removed".to_string(),
        (_, Value::Undef) => format!("defined '{property}' as {}", quoted(desired)),
        _ => format!(
            "{property} changed {} to {}",
            quoted(current),
            quoted(desired)
        ),
    }
}

fn quoted(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{s}'"),
        other => other.to_string(),
    }
}
