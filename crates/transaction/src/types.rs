//! Core types for transaction outcomes

use catalog::{Resource, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal state of one resource within a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Already in the declared state
    Unchanged,
    /// Converged by the provider
    Changed,
    /// A provider operation raised
    Failed,
    /// Not evaluated because a dependency failed
    Skipped,
    /// Out of sync, but noop mode held back the change
    Noop,
}

impl Status {
    /// Whether dependents must be skipped
    pub fn blocks_dependents(&self) -> bool {
        matches!(self, Self::Failed | Self::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Changed => "changed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Noop => "noop",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single property change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Success,
    Failure,
    Noop,
}

/// A property change (or attempted change) of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub property: String,
    pub previous: Value,
    pub desired: Value,
    pub message: String,
    pub status: EventStatus,
}

/// Everything recorded about one resource during a transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceStatus {
    /// `Type[title]`
    pub resource: String,
    pub resource_type: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub status: Status,
    pub events: Vec<Event>,
    /// Log lines emitted while evaluating the resource
    pub logs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// RFC 3339 start of evaluation
    pub start_time: String,
    /// Seconds spent evaluating
    pub duration: f64,
    /// Whether the resource received (and acted on) a refresh
    pub refreshed: bool,
}

impl ResourceStatus {
    pub fn new(resource: &Resource) -> Self {
        Self {
            resource: resource.reference.to_string(),
            resource_type: catalog::capitalize_segments(resource.type_name()),
            title: resource.title().to_string(),
            file: resource.location.file.clone(),
            line: resource.location.line,
            provider: None,
            status: Status::Unchanged,
            events: Vec::new(),
            logs: Vec::new(),
            error: None,
            start_time: chrono::Utc::now().to_rfc3339(),
            duration: 0.0,
            refreshed: false,
        }
    }

    /// Number of events that actually changed something
    pub fn change_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| e.status == EventStatus::Success)
            .count()
    }

    pub fn log(&mut self, line: impl Into<String>) {
        let line = line.into();
        log::info!("{}: {}", self.resource, line);
        self.logs.push(line);
    }
}

/// Options for a transaction run
#[derive(Debug, Clone, Default)]
pub struct TransactionOptions {
    /// Compute changes but make none
    pub noop: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocking_statuses() {
        assert!(Status::Failed.blocks_dependents());
        assert!(Status::Skipped.blocks_dependents());
        assert!(!Status::Changed.blocks_dependents());
        assert!(!Status::Noop.blocks_dependents());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Status::Noop).unwrap(), "\"noop\"");
    }

    #[test]
    fn test_change_count_ignores_noop_events() {
        let mut status = ResourceStatus::new(&Resource::new("file", "/tmp/a"));
        status.events.push(Event {
            property: "mode".into(),
            previous: Value::from("0600"),
            desired: Value::from("0644"),
            message: "mode changed".into(),
            status: EventStatus::Noop,
        });
        assert_eq!(status.change_count(), 0);
        assert_eq!(status.resource_type, "File");
    }
}
