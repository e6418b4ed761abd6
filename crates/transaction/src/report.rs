//! Transaction report and summary metrics

use crate::types::{ResourceStatus, Status};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Unchanged,
    Changed,
    Failed,
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unchanged => "unchanged",
            Self::Changed => "changed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Counts of resources per terminal status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub total: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub skipped: usize,
    pub noop: usize,
    /// Resources that received a refresh
    pub restarted: usize,
    /// Successful property changes across all resources
    pub events: usize,
    /// Seconds spent in the transaction
    pub total_time: f64,
}

impl Metrics {
    /// Add a resource status to the counts
    pub fn add(&mut self, status: &ResourceStatus) {
        self.total += 1;
        match status.status {
            Status::Changed => self.changed += 1,
            Status::Unchanged => self.unchanged += 1,
            Status::Failed => self.failed += 1,
            Status::Skipped => self.skipped += 1,
            Status::Noop => self.noop += 1,
        }
        if status.refreshed {
            self.restarted += 1;
        }
        self.events += status.change_count();
    }

    pub fn has_changes(&self) -> bool {
        self.changed > 0 || self.restarted > 0
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// What a run did, for humans and for report sinks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionReport {
    pub host: String,
    pub environment: String,
    pub configuration_version: i64,
    /// RFC 3339 time the run started
    pub time: String,
    pub status: ReportStatus,
    pub noop: bool,
    /// Per-resource outcomes in apply order
    pub resource_statuses: Vec<ResourceStatus>,
    pub metrics: Metrics,
}

impl TransactionReport {
    pub fn new(host: &str, environment: &str, configuration_version: i64, noop: bool) -> Self {
        Self {
            host: host.to_string(),
            environment: environment.to_string(),
            configuration_version,
            time: chrono::Utc::now().to_rfc3339(),
            status: ReportStatus::Unchanged,
            noop,
            resource_statuses: Vec::new(),
            metrics: Metrics::default(),
        }
    }

    /// Record a resource's terminal status
    pub fn add(&mut self, status: ResourceStatus) {
        self.metrics.add(&status);
        self.resource_statuses.push(status);
    }

    /// Derive the overall status once every resource is recorded
    pub fn finalize(&mut self, total_time: f64) {
        let mut metrics = Metrics::default();
        for status in &self.resource_statuses {
            metrics.add(status);
        }
        metrics.total_time = total_time;
        self.metrics = metrics;
        self.status = if self.metrics.has_failures() {
            ReportStatus::Failed
        } else if self.metrics.has_changes() {
            ReportStatus::Changed
        } else {
            ReportStatus::Unchanged
        };
    }

    pub fn status_of(&self, reference: &str) -> Option<Status> {
        self.resource_statuses
            .iter()
            .find(|s| s.resource == reference)
            .map(|s| s.status)
    }

    /// Resources in the order they were evaluated
    pub fn order(&self) -> Vec<&str> {
        self.resource_statuses
            .iter()
            .map(|s| s.resource.as_str())
            .collect()
    }

    /// Process exit code for this run
    ///
    /// With detailed exit codes: 0 no changes, 2 changes, 4 failures,
    /// 6 changes and failures. Otherwise 1 on any failure, else 0.
    pub fn exit_code(&self, detailed: bool) -> i32 {
        if !detailed {
            return i32::from(self.metrics.has_failures());
        }
        let mut code = 0;
        if self.metrics.has_changes() {
            code |= 2;
        }
        if self.metrics.has_failures() {
            code |= 4;
        }
        code
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog::Resource;

    fn status(title: &str, status: Status) -> ResourceStatus {
        let mut s = ResourceStatus::new(&Resource::new("notify", title));
        s.status = status;
        s
    }

    fn report(statuses: &[Status]) -> TransactionReport {
        let mut report = TransactionReport::new("node1", "production", 1, false);
        for (i, s) in statuses.iter().enumerate() {
            report.add(status(&format!("r{i}"), *s));
        }
        report.finalize(0.5);
        report
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(report(&[Status::Unchanged]).exit_code(true), 0);
        assert_eq!(report(&[Status::Changed]).exit_code(true), 2);
        assert_eq!(report(&[Status::Failed, Status::Skipped]).exit_code(true), 4);
        assert_eq!(report(&[Status::Changed, Status::Failed]).exit_code(true), 6);
        assert_eq!(report(&[Status::Changed]).exit_code(false), 0);
        assert_eq!(report(&[Status::Failed]).exit_code(false), 1);
    }

    #[test]
    fn test_report_status() {
        assert_eq!(report(&[Status::Unchanged, Status::Noop]).status, ReportStatus::Unchanged);
        assert_eq!(report(&[Status::Changed]).status, ReportStatus::Changed);
        assert_eq!(report(&[Status::Changed, Status::Failed]).status, ReportStatus::Failed);
    }

    #[test]
    fn test_metrics_and_order() {
        let report = report(&[Status::Changed, Status::Skipped, Status::Noop]);
        assert_eq!(report.metrics.total, 3);
        assert_eq!(report.metrics.skipped, 1);
        assert_eq!(report.order(), vec!["Notify[r0]", "Notify[r1]", "Notify[r2]"]);
        assert_eq!(report.status_of("Notify[r1]"), Some(Status::Skipped));
        assert!(report.to_json().unwrap().contains("\"status\": \"changed\""));
    }
}
