//! Report sinks
//!
//! A sink receives the finished report. Saving is fire-and-forget from the
//! transaction's point of view: a failing sink is logged and ignored.

use crate::report::TransactionReport;
use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// Destination for finished transaction reports
pub trait ReportSink {
    fn name(&self) -> &str;

    fn save(&self, report: &TransactionReport) -> Result<()>;
}

/// Writes `<dir>/<host>/<timestamp>.json`
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Where a report for this host would be written
    pub fn path_for(&self, report: &TransactionReport) -> PathBuf {
        let stamp = chrono::DateTime::parse_from_rfc3339(&report.time)
            .map(|t| t.format("%Y%m%d%H%M%S").to_string())
            .unwrap_or_else(|_| chrono::Utc::now().format("%Y%m%d%H%M%S").to_string());
        self.dir.join(&report.host).join(format!("{stamp}.json"))
    }
}

impl ReportSink for JsonFileSink {
    fn name(&self) -> &str {
        "json"
    }

    fn save(&self, report: &TransactionReport) -> Result<()> {
        let path = self.path_for(report);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = report.to_json().context("Failed to serialize report")?;
        fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        log::debug!("Wrote report to {}", path.display());
        Ok(())
    }
}

/// Logs a one-line summary of the run
#[derive(Debug, Clone, Default)]
pub struct LogSink;

impl ReportSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn save(&self, report: &TransactionReport) -> Result<()> {
        let m = &report.metrics;
        log::info!(
            "Applied catalog for {} in {:.2} seconds: {} ({} changed, {} failed, {} skipped, {} noop, {} unchanged)",
            report.host,
            m.total_time,
            report.status,
            m.changed,
            m.failed,
            m.skipped,
            m.noop,
            m.unchanged
        );
        Ok(())
    }
}

/// Hand the report to every sink, logging (never propagating) failures
pub fn save_report(report: &TransactionReport, sinks: &[Box<dyn ReportSink>]) {
    for sink in sinks {
        if let Err(e) = sink.save(report) {
            log::warn!("Could not send report to {} sink: {:#}", sink.name(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    impl ReportSink for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn save(&self, _report: &TransactionReport) -> Result<()> {
            anyhow::bail!("disk full")
        }
    }

    #[test]
    fn test_json_sink_writes_per_host() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = TransactionReport::new("web1", "production", 7, false);
        report.finalize(0.0);

        let sink = JsonFileSink::new(dir.path());
        sink.save(&report).unwrap();

        let path = sink.path_for(&report);
        assert!(path.starts_with(dir.path().join("web1")));
        let written = fs::read_to_string(path).unwrap();
        assert!(written.contains("\"configuration_version\": 7"));
    }

    #[test]
    fn test_failing_sink_does_not_stop_others() {
        let dir = tempfile::tempdir().unwrap();
        let report = TransactionReport::new("web1", "production", 1, false);
        let sinks: Vec<Box<dyn ReportSink>> = vec![
            Box::new(Broken),
            Box::new(JsonFileSink::new(dir.path())),
            Box::new(LogSink),
        ];
        save_report(&report, &sinks);
        assert!(dir.path().join("web1").exists());
    }
}
