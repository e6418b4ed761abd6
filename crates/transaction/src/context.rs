//! Progress callbacks
//!
//! These traits let the transaction report progress without depending on a
//! particular terminal UI.

use crate::report::TransactionReport;
use crate::types::ResourceStatus;

/// Receives progress updates while a transaction runs
pub trait ProgressCallback {
    /// Called once before the first resource, with the number of resources
    fn on_transaction_start(&mut self, count: usize);

    /// Called when starting to evaluate a single resource
    fn on_resource_start(&mut self, reference: &str);

    /// Called when a resource reaches its terminal status
    fn on_resource_complete(&mut self, status: &ResourceStatus);

    /// Called once the report is assembled
    fn on_transaction_complete(&mut self, report: &TransactionReport);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_transaction_start(&mut self, _count: usize) {}
    fn on_resource_start(&mut self, _reference: &str) {}
    fn on_resource_complete(&mut self, _status: &ResourceStatus) {}
    fn on_transaction_complete(&mut self, _report: &TransactionReport) {}
}
