//! # Transaction
//!
//! Applies a compiled catalog to the host.
//!
//! ## Core Concepts
//!
//! - **Transaction**: walks the relationship graph in topological order and
//!   drives each resource's provider (`retrieve`, then `create`, `destroy`
//!   or `sync` for whatever is out of sync)
//! - **Status**: the terminal state of each resource (`unchanged`,
//!   `changed`, `failed`, `skipped`, `noop`)
//! - **Refresh**: a changed resource notifies its `notify`/`subscribe`
//!   targets, each of which is refreshed at most once per run
//! - **TransactionReport**: per-resource outcomes and summary metrics,
//!   handed to [`ReportSink`]s when the run is over
//!
//! ## Example
//!
//! ```ignore
//! use transaction::{NoProgress, Transaction, TransactionOptions};
//!
//! let report = Transaction::new(&catalog, &types, &providers, &host)
//!     .with_options(TransactionOptions { noop: false })
//!     .evaluate(&mut NoProgress)?;
//! std::process::exit(report.exit_code(true));
//! ```

pub mod context;
pub mod error;
pub mod executor;
pub mod report;
pub mod retry;
pub mod sink;
pub mod types;

pub use context::{NoProgress, ProgressCallback};
pub use error::{Error, ResourceApplyError, Result};
pub use executor::Transaction;
pub use report::{Metrics, ReportStatus, TransactionReport};
pub use retry::{RetryPolicy, with_retry};
pub use sink::{JsonFileSink, LogSink, ReportSink, save_report};
pub use types::{Event, EventStatus, ResourceStatus, Status, TransactionOptions};
