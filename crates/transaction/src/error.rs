//! Transaction errors
//!
//! Only problems that stop a run before any resource is touched surface as
//! [`Error`]. Failures of individual resources are recovered into their
//! status and never escape [`crate::Transaction::evaluate`].

use catalog::Location;
use thiserror::Error;

/// Fatal errors that abort a run
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Catalog(#[from] catalog::Error),

    /// Provider selection failed for a resource
    #[error("{reference}: {source} {location}")]
    Provider {
        reference: String,
        location: Location,
        #[source]
        source: provider::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for transaction setup
pub type Result<T> = std::result::Result<T, Error>;

/// A recovered failure of one resource operation
#[derive(Debug, Clone, Error)]
#[error("{reference}: Could not evaluate: {message} {location}")]
pub struct ResourceApplyError {
    pub reference: String,
    pub message: String,
    pub location: Location,
}

impl ResourceApplyError {
    pub fn new(reference: impl Into<String>, error: &anyhow::Error, location: Location) -> Self {
        Self {
            reference: reference.into(),
            message: format!("{error:#}"),
            location,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_error_carries_location() {
        let err = ResourceApplyError::new(
            "File[/tmp/x]",
            &anyhow::anyhow!("permission denied"),
            Location::new(Some("site.pp".into()), 4),
        );
        assert_eq!(
            err.to_string(),
            "File[/tmp/x]: Could not evaluate: permission denied (file: site.pp, line: 4)"
        );
    }
}
