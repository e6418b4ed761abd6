//! Error types for catalog construction and validation

use crate::resource::Location;
use std::fmt;
use thiserror::Error;

/// The class of invariant a validator found broken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    /// A relationship metaparameter that may not point at a capability
    RelationshipMisuse,
    /// A consumed capability with no exporter, or two exporters
    CapabilityMismatch,
    /// A non-component resource inside a site
    SiteContainment,
}

impl fmt::Display for ValidationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RelationshipMisuse => "relationship misuse",
            Self::CapabilityMismatch => "capability mismatch",
            Self::SiteContainment => "site containment",
        };
        f.write_str(name)
    }
}

/// Raised by a catalog validator, pointing at the offending resource
#[derive(Debug, Clone, Error)]
#[error("{message} {location}")]
pub struct CatalogValidationError {
    pub kind: ValidationKind,
    pub message: String,
    pub location: Location,
}

impl CatalogValidationError {
    pub fn new(kind: ValidationKind, message: impl Into<String>, location: Location) -> Self {
        Self {
            kind,
            message: message.into(),
            location,
        }
    }
}

/// Errors that abort catalog construction
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The same (type, title) declared twice with different content
    #[error("Duplicate declaration: {reference} is already declared at {first}; cannot redeclare at {second}")]
    DuplicateResource {
        reference: String,
        first: Location,
        second: Location,
    },

    /// A relationship names a resource that is not in the catalog
    #[error("Could not find resource '{target}' for relationship from '{source_ref}' {location}")]
    MissingRelationshipTarget {
        target: String,
        source_ref: String,
        location: Location,
    },

    /// The relationship graph is not a DAG
    #[error("{}", describe_cycles(.cycles))]
    Cycle { cycles: Vec<Vec<String>> },

    /// A parameter the resource type does not accept
    #[error("Invalid parameter '{parameter}' on {reference} {location}")]
    InvalidParameter {
        reference: String,
        parameter: String,
        location: Location,
    },

    /// A resource of a type nobody registered or defined
    #[error("Unknown resource type: '{type_name}' {location}")]
    UnknownResourceType { type_name: String, location: Location },

    /// A resource or container referenced by id or ref is not present
    #[error("Resource not found in catalog: {0}")]
    NotFound(String),

    /// The catalog was finalized and can no longer change
    #[error("Catalog for {0} is finalized and cannot be modified")]
    Finalized(String),

    #[error(transparent)]
    Validation(#[from] CatalogValidationError),
}

impl Error {
    /// Members of the first reported cycle, if this is a cycle error
    pub fn cycle_members(&self) -> Option<&[String]> {
        match self {
            Self::Cycle { cycles } => cycles.first().map(Vec::as_slice),
            _ => None,
        }
    }
}

fn describe_cycles(cycles: &[Vec<String>]) -> String {
    let plural = if cycles.len() == 1 { "" } else { "s" };
    let body = cycles
        .iter()
        .map(|cycle| {
            let mut path = cycle.clone();
            if let Some(first) = cycle.first() {
                path.push(first.clone());
            }
            format!("({})", path.join(" => "))
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!("Found {} dependency cycle{}:\n{}", cycles.len(), plural, body)
}

/// Result type for catalog operations
pub type Result<T> = std::result::Result<T, Error>;
