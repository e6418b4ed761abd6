//! Catalog model for compiled Puppet manifests
//!
//! A [`Catalog`] holds the resources one node should converge to, how they
//! nest inside classes, defined types and stages, and the relationships
//! declared between them. [`RelationshipGraph`] turns a catalog into the
//! dependency-ordered graph a transaction walks, and the [`validate`]
//! module checks cross-cutting invariants before anything is applied.
//!
//! # Example
//!
//! ```
//! use catalog::{Catalog, RelationshipGraph, Resource, ResourceRef, TypeRegistry};
//!
//! let mut catalog = Catalog::new("web1", "production");
//! catalog.add_resource(Resource::new("notify", "b").with_param("require", ResourceRef::new("notify", "a")))?;
//! catalog.add_resource(Resource::new("notify", "a"))?;
//!
//! let graph = RelationshipGraph::build(&catalog, &TypeRegistry::new())?;
//! assert_eq!(graph.vertex_count(), 2);
//! # Ok::<(), catalog::Error>(())
//! ```

pub mod catalog;
pub mod error;
pub mod graph;
pub mod relationship;
pub mod resource;
pub mod types;
pub mod validate;
pub mod value;

pub use catalog::{Catalog, Relationship, ResourceId};
pub use error::{CatalogValidationError, Error, Result, ValidationKind};
pub use graph::{EdgeLabel, GraphEdge, SimpleGraph};
pub use relationship::{RelationshipGraph, Vertex};
pub use resource::{Location, Origin, RelationshipParam, Resource, ResourceKind};
pub use types::{AutorequireFn, METAPARAMS, ResourceType, TypeKind, TypeRegistry};
pub use validate::{
    CatalogValidator, EnvironmentRelationshipValidator, RelationshipValidator, SiteValidator,
    ValidationContext, ValidationStage, ValidatorChain,
};
pub use value::{ResourceRef, Value, capitalize_segments, normalize_name};
