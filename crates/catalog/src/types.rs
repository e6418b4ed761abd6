//! Resource type registry
//!
//! The registry describes every resource type the compiler may see: which
//! parameters it accepts, which of them are properties (managed state the
//! transaction compares against the system), and any implicit dependencies
//! the type contributes to the relationship graph.

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::resource::Resource;
use crate::value::{ResourceRef, normalize_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Parameters every resource type accepts
pub const METAPARAMS: &[&str] = &[
    "before",
    "require",
    "notify",
    "subscribe",
    "consume",
    "export",
    "tag",
    "noop",
    "stage",
    "alias",
    "loglevel",
    "provider",
];

/// Hook computing the resources a resource implicitly depends on
pub type AutorequireFn = Arc<dyn Fn(&Resource, &Catalog) -> Vec<ResourceRef> + Send + Sync>;

/// What sort of type a registry entry describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// Implemented by providers
    Builtin,
    /// A cross-node capability contract, never applied locally
    Capability,
}

/// Description of a resource type
#[derive(Clone)]
pub struct ResourceType {
    pub name: String,
    pub kind: TypeKind,
    /// The parameter the title defaults to
    pub namevar: String,
    /// Parameters describing managed state, compared by the transaction
    pub properties: Vec<String>,
    /// Non-property parameters
    pub parameters: Vec<String>,
    pub autorequire: Option<AutorequireFn>,
}

impl fmt::Debug for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceType")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("namevar", &self.namevar)
            .field("properties", &self.properties)
            .field("parameters", &self.parameters)
            .field("autorequire", &self.autorequire.is_some())
            .finish()
    }
}

impl ResourceType {
    /// A provider-backed type with `name` as its namevar
    pub fn builtin(name: &str) -> Self {
        Self {
            name: normalize_name(name),
            kind: TypeKind::Builtin,
            namevar: "name".to_string(),
            properties: Vec::new(),
            parameters: Vec::new(),
            autorequire: None,
        }
    }

    /// A capability type; accepts any parameter
    pub fn capability(name: &str) -> Self {
        Self {
            kind: TypeKind::Capability,
            ..Self::builtin(name)
        }
    }

    pub fn namevar(mut self, name: &str) -> Self {
        self.namevar = name.to_string();
        self
    }

    pub fn property(mut self, name: &str) -> Self {
        self.properties.push(name.to_string());
        self
    }

    pub fn parameter(mut self, name: &str) -> Self {
        self.parameters.push(name.to_string());
        self
    }

    pub fn autorequire<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Resource, &Catalog) -> Vec<ResourceRef> + Send + Sync + 'static,
    {
        self.autorequire = Some(Arc::new(hook));
        self
    }

    pub fn is_capability(&self) -> bool {
        self.kind == TypeKind::Capability
    }

    pub fn is_property(&self, name: &str) -> bool {
        self.properties.iter().any(|p| p == name)
    }

    /// Whether `name` is accepted on resources of this type
    pub fn accepts(&self, name: &str) -> bool {
        self.is_capability()
            || name == self.namevar
            || self.is_property(name)
            || self.parameters.iter().any(|p| p == name)
            || METAPARAMS.contains(&name)
    }

    /// The value of the namevar, falling back to the title
    pub fn name_of<'a>(&self, resource: &'a Resource) -> &'a str {
        resource
            .get_str(&self.namevar)
            .unwrap_or_else(|| resource.title())
    }
}

/// Registry of known resource types, shared read-only across compiles
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: HashMap<String, Arc<ResourceType>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type, replacing any earlier registration of the same name
    pub fn register(&mut self, resource_type: ResourceType) {
        log::debug!("Registering resource type {}", resource_type.name);
        self.types
            .insert(resource_type.name.clone(), Arc::new(resource_type));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ResourceType>> {
        self.types.get(&normalize_name(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn is_capability(&self, name: &str) -> bool {
        self.get(name).is_some_and(|t| t.is_capability())
    }

    /// Names of every registered type, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Reject parameters the resource's type does not accept
    ///
    /// Resources of unregistered types are left to the caller: defined types
    /// and classes are checked against their own parameter lists.
    pub fn validate_parameters(&self, resource: &Resource) -> Result<()> {
        let Some(resource_type) = self.get(resource.type_name()) else {
            return Ok(());
        };
        for name in resource.parameters.keys() {
            if !resource_type.accepts(name) {
                return Err(Error::InvalidParameter {
                    reference: resource.reference.to_string(),
                    parameter: name.clone(),
                    location: resource.location.clone(),
                });
            }
        }
        Ok(())
    }
}
