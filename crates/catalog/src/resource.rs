//! The in-memory representation of a single declared resource

use crate::value::{ResourceRef, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Where a resource was declared
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl Location {
    pub fn new(file: Option<String>, line: usize) -> Self {
        Self {
            file,
            line: Some(line),
        }
    }

    pub fn is_known(&self) -> bool {
        self.file.is_some() || self.line.is_some()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "(file: {}, line: {})", file, line),
            (Some(file), None) => write!(f, "(file: {})", file),
            (None, Some(line)) => write!(f, "(line: {})", line),
            (None, None) => write!(f, "(unknown location)"),
        }
    }
}

/// How a resource came to be in the catalog
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Declared by this node's manifests
    #[default]
    Here,
    /// Collected from another node's exports
    Imported,
    /// Declared with `@@`; shipped to other nodes, never applied here
    Exported,
    /// Declared with `@`; only applied once realized
    Virtual,
}

/// Structural role of a resource in the containment hierarchy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// A manageable resource handled by a provider
    #[default]
    Plain,
    Class,
    /// An instance of a defined type
    Defined,
    Application,
    Site,
    Stage,
}

impl ResourceKind {
    /// Containers get admissible/completed vertices in the relationship graph
    pub fn is_container(&self) -> bool {
        !matches!(self, Self::Plain)
    }
}

/// Relationship metaparameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RelationshipParam {
    Before,
    Require,
    Notify,
    Subscribe,
    Consume,
    Export,
}

impl RelationshipParam {
    pub const ALL: [RelationshipParam; 6] = [
        Self::Before,
        Self::Require,
        Self::Notify,
        Self::Subscribe,
        Self::Consume,
        Self::Export,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "before" => Some(Self::Before),
            "require" => Some(Self::Require),
            "notify" => Some(Self::Notify),
            "subscribe" => Some(Self::Subscribe),
            "consume" => Some(Self::Consume),
            "export" => Some(Self::Export),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::Require => "require",
            Self::Notify => "notify",
            Self::Subscribe => "subscribe",
            Self::Consume => "consume",
            Self::Export => "export",
        }
    }

    /// `subscribe` and `notify` edges trigger refresh
    pub fn is_notification(&self) -> bool {
        matches!(self, Self::Notify | Self::Subscribe)
    }

    /// `require`/`subscribe` point from the referenced resource to the declaring one
    pub fn points_inward(&self) -> bool {
        matches!(self, Self::Require | Self::Subscribe)
    }

    /// Only these may reference capability resources
    pub fn allowed_for_capability(&self) -> bool {
        matches!(self, Self::Require | Self::Consume | Self::Export)
    }
}

impl fmt::Display for RelationshipParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared resource: identity, parameters, tags, and provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(flatten)]
    pub reference: ResourceRef,
    #[serde(default)]
    pub parameters: IndexMap<String, Value>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub origin: Origin,
    #[serde(default)]
    pub kind: ResourceKind,
    /// Declared directly inside an application
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub component: bool,
    #[serde(flatten)]
    pub location: Location,
}

impl Resource {
    pub fn new(type_name: &str, title: impl Into<String>) -> Self {
        let reference = ResourceRef::new(type_name, title);
        let mut tags = BTreeSet::new();
        tags.insert(reference.type_name.clone());
        Self {
            reference,
            parameters: IndexMap::new(),
            tags,
            origin: Origin::Here,
            kind: ResourceKind::Plain,
            component: false,
            location: Location::default(),
        }
    }

    pub fn with_param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn with_location(mut self, file: Option<String>, line: usize) -> Self {
        self.location = Location::new(file, line);
        self
    }

    pub fn with_kind(mut self, kind: ResourceKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn type_name(&self) -> &str {
        &self.reference.type_name
    }

    pub fn title(&self) -> &str {
        &self.reference.title
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.parameters.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name).filter(|v| !v.is_undef())
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn tag(&mut self, tag: impl AsRef<str>) {
        let tag = tag.as_ref().to_lowercase();
        for segment in tag.split("::") {
            self.tags.insert(segment.to_string());
        }
        self.tags.insert(tag);
    }

    pub fn tagged(&self, tag: &str) -> bool {
        self.tags.contains(&tag.to_lowercase())
    }

    /// Whether the resource is applied by this node's transaction
    pub fn is_managed_here(&self) -> bool {
        matches!(self.origin, Origin::Here | Origin::Imported)
    }

    /// Per-resource noop metaparameter
    pub fn noop(&self) -> Option<bool> {
        self.get("noop").and_then(Value::as_bool)
    }

    /// Every (metaparameter, reference) pair declared on this resource
    pub fn relationships(&self) -> Vec<(RelationshipParam, ResourceRef)> {
        let mut out = Vec::new();
        for param in RelationshipParam::ALL {
            if let Some(value) = self.get(param.as_str()) {
                for reference in value.references() {
                    out.push((param, reference));
                }
            }
        }
        out
    }

    /// Two declarations are interchangeable when their declared state matches
    pub fn same_declaration(&self, other: &Resource) -> bool {
        self.reference == other.reference
            && self.parameters == other.parameters
            && self.origin == other.origin
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_resource_is_tagged_with_type() {
        let r = Resource::new("File", "/tmp/a");
        assert!(r.tagged("file"));
        assert_eq!(r.type_name(), "file");
    }

    #[test]
    fn test_qualified_tags_add_segments() {
        let mut r = Resource::new("notify", "x");
        r.tag("Apache::Mod");
        assert!(r.tagged("apache"));
        assert!(r.tagged("mod"));
        assert!(r.tagged("apache::mod"));
    }

    #[test]
    fn test_relationships_collects_all_metaparams() {
        let r = Resource::new("service", "nginx")
            .with_param("require", ResourceRef::new("package", "nginx"))
            .with_param(
                "subscribe",
                Value::Array(vec![
                    ResourceRef::new("file", "/etc/nginx.conf").into(),
                    ResourceRef::new("file", "/etc/mime.types").into(),
                ]),
            );
        let rels = r.relationships();
        assert_eq!(rels.len(), 3);
        assert_eq!(rels[0].0, RelationshipParam::Require);
        assert!(rels[1].0.is_notification());
    }

    #[test]
    fn test_undef_parameters_read_as_missing() {
        let r = Resource::new("file", "/a").with_param("mode", Value::Undef);
        assert!(r.get("mode").is_none());
    }

    #[test]
    fn test_location_display() {
        let loc = Location::new(Some("site.pp".into()), 4);
        assert_eq!(loc.to_string(), "(file: site.pp, line: 4)");
    }
}
