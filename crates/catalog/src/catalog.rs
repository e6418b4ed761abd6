//! The compiled catalog: an arena of resources plus containment and
//! explicitly chained relationships

use crate::error::{Error, Result};
use crate::resource::{Origin, Resource, ResourceKind};
use crate::value::ResourceRef;
use serde::Serialize;
use std::collections::HashMap;

/// Index of a resource in its catalog's arena
pub type ResourceId = usize;

/// A relationship declared with a chaining arrow (`->`, `~>`, `<-`, `<~`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relationship {
    pub source: ResourceRef,
    pub target: ResourceRef,
    /// `~>` / `<~`: the target is refreshed when the source changes
    pub notification: bool,
    /// Declared with a left-pointing arrow
    pub right2left: bool,
}

/// A compiled catalog for one node
#[derive(Debug, Clone, Serialize)]
pub struct Catalog {
    /// Node name
    pub name: String,
    pub environment: String,
    /// Configuration version stamped at compile time
    pub version: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_id: Option<String>,
    /// Classes evaluated for this node, in evaluation order
    pub classes: Vec<String>,
    resources: Vec<Resource>,
    /// (container, contained)
    containment: Vec<(ResourceId, ResourceId)>,
    relationships: Vec<Relationship>,
    #[serde(skip)]
    index: HashMap<ResourceRef, ResourceId>,
    #[serde(skip)]
    parents: HashMap<ResourceId, ResourceId>,
    #[serde(skip)]
    finalized: bool,
}

impl Catalog {
    pub fn new(name: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            environment: environment.into(),
            version: 0,
            code_id: None,
            classes: Vec::new(),
            resources: Vec::new(),
            containment: Vec::new(),
            relationships: Vec::new(),
            index: HashMap::new(),
            parents: HashMap::new(),
            finalized: false,
        }
    }

    /// Add a resource, enforcing (type, title) uniqueness
    ///
    /// A second declaration identical to the first is accepted and returns the
    /// existing id; anything else is a duplicate declaration error naming both
    /// locations.
    pub fn add_resource(&mut self, resource: Resource) -> Result<ResourceId> {
        self.ensure_open()?;
        if let Some(&existing) = self.index.get(&resource.reference) {
            let prior = &self.resources[existing];
            if prior.same_declaration(&resource) {
                log::debug!(
                    "Ignoring identical redeclaration of {} {}",
                    resource.reference,
                    resource.location
                );
                return Ok(existing);
            }
            return Err(Error::DuplicateResource {
                reference: resource.reference.to_string(),
                first: prior.location.clone(),
                second: resource.location.clone(),
            });
        }

        let id = self.resources.len();
        self.index.insert(resource.reference.clone(), id);
        self.resources.push(resource);
        Ok(id)
    }

    /// Add a resource and record it as contained by `container`
    pub fn add_contained(&mut self, container: ResourceId, resource: Resource) -> Result<ResourceId> {
        let id = self.add_resource(resource)?;
        if !self.parents.contains_key(&id) {
            self.contain(container, id)?;
        }
        Ok(id)
    }

    /// Record that `container` contains `child`; a resource has one container
    pub fn contain(&mut self, container: ResourceId, child: ResourceId) -> Result<()> {
        self.ensure_open()?;
        if container >= self.resources.len() || child >= self.resources.len() {
            return Err(Error::NotFound(format!("resource id {container} or {child}")));
        }
        if let Some(previous) = self.parents.insert(child, container) {
            self.containment
                .retain(|&(parent, c)| !(parent == previous && c == child));
        }
        self.containment.push((container, child));
        Ok(())
    }

    /// Record a chained relationship between two references
    pub fn add_relationship(&mut self, relationship: Relationship) -> Result<()> {
        self.ensure_open()?;
        if !self.relationships.contains(&relationship) {
            self.relationships.push(relationship);
        }
        Ok(())
    }

    /// Freeze the catalog; declared parameters are immutable from here on
    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn ensure_open(&self) -> Result<()> {
        if self.finalized {
            return Err(Error::Finalized(self.name.clone()));
        }
        Ok(())
    }

    pub fn id_of(&self, reference: &ResourceRef) -> Option<ResourceId> {
        self.index.get(reference).copied()
    }

    pub fn resource(&self, reference: &ResourceRef) -> Option<&Resource> {
        self.id_of(reference).map(|id| &self.resources[id])
    }

    pub fn get(&self, id: ResourceId) -> Option<&Resource> {
        self.resources.get(id)
    }

    /// Mutable access, only while the catalog is still being compiled
    pub fn get_mut(&mut self, id: ResourceId) -> Option<&mut Resource> {
        if self.finalized {
            return None;
        }
        self.resources.get_mut(id)
    }

    /// Every resource with its id, in declaration order
    pub fn resources(&self) -> impl Iterator<Item = (ResourceId, &Resource)> {
        self.resources.iter().enumerate()
    }

    /// Resources this node applies itself (not virtual, not exported)
    pub fn managed_resources(&self) -> impl Iterator<Item = (ResourceId, &Resource)> {
        self.resources().filter(|(_, r)| r.is_managed_here())
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn containment(&self) -> &[(ResourceId, ResourceId)] {
        &self.containment
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    pub fn container_of(&self, id: ResourceId) -> Option<ResourceId> {
        self.parents.get(&id).copied()
    }

    /// Direct children of a container, in declaration order
    pub fn children(&self, container: ResourceId) -> Vec<ResourceId> {
        self.containment
            .iter()
            .filter(|(parent, _)| *parent == container)
            .map(|(_, child)| *child)
            .collect()
    }

    /// The enclosing containers of a resource, innermost first
    pub fn ancestors(&self, id: ResourceId) -> Vec<ResourceId> {
        let mut out = Vec::new();
        let mut current = id;
        while let Some(parent) = self.container_of(current) {
            if out.contains(&parent) {
                break;
            }
            out.push(parent);
            current = parent;
        }
        out
    }

    /// Resources of the given kind
    pub fn of_kind(&self, kind: ResourceKind) -> Vec<ResourceId> {
        self.resources()
            .filter(|(_, r)| r.kind == kind)
            .map(|(id, _)| id)
            .collect()
    }

    /// Flip a virtual resource to a managed one
    pub fn realize(&mut self, reference: &ResourceRef) -> Result<()> {
        self.ensure_open()?;
        let id = self
            .id_of(reference)
            .ok_or_else(|| Error::NotFound(reference.to_string()))?;
        let resource = &mut self.resources[id];
        if resource.origin == Origin::Virtual {
            resource.origin = Origin::Here;
        }
        Ok(())
    }

    /// Add resources collected from other nodes' exports
    pub fn import(&mut self, resources: Vec<Resource>) -> Result<Vec<ResourceId>> {
        resources
            .into_iter()
            .map(|mut r| {
                r.origin = Origin::Imported;
                self.add_resource(r)
            })
            .collect()
    }

    /// Serialize as pretty JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
