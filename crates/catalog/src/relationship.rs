//! Relationship graph construction
//!
//! Turns a catalog into the graph the transaction walks. Containers
//! (stages, classes, defined type instances, applications, sites) are
//! replaced by two marker vertices, *admissible* and *completed*, so that
//! an edge to a container orders before everything it contains and an edge
//! from a container orders after everything it contains.

use crate::catalog::{Catalog, ResourceId};
use crate::error::{Error, Result};
use crate::graph::{EdgeLabel, GraphEdge, SimpleGraph};
use crate::resource::RelationshipParam;
use crate::types::TypeRegistry;
use crate::value::ResourceRef;
use std::collections::HashMap;

/// A vertex of the relationship graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vertex {
    /// A provider-managed resource
    Resource(ResourceId),
    /// Entry marker of a container
    Admissible(ResourceId),
    /// Exit marker of a container
    Completed(ResourceId),
}

impl Vertex {
    pub fn resource_id(&self) -> ResourceId {
        match *self {
            Self::Resource(id) | Self::Admissible(id) | Self::Completed(id) => id,
        }
    }

    pub fn is_resource(&self) -> bool {
        matches!(self, Self::Resource(_))
    }
}

/// The dependency graph of a finished catalog
#[derive(Debug, Clone)]
pub struct RelationshipGraph {
    graph: SimpleGraph,
    vertices: Vec<Vertex>,
    lookup: HashMap<Vertex, usize>,
}

impl RelationshipGraph {
    /// Build the graph: containment, metaparameter and chained edges, then
    /// type-supplied autorequires; fails on dangling references and cycles
    pub fn build(catalog: &Catalog, types: &TypeRegistry) -> Result<Self> {
        let mut graph = Self {
            graph: SimpleGraph::new(),
            vertices: Vec::new(),
            lookup: HashMap::new(),
        };

        for (id, resource) in catalog.managed_resources() {
            if types.is_capability(resource.type_name()) {
                continue;
            }
            if resource.kind.is_container() {
                graph.insert(Vertex::Admissible(id), id * 3);
                graph.insert(Vertex::Completed(id), id * 3 + 2);
            } else {
                graph.insert(Vertex::Resource(id), id * 3 + 1);
            }
        }

        graph.add_containment_edges(catalog);
        graph.add_metaparam_edges(catalog, types)?;
        graph.add_chained_edges(catalog, types)?;
        graph.add_autorequire_edges(catalog, types);
        graph.check_acyclic(catalog)?;

        log::debug!(
            "Relationship graph for {}: {} vertices, {} edges",
            catalog.name,
            graph.vertices.len(),
            graph.graph.edges().len()
        );
        Ok(graph)
    }

    fn insert(&mut self, vertex: Vertex, priority: usize) {
        let index = self.graph.add_vertex(priority);
        self.vertices.push(vertex);
        self.lookup.insert(vertex, index);
    }

    /// Vertex through which a resource is entered (edges *to* it land here)
    fn entry(&self, id: ResourceId) -> Option<usize> {
        self.lookup
            .get(&Vertex::Resource(id))
            .or_else(|| self.lookup.get(&Vertex::Admissible(id)))
            .copied()
    }

    /// Vertex through which a resource is left (edges *from* it start here)
    fn exit(&self, id: ResourceId) -> Option<usize> {
        self.lookup
            .get(&Vertex::Resource(id))
            .or_else(|| self.lookup.get(&Vertex::Completed(id)))
            .copied()
    }

    fn add_containment_edges(&mut self, catalog: &Catalog) {
        for (id, resource) in catalog.managed_resources() {
            if !resource.kind.is_container() {
                continue;
            }
            let (Some(admissible), Some(completed)) = (
                self.lookup.get(&Vertex::Admissible(id)).copied(),
                self.lookup.get(&Vertex::Completed(id)).copied(),
            ) else {
                continue;
            };

            let mut contains_any = false;
            for child in catalog.children(id) {
                let (Some(entry), Some(exit)) = (self.entry(child), self.exit(child)) else {
                    continue;
                };
                self.graph.add_edge(admissible, entry, EdgeLabel::containment());
                self.graph.add_edge(exit, completed, EdgeLabel::containment());
                contains_any = true;
            }
            if !contains_any {
                self.graph.add_edge(admissible, completed, EdgeLabel::containment());
            }
        }
    }

    fn add_metaparam_edges(&mut self, catalog: &Catalog, types: &TypeRegistry) -> Result<()> {
        for (id, resource) in catalog.managed_resources() {
            for (param, target) in resource.relationships() {
                if matches!(param, RelationshipParam::Consume | RelationshipParam::Export) {
                    continue;
                }
                let Some(target_id) = self.resolve(catalog, types, &target, id)? else {
                    continue;
                };
                let label = if param.is_notification() {
                    EdgeLabel::notification()
                } else {
                    EdgeLabel::ordering()
                };
                if param.points_inward() {
                    self.connect(target_id, id, label);
                } else {
                    self.connect(id, target_id, label);
                }
            }
        }
        Ok(())
    }

    fn add_chained_edges(&mut self, catalog: &Catalog, types: &TypeRegistry) -> Result<()> {
        for relationship in catalog.relationships() {
            let source_id = catalog.id_of(&relationship.source).ok_or_else(|| {
                Error::MissingRelationshipTarget {
                    target: relationship.source.to_string(),
                    source_ref: relationship.target.to_string(),
                    location: Default::default(),
                }
            })?;
            let Some(target_id) = self.resolve(catalog, types, &relationship.target, source_id)?
            else {
                continue;
            };
            if types.is_capability(&relationship.source.type_name) {
                continue;
            }
            let label = EdgeLabel {
                notification: relationship.notification,
                dependency: !relationship.notification,
                right2left: relationship.right2left,
                containment: false,
            };
            self.connect(source_id, target_id, label);
        }
        Ok(())
    }

    fn add_autorequire_edges(&mut self, catalog: &Catalog, types: &TypeRegistry) {
        for (id, resource) in catalog.managed_resources() {
            let Some(hook) = types
                .get(resource.type_name())
                .and_then(|t| t.autorequire.clone())
            else {
                continue;
            };
            for dependency in hook(resource, catalog) {
                let Some(dep_id) = catalog.id_of(&dependency) else {
                    continue;
                };
                if dep_id == id {
                    continue;
                }
                let (Some(from), Some(to)) = (self.exit(dep_id), self.entry(id)) else {
                    continue;
                };
                // explicit relationships win over implicit ones
                if self.graph.adjacent(from, to)
                    || self
                        .exit(id)
                        .zip(self.entry(dep_id))
                        .is_some_and(|(a, b)| self.graph.adjacent(a, b))
                {
                    continue;
                }
                log::debug!("Autorequiring {} for {}", dependency, resource.reference);
                self.graph.add_edge(from, to, EdgeLabel::ordering());
            }
        }
    }

    /// Find the target of a relationship; capability and unmanaged targets
    /// produce no local edge
    fn resolve(
        &self,
        catalog: &Catalog,
        types: &TypeRegistry,
        target: &ResourceRef,
        declared_on: ResourceId,
    ) -> Result<Option<ResourceId>> {
        if types.is_capability(&target.type_name) {
            return Ok(None);
        }
        let declaring = catalog.get(declared_on);
        match catalog.id_of(target) {
            Some(id) if self.entry(id).is_some() => Ok(Some(id)),
            Some(_) => Ok(None),
            None => Err(Error::MissingRelationshipTarget {
                target: target.to_string(),
                source_ref: declaring.map(|r| r.reference.to_string()).unwrap_or_default(),
                location: declaring.map(|r| r.location.clone()).unwrap_or_default(),
            }),
        }
    }

    fn connect(&mut self, source: ResourceId, target: ResourceId, label: EdgeLabel) {
        if let (Some(from), Some(to)) = (self.exit(source), self.entry(target)) {
            self.graph.add_edge(from, to, label);
        }
    }

    /// Add an edge contributed after construction (e.g. by a type plugin)
    pub fn add_dependency(
        &mut self,
        catalog: &Catalog,
        source: &ResourceRef,
        target: &ResourceRef,
        label: EdgeLabel,
    ) -> Result<()> {
        let source_id = catalog
            .id_of(source)
            .ok_or_else(|| Error::NotFound(source.to_string()))?;
        let target_id = catalog
            .id_of(target)
            .ok_or_else(|| Error::NotFound(target.to_string()))?;
        self.connect(source_id, target_id, label);
        self.check_acyclic(catalog)
    }

    fn check_acyclic(&self, catalog: &Catalog) -> Result<()> {
        match self.graph.topsort() {
            Ok(_) => Ok(()),
            Err(cycles) => {
                let cycles = cycles
                    .into_iter()
                    .map(|cycle| self.describe_cycle(catalog, &cycle))
                    .collect();
                Err(Error::Cycle { cycles })
            }
        }
    }

    /// Render a vertex cycle as resource references, collapsing a
    /// container's marker vertices into the container itself
    fn describe_cycle(&self, catalog: &Catalog, cycle: &[usize]) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for &v in cycle {
            let id = self.vertices[v].resource_id();
            let name = catalog
                .get(id)
                .map(|r| r.reference.to_string())
                .unwrap_or_else(|| format!("#{id}"));
            if names.last() != Some(&name) {
                names.push(name);
            }
        }
        if names.len() > 1 && names.first() == names.last() {
            names.pop();
        }
        names
    }

    /// Vertices in dependency order, ties broken by declaration order
    pub fn topological_order(&self, catalog: &Catalog) -> Result<Vec<usize>> {
        self.graph.topsort().map_err(|cycles| Error::Cycle {
            cycles: cycles
                .iter()
                .map(|cycle| self.describe_cycle(catalog, cycle))
                .collect(),
        })
    }

    pub fn vertex(&self, index: usize) -> Vertex {
        self.vertices[index]
    }

    pub fn index_of(&self, vertex: Vertex) -> Option<usize> {
        self.lookup.get(&vertex).copied()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn in_edges(&self, index: usize) -> impl Iterator<Item = &GraphEdge> {
        self.graph.in_edges(index)
    }

    pub fn out_edges(&self, index: usize) -> impl Iterator<Item = &GraphEdge> {
        self.graph.out_edges(index)
    }

    pub fn edges(&self) -> &[GraphEdge] {
        self.graph.edges()
    }

    /// Managed resources reachable downstream of the given resource
    pub fn dependents(&self, id: ResourceId) -> Vec<ResourceId> {
        let Some(start) = self.exit(id) else {
            return Vec::new();
        };
        let mut out: Vec<ResourceId> = self
            .graph
            .downstream_from(start)
            .into_iter()
            .filter_map(|v| match self.vertices[v] {
                Vertex::Resource(r) => Some(r),
                _ => None,
            })
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }
}
