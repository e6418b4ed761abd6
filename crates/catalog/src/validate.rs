//! Post-compilation catalog validators
//!
//! Validators are read-only: each inspects the finished catalog and either
//! returns silently or reports the first broken invariant with the location
//! of the offending resource.

use crate::catalog::{Catalog, ResourceId};
use crate::error::{CatalogValidationError, ValidationKind};
use crate::resource::{RelationshipParam, ResourceKind};
use crate::types::TypeRegistry;
use crate::value::ResourceRef;
use std::collections::BTreeMap;

type ValidationResult = std::result::Result<(), CatalogValidationError>;

/// When a validator runs relative to catalog finalization
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValidationStage {
    /// Before the catalog is frozen
    PreFinish,
    /// After the catalog (and its environment peers) are complete
    Final,
}

/// Everything a validator may look at
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    pub catalog: &'a Catalog,
    pub types: &'a TypeRegistry,
    /// Other catalogs compiled for the same environment
    pub peers: &'a [&'a Catalog],
}

impl<'a> ValidationContext<'a> {
    pub fn new(catalog: &'a Catalog, types: &'a TypeRegistry) -> Self {
        Self {
            catalog,
            types,
            peers: &[],
        }
    }

    pub fn with_peers(mut self, peers: &'a [&'a Catalog]) -> Self {
        self.peers = peers;
        self
    }

    /// The catalog under validation followed by its peers
    fn environment(&self) -> impl Iterator<Item = &'a Catalog> {
        std::iter::once(self.catalog).chain(self.peers.iter().copied())
    }
}

/// A single named check over a compiled catalog
pub trait CatalogValidator: Send + Sync {
    fn name(&self) -> &'static str;

    fn stage(&self) -> ValidationStage;

    fn validate(&self, context: &ValidationContext<'_>) -> ValidationResult;
}

/// Only `require`, `consume` and `export` may point at a capability, and
/// `consume`/`export` may only point at capabilities
#[derive(Debug, Default)]
pub struct RelationshipValidator;

impl CatalogValidator for RelationshipValidator {
    fn name(&self) -> &'static str {
        "relationship"
    }

    fn stage(&self) -> ValidationStage {
        ValidationStage::PreFinish
    }

    fn validate(&self, context: &ValidationContext<'_>) -> ValidationResult {
        for (_, resource) in context.catalog.resources() {
            for (param, target) in resource.relationships() {
                let is_capability = context.types.is_capability(&target.type_name);
                if is_capability && !param.allowed_for_capability() {
                    return Err(CatalogValidationError::new(
                        ValidationKind::RelationshipMisuse,
                        format!(
                            "'{}' is not a valid relationship to a capability",
                            param.as_str()
                        ),
                        resource.location.clone(),
                    ));
                }
                if !is_capability
                    && matches!(param, RelationshipParam::Consume | RelationshipParam::Export)
                {
                    return Err(CatalogValidationError::new(
                        ValidationKind::RelationshipMisuse,
                        format!(
                            "'{}' used in '{}' on {} is not a capability resource",
                            target,
                            param.as_str(),
                            resource.reference
                        ),
                        resource.location.clone(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Every consumed or required capability has exactly one exporter across
/// the environment
#[derive(Debug, Default)]
pub struct EnvironmentRelationshipValidator;

impl CatalogValidator for EnvironmentRelationshipValidator {
    fn name(&self) -> &'static str {
        "environment relationship"
    }

    fn stage(&self) -> ValidationStage {
        ValidationStage::Final
    }

    fn validate(&self, context: &ValidationContext<'_>) -> ValidationResult {
        // capability -> (param, referencing resource, its location)
        let mut assumed = BTreeMap::new();
        // capability -> (node, exporting resource); the same reference on two
        // nodes is two different resources
        let mut exported: BTreeMap<ResourceRef, (&str, &ResourceRef)> = BTreeMap::new();

        for catalog in context.environment() {
            for (_, resource) in catalog.resources() {
                for (param, target) in resource.relationships() {
                    if !context.types.is_capability(&target.type_name) {
                        continue;
                    }
                    match param {
                        RelationshipParam::Require | RelationshipParam::Consume => {
                            assumed
                                .entry(target)
                                .or_insert((param, resource.location.clone()));
                        }
                        RelationshipParam::Export => {
                            let exporter = (catalog.name.as_str(), &resource.reference);
                            match exported.get(&target) {
                                Some(&first) if first != exporter => {
                                    return Err(CatalogValidationError::new(
                                        ValidationKind::CapabilityMismatch,
                                        format!(
                                            "'{}' is exported by both '{}' on node {} and '{}' on node {}",
                                            target, first.1, first.0, exporter.1, exporter.0
                                        ),
                                        resource.location.clone(),
                                    ));
                                }
                                Some(_) => {}
                                None => {
                                    exported.insert(target, exporter);
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        for (capability, (param, location)) in assumed {
            if !exported.contains_key(&capability) {
                return Err(CatalogValidationError::new(
                    ValidationKind::CapabilityMismatch,
                    format!(
                        "Capability '{}' referenced by '{}' is never exported",
                        capability,
                        param.as_str()
                    ),
                    location,
                ));
            }
        }
        Ok(())
    }
}

/// Only application components may appear inside a site
#[derive(Debug, Default)]
pub struct SiteValidator;

impl SiteValidator {
    fn check(context: &ValidationContext<'_>, site: ResourceId) -> ValidationResult {
        let catalog = context.catalog;
        let mut pending = catalog.children(site);
        while let Some(id) = pending.pop() {
            let Some(resource) = catalog.get(id) else {
                continue;
            };
            if resource.component {
                continue;
            }
            if resource.kind == ResourceKind::Application {
                pending.extend(catalog.children(id));
                continue;
            }
            return Err(CatalogValidationError::new(
                ValidationKind::SiteContainment,
                format!(
                    "Only application components can appear inside a site - {} is not allowed",
                    resource.reference
                ),
                resource.location.clone(),
            ));
        }
        Ok(())
    }
}

impl CatalogValidator for SiteValidator {
    fn name(&self) -> &'static str {
        "site"
    }

    fn stage(&self) -> ValidationStage {
        ValidationStage::PreFinish
    }

    fn validate(&self, context: &ValidationContext<'_>) -> ValidationResult {
        for site in context.catalog.of_kind(ResourceKind::Site) {
            Self::check(context, site)?;
        }
        Ok(())
    }
}

/// An ordered set of validators
pub struct ValidatorChain {
    validators: Vec<Box<dyn CatalogValidator>>,
}

impl Default for ValidatorChain {
    fn default() -> Self {
        Self::new()
            .with(RelationshipValidator)
            .with(SiteValidator)
            .with(EnvironmentRelationshipValidator)
    }
}

impl ValidatorChain {
    /// An empty chain
    pub fn new() -> Self {
        Self {
            validators: Vec::new(),
        }
    }

    pub fn with(mut self, validator: impl CatalogValidator + 'static) -> Self {
        self.validators.push(Box::new(validator));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.validators.iter().map(|v| v.name()).collect()
    }

    /// Run the validators of one stage in registration order, stopping at
    /// the first failure
    pub fn run(&self, stage: ValidationStage, context: &ValidationContext<'_>) -> ValidationResult {
        for validator in self.validators.iter().filter(|v| v.stage() == stage) {
            log::debug!(
                "Running {} validator on catalog for {}",
                validator.name(),
                context.catalog.name
            );
            validator.validate(context)?;
        }
        Ok(())
    }

    /// Run every stage in order
    pub fn run_all(&self, context: &ValidationContext<'_>) -> ValidationResult {
        self.run(ValidationStage::PreFinish, context)?;
        self.run(ValidationStage::Final, context)
    }
}
