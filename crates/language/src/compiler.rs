//! Single-node compilation: manifests plus facts in, finalized catalog out

use crate::error::Result;
use crate::evaluator::Evaluator;
use crate::functions::FunctionRegistry;
use crate::loader::{Environment, Loader, ManifestCache};
use catalog::{
    Catalog, RelationshipGraph, TypeRegistry, ValidationContext, ValidationStage, ValidatorChain,
};
use std::collections::HashMap;
use std::time::Instant;

/// Compiles catalogs against a fixed set of types, functions and validators
#[derive(Clone, Copy)]
pub struct Compiler<'a> {
    types: &'a TypeRegistry,
    functions: &'a FunctionRegistry,
    validators: &'a ValidatorChain,
}

impl<'a> Compiler<'a> {
    pub fn new(
        types: &'a TypeRegistry,
        functions: &'a FunctionRegistry,
        validators: &'a ValidatorChain,
    ) -> Self {
        Self {
            types,
            functions,
            validators,
        }
    }

    /// Compile one node and run every validator, with no peer catalogs
    pub fn compile(
        &self,
        node: &str,
        facts: &HashMap<String, String>,
        loader: Loader<'_>,
    ) -> Result<Catalog> {
        let catalog = self.compile_unchecked(node, facts, loader)?;
        self.validate_final(&catalog, &[])?;
        Ok(catalog)
    }

    /// Compile and finalize one node, leaving environment-wide validation
    /// to the caller
    pub fn compile_unchecked(
        &self,
        node: &str,
        facts: &HashMap<String, String>,
        loader: Loader<'_>,
    ) -> Result<Catalog> {
        let started = Instant::now();
        let programs = loader.manifests()?;

        let mut evaluator = Evaluator::new(node, facts, self.types, self.functions, loader)?;
        evaluator.evaluate_programs(&programs)?;
        let mut catalog = evaluator.finish()?;
        catalog.version = chrono::Utc::now().timestamp();

        let context = ValidationContext::new(&catalog, self.types);
        self.validators
            .run(ValidationStage::PreFinish, &context)
            .map_err(catalog::Error::from)?;
        RelationshipGraph::build(&catalog, self.types)?;
        catalog.finalize();

        log::info!(
            "Compiled catalog for {} in environment {} in {:.2} seconds",
            node,
            catalog.environment,
            started.elapsed().as_secs_f64()
        );
        Ok(catalog)
    }

    /// Environment-wide checks over `catalog` and the other catalogs
    /// compiled alongside it
    pub fn validate_final(&self, catalog: &Catalog, peers: &[&Catalog]) -> Result<()> {
        let context = ValidationContext::new(catalog, self.types).with_peers(peers);
        self.validators
            .run(ValidationStage::Final, &context)
            .map_err(catalog::Error::from)?;
        Ok(())
    }
}

/// Compile `node` in `environment` with the built-in functions and the
/// default validators
pub fn compile(
    node: &str,
    facts: &HashMap<String, String>,
    environment: &Environment,
    types: &TypeRegistry,
) -> Result<Catalog> {
    let functions = FunctionRegistry::builtin();
    let validators = ValidatorChain::default();
    let cache = ManifestCache::new();
    Compiler::new(types, &functions, &validators).compile(
        node,
        facts,
        Loader::new(environment, &cache),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use catalog::{ResourceRef, ResourceType};

    fn types() -> TypeRegistry {
        let mut types = TypeRegistry::new();
        types.register(ResourceType::builtin("notify").property("message"));
        types
    }

    #[test]
    fn test_compiled_catalog_is_finalized_and_versioned() {
        let env = Environment::new("staging").with_code("site.pp", "notify { 'hi': }");
        let catalog = compile("node1", &HashMap::new(), &env, &types()).unwrap();

        assert!(catalog.is_finalized());
        assert!(catalog.version > 0);
        assert_eq!(catalog.environment, "staging");
        assert!(catalog.resource(&ResourceRef::new("notify", "hi")).is_some());
    }

    #[test]
    fn test_dangling_relationship_fails_compile() {
        let env = Environment::new("production")
            .with_code("site.pp", "notify { 'a': require => Notify['missing'] }");
        let err = compile("node1", &HashMap::new(), &env, &types()).unwrap_err();
        assert!(matches!(
            err,
            Error::Catalog(catalog::Error::MissingRelationshipTarget { .. })
        ));
    }

    #[test]
    fn test_cycle_fails_compile() {
        let env = Environment::new("production").with_code(
            "site.pp",
            "notify { 'a': } -> notify { 'b': } -> notify { 'a2': }\nNotify['a2'] -> Notify['a']",
        );
        let err = compile("node1", &HashMap::new(), &env, &types()).unwrap_err();
        let Error::Catalog(inner) = &err else {
            panic!("expected a catalog error, got {err}");
        };
        assert_eq!(inner.cycle_members().map(<[String]>::len), Some(3));
    }
}
