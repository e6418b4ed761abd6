//! Concurrent compilation of many nodes against one environment
//!
//! Registries are shared read-only behind `Arc`; parsed manifests are
//! shared through the [`ManifestCache`]. Every compile owns its own scope
//! chain and catalog, so nodes compile on the rayon pool without locking
//! anything but the cache.

use crate::compiler::Compiler;
use crate::error::Result;
use crate::functions::FunctionRegistry;
use crate::loader::{Environment, Loader, ManifestCache};
use catalog::{Catalog, TypeRegistry, ValidatorChain};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

/// One node to compile
#[derive(Debug, Clone)]
pub struct CompileRequest {
    pub node: String,
    pub facts: HashMap<String, String>,
}

impl CompileRequest {
    pub fn new(node: impl Into<String>, facts: HashMap<String, String>) -> Self {
        Self {
            node: node.into(),
            facts,
        }
    }
}

pub struct CompileService {
    environment: Environment,
    types: Arc<TypeRegistry>,
    functions: Arc<FunctionRegistry>,
    validators: Arc<ValidatorChain>,
    cache: ManifestCache,
}

impl CompileService {
    pub fn new(environment: Environment, types: Arc<TypeRegistry>) -> Self {
        Self {
            environment,
            types,
            functions: Arc::new(FunctionRegistry::builtin()),
            validators: Arc::new(ValidatorChain::default()),
            cache: ManifestCache::new(),
        }
    }

    pub fn with_functions(mut self, functions: Arc<FunctionRegistry>) -> Self {
        self.functions = functions;
        self
    }

    pub fn with_validators(mut self, validators: Arc<ValidatorChain>) -> Self {
        self.validators = validators;
        self
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn cache(&self) -> &ManifestCache {
        &self.cache
    }

    fn compiler(&self) -> Compiler<'_> {
        Compiler::new(&self.types, &self.functions, &self.validators)
    }

    fn loader(&self) -> Loader<'_> {
        Loader::new(&self.environment, &self.cache)
    }

    /// Compile a single node
    pub fn compile(&self, node: &str, facts: &HashMap<String, String>) -> Result<Catalog> {
        self.compiler().compile(node, facts, self.loader())
    }

    /// Compile every request in parallel
    ///
    /// Results come back in request order. Environment-wide validation runs
    /// once all compiles are done, each catalog checked against the other
    /// catalogs that compiled successfully.
    pub fn compile_many(&self, requests: &[CompileRequest]) -> Vec<Result<Catalog>> {
        log::info!(
            "Compiling {} nodes in environment {}",
            requests.len(),
            self.environment.name
        );
        let compiled: Vec<Result<Catalog>> = requests
            .par_iter()
            .map(|request| {
                self.compiler()
                    .compile_unchecked(&request.node, &request.facts, self.loader())
            })
            .collect();

        let catalogs: Vec<Option<&Catalog>> = compiled.iter().map(|result| result.as_ref().ok()).collect();
        let compiler = self.compiler();
        let checked: Vec<Result<()>> = catalogs
            .iter()
            .enumerate()
            .map(|(i, catalog)| {
                let Some(catalog) = catalog else {
                    return Ok(());
                };
                let peers: Vec<&Catalog> = catalogs
                    .iter()
                    .enumerate()
                    .filter_map(|(p, peer)| if p == i { None } else { *peer })
                    .collect();
                compiler.validate_final(catalog, &peers)
            })
            .collect();

        compiled
            .into_iter()
            .zip(checked)
            .map(|(result, checked)| {
                let catalog = result?;
                checked?;
                Ok(catalog)
            })
            .collect()
    }
}
