pub mod apply;
pub mod compile;
pub mod parser;

use crate::facts;
use crate::settings::Settings;
use anyhow::{Result, bail};
use language::Environment;
use std::collections::HashMap;
use std::path::Path;

/// Global context for a command run
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub settings: Settings,
}

/// Facts for this run: gathered locally, then the configured facts file,
/// then `--facts`
pub fn node_facts(settings: &Settings, extra: Option<&Path>) -> Result<HashMap<String, String>> {
    let mut facts = facts::gather();
    if let Some(path) = settings.factsfile() {
        facts.extend(facts::load_file(&path)?);
    }
    if let Some(path) = extra {
        facts.extend(facts::load_file(path)?);
    }
    log::debug!("Resolved {} facts", facts.len());
    Ok(facts)
}

/// The node name: `certname`, else the `fqdn` fact
pub fn certname(settings: &Settings, facts: &HashMap<String, String>) -> String {
    settings
        .certname
        .clone()
        .or_else(|| facts.get("fqdn").cloned())
        .unwrap_or_else(|| "localhost".to_string())
}

/// The environment to compile, its manifest from the command line or the
/// settings
pub fn environment(settings: &Settings, manifest: Option<&Path>) -> Result<Environment> {
    let Some(manifest) = manifest.map(Path::to_path_buf).or_else(|| settings.manifest()) else {
        bail!("No manifest given and none configured");
    };
    if !manifest.exists() {
        bail!("Could not find manifest {}", manifest.display());
    }
    Ok(Environment::new(&settings.environment)
        .with_manifest(manifest)
        .with_modulepath(settings.modulepath()))
}
