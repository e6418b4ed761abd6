//! `puppet compile`

use super::{Context, certname, environment, node_facts};
use crate::cli::CompileArgs;
use crate::types::builtin_types;
use crate::ui;
use anyhow::{Result, bail};
use catalog::Catalog;
use language::{CompileRequest, CompileService};
use std::collections::HashMap;
use std::sync::Arc;

/// Print the compiled catalog (or, for several nodes, an array of them)
pub fn run(ctx: &Context, args: &CompileArgs) -> Result<()> {
    let settings = &ctx.settings;
    let facts = node_facts(settings, args.facts.as_deref())?;
    let env = environment(settings, args.manifest.as_deref())?;
    let service = CompileService::new(env, Arc::new(builtin_types(&settings.capability_types)));

    let json = match args.nodes.as_slice() {
        [] => service.compile(&certname(settings, &facts), &facts)?.to_json()?,
        [node] => service.compile(node, &facts)?.to_json()?,
        nodes => {
            let catalogs = compile_nodes(&service, nodes, &facts)?;
            serde_json::to_string_pretty(&catalogs)?
        }
    };
    println!("{json}");
    Ok(())
}

/// Compile several nodes together, so capabilities one exports can satisfy
/// another's consumers
fn compile_nodes(
    service: &CompileService,
    nodes: &[String],
    facts: &HashMap<String, String>,
) -> Result<Vec<Catalog>> {
    let requests: Vec<CompileRequest> = nodes
        .iter()
        .map(|node| CompileRequest::new(node.as_str(), facts_for(node, facts)))
        .collect();

    let mut catalogs = Vec::new();
    let mut failed = 0;
    for (node, result) in nodes.iter().zip(service.compile_many(&requests)) {
        match result {
            Ok(catalog) => catalogs.push(catalog),
            Err(e) => {
                failed += 1;
                ui::error(&format!("{node}: {e}"));
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} catalogs failed to compile", nodes.len());
    }
    Ok(catalogs)
}

/// The local facts with the node's own identity
fn facts_for(node: &str, facts: &HashMap<String, String>) -> HashMap<String, String> {
    let mut facts = facts.clone();
    let hostname = node.split('.').next().unwrap_or(node);
    facts.insert("fqdn".to_string(), node.to_string());
    facts.insert("hostname".to_string(), hostname.to_string());
    facts
}
