//! `puppet apply`

use super::{Context, certname, environment, node_facts};
use crate::cli::ApplyArgs;
use crate::settings::Settings;
use crate::types::builtin_types;
use crate::ui::ConsoleProgress;
use crate::{facts, providers};
use anyhow::{Context as _, Result};
use provider::{FactCache, Host};
use std::path::{Path, PathBuf};
use transaction::{
    JsonFileSink, LogSink, ProgressCallback, ReportSink, Transaction, TransactionOptions,
    TransactionReport, save_report,
};

/// What to apply and how
pub struct ApplyOptions<'a> {
    pub manifest: Option<&'a Path>,
    pub facts: Option<&'a Path>,
    pub noop: bool,
    pub report_dir: Option<PathBuf>,
}

/// Compile the manifest for this host and apply the catalog
///
/// Returns the process exit code derived from the report.
pub fn run(ctx: &Context, args: &ApplyArgs) -> Result<i32> {
    let settings = &ctx.settings;
    let options = ApplyOptions {
        manifest: args.manifest.as_deref(),
        facts: args.facts.as_deref(),
        noop: args.noop || settings.noop,
        report_dir: args.report_dir.clone().or_else(|| settings.reportdir()),
    };
    let mut progress = ConsoleProgress::new(ctx.quiet, ctx.verbose > 0);
    let report = apply(settings, &options, &mut progress)?;
    Ok(report.exit_code(args.detailed_exitcodes || settings.detailed_exitcodes))
}

pub fn apply<P: ProgressCallback>(
    settings: &Settings,
    options: &ApplyOptions<'_>,
    progress: &mut P,
) -> Result<TransactionReport> {
    let facts = node_facts(settings, options.facts)?;
    let node = certname(settings, &facts);
    let env = environment(settings, options.manifest)?;
    let types = builtin_types(&settings.capability_types);

    let catalog = language::compile(&node, &facts, &env, &types)?;

    let providers = providers::builtin_providers();
    let host = Host::from_facts(facts)
        .with_settings(settings.as_map())
        .with_features(facts::features(&settings.features))
        .with_cache(FactCache::shared());

    let report = Transaction::new(&catalog, &types, &providers, &host)
        .with_options(TransactionOptions {
            noop: options.noop,
        })
        .evaluate(progress)
        .with_context(|| format!("Could not apply catalog for {node}"))?;

    let mut sinks: Vec<Box<dyn ReportSink>> = vec![Box::new(LogSink)];
    if let Some(dir) = &options.report_dir {
        sinks.push(Box::new(JsonFileSink::new(dir)));
    }
    save_report(&report, &sinks);
    Ok(report)
}
