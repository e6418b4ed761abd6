//! `puppet parser validate`

use super::Context;
use crate::ui;
use anyhow::{Result, bail};
use std::path::{Path, PathBuf};

/// Every `.pp` file named, directories expanded
fn collect(paths: &[PathBuf]) -> Vec<PathBuf> {
    paths
        .iter()
        .flat_map(|path| {
            if path.is_dir() {
                language::manifest_files(path)
            } else {
                vec![path.clone()]
            }
        })
        .collect()
}

/// Parse each manifest, reporting all syntax errors rather than the first
pub fn validate(ctx: &Context, paths: &[PathBuf]) -> Result<()> {
    let files = collect(paths);
    let failures = check(&files, |file, error| match error {
        None if ctx.verbose > 0 => ui::success(&file.display().to_string()),
        None => {}
        Some(message) => ui::error(message),
    });

    if failures > 0 {
        bail!("{failures} of {} manifests failed to parse", files.len());
    }
    if !ctx.quiet {
        ui::success(&format!("{} manifests are valid", files.len()));
    }
    Ok(())
}

fn check(files: &[PathBuf], mut report: impl FnMut(&Path, Option<&str>)) -> usize {
    let mut failures = 0;
    for file in files {
        match language::parse_file(file) {
            Ok(_) => report(file, None),
            Err(e) => {
                failures += 1;
                report(file, Some(&e.to_string()));
            }
        }
    }
    failures
}
