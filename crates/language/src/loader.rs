//! Environments, the parsed-manifest cache and module autoloading

use crate::ast::Program;
use crate::error::Result;
use crate::parser;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use walkdir::WalkDir;

/// Where an environment's main manifest comes from
#[derive(Debug, Clone)]
pub enum ManifestSource {
    /// A `.pp` file, or a directory whose `.pp` files are read in name order
    Path(PathBuf),
    /// Code held in memory, labelled `name` in locations
    Inline { name: String, code: String },
}

/// A named set of manifests plus the module path classes are loaded from
#[derive(Debug, Clone)]
pub struct Environment {
    pub name: String,
    pub manifests: Vec<ManifestSource>,
    pub modulepath: Vec<PathBuf>,
}

impl Environment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            manifests: Vec::new(),
            modulepath: Vec::new(),
        }
    }

    pub fn with_manifest(mut self, path: impl Into<PathBuf>) -> Self {
        self.manifests.push(ManifestSource::Path(path.into()));
        self
    }

    pub fn with_code(mut self, name: impl Into<String>, code: impl Into<String>) -> Self {
        self.manifests.push(ManifestSource::Inline {
            name: name.into(),
            code: code.into(),
        });
        self
    }

    pub fn with_modulepath(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.modulepath.extend(paths);
        self
    }
}

/// Parsed manifests keyed by path, shared by concurrent compiles
///
/// Readers take the read lock; a miss parses outside any lock and then
/// takes the write lock only long enough to insert.
#[derive(Debug, Default)]
pub struct ManifestCache {
    programs: RwLock<HashMap<PathBuf, Arc<Program>>>,
}

impl ManifestCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The parsed program for `path`, parsing it on first use
    pub fn get_or_parse(&self, path: &Path) -> Result<Arc<Program>> {
        if let Some(program) = self
            .programs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
        {
            return Ok(Arc::clone(program));
        }

        log::debug!("Parsing {}", path.display());
        let program = Arc::new(parser::parse_file(path)?);
        let mut programs = self.programs.write().unwrap_or_else(PoisonError::into_inner);
        let entry = programs
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::clone(&program));
        Ok(Arc::clone(entry))
    }

    /// Drop every cached program, e.g. after manifests changed on disk
    pub fn clear(&self) {
        self.programs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.programs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reads an environment's manifests through a cache
#[derive(Debug, Clone, Copy)]
pub struct Loader<'a> {
    environment: &'a Environment,
    cache: &'a ManifestCache,
}

impl<'a> Loader<'a> {
    pub fn new(environment: &'a Environment, cache: &'a ManifestCache) -> Self {
        Self { environment, cache }
    }

    pub fn environment(&self) -> &'a Environment {
        self.environment
    }

    /// Every main manifest of the environment, in order
    pub fn manifests(&self) -> Result<Vec<Arc<Program>>> {
        let mut programs = Vec::new();
        for source in &self.environment.manifests {
            match source {
                ManifestSource::Path(path) if path.is_dir() => {
                    for file in manifest_files(path) {
                        programs.push(self.cache.get_or_parse(&file)?);
                    }
                }
                ManifestSource::Path(path) => programs.push(self.cache.get_or_parse(path)?),
                ManifestSource::Inline { name, code } => {
                    programs.push(Arc::new(parser::parse_str(code, Some(name))?));
                }
            }
        }
        Ok(programs)
    }

    /// Where class or defined type `name` would live on the module path
    ///
    /// `a` maps to `a/manifests/init.pp`, `a::b::c` to `a/manifests/b/c.pp`.
    pub fn module_file(&self, name: &str) -> Option<PathBuf> {
        let mut segments = name.trim_start_matches("::").split("::");
        let module = segments.next().filter(|m| !m.is_empty())?;
        let rest: Vec<&str> = segments.collect();
        let relative = if rest.is_empty() {
            PathBuf::from(module).join("manifests").join("init.pp")
        } else {
            let mut path = PathBuf::from(module).join("manifests");
            for segment in &rest[..rest.len() - 1] {
                path.push(segment);
            }
            path.push(format!("{}.pp", rest[rest.len() - 1]));
            path
        };
        self.environment
            .modulepath
            .iter()
            .map(|dir| dir.join(&relative))
            .find(|candidate| candidate.is_file())
    }

    pub fn load(&self, path: &Path) -> Result<Arc<Program>> {
        self.cache.get_or_parse(path)
    }
}

/// `.pp` files under `dir`, sorted by path
pub fn manifest_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|path| path.extension().is_some_and(|ext| ext == "pp"))
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn module_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let manifests = dir.path().join("apache/manifests");
        fs::create_dir_all(manifests.join("mod")).unwrap();
        fs::write(manifests.join("init.pp"), "class apache { }\n").unwrap();
        fs::write(manifests.join("mod/ssl.pp"), "class apache::mod::ssl { }\n").unwrap();
        dir
    }

    #[test]
    fn test_module_file_layout() {
        let dir = module_tree();
        let env = Environment::new("production").with_modulepath([dir.path().to_path_buf()]);
        let cache = ManifestCache::new();
        let loader = Loader::new(&env, &cache);

        assert_eq!(
            loader.module_file("apache"),
            Some(dir.path().join("apache/manifests/init.pp"))
        );
        assert_eq!(
            loader.module_file("::apache::mod::ssl"),
            Some(dir.path().join("apache/manifests/mod/ssl.pp"))
        );
        assert_eq!(loader.module_file("nginx"), None);
    }

    #[test]
    fn test_cache_parses_once() {
        let dir = module_tree();
        let path = dir.path().join("apache/manifests/init.pp");
        let cache = ManifestCache::new();

        let first = cache.get_or_parse(&path).unwrap();
        let second = cache.get_or_parse(&path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_manifest_directory_is_read_in_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.pp"), "notify { 'b': }\n").unwrap();
        fs::write(dir.path().join("a.pp"), "notify { 'a': }\n").unwrap();
        fs::write(dir.path().join("README"), "not a manifest").unwrap();

        let env = Environment::new("production")
            .with_manifest(dir.path())
            .with_code("inline.pp", "notify { 'c': }");
        let cache = ManifestCache::new();
        let programs = Loader::new(&env, &cache).manifests().unwrap();

        let files: Vec<Option<&str>> = programs.iter().map(|p| p.file.as_deref()).collect();
        assert_eq!(files.len(), 3);
        assert!(files[0].unwrap().ends_with("a.pp"));
        assert!(files[1].unwrap().ends_with("b.pp"));
        assert_eq!(files[2], Some("inline.pp"));
    }

    #[test]
    fn test_parse_errors_are_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pp");
        fs::write(&path, "notify {").unwrap();
        let cache = ManifestCache::new();
        assert!(cache.get_or_parse(&path).is_err());
        assert!(cache.is_empty());
    }
}
