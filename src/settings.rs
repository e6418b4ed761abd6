//! `puppet.toml` settings
//!
//! Every field is optional; a missing file means all defaults. Paths may
//! use `~`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Default settings location, `~/.config/puppet/puppet.toml`
pub fn default_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("puppet").join("puppet.toml"))
}

/// Expand `~` and environment variables in a configured path
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).map_or_else(
        |_| shellexpand::tilde(path).into_owned(),
        std::borrow::Cow::into_owned,
    );
    PathBuf::from(expanded)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Node name; defaults to the `fqdn` fact
    pub certname: Option<String>,
    pub environment: String,
    /// Directory holding one subdirectory per environment
    pub environmentpath: Option<String>,
    /// Main manifest file or directory, overriding the environment's
    pub manifest: Option<String>,
    pub modulepath: Vec<String>,
    pub noop: bool,
    /// Write JSON reports below this directory
    pub reportdir: Option<String>,
    /// JSON or TOML file of extra facts
    pub factsfile: Option<String>,
    /// Resource types treated as capabilities
    pub capability_types: Vec<String>,
    pub detailed_exitcodes: bool,
    /// Extra named features, enabled unconditionally
    pub features: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            certname: None,
            environment: "production".to_string(),
            environmentpath: None,
            manifest: None,
            modulepath: Vec::new(),
            noop: false,
            reportdir: None,
            factsfile: None,
            capability_types: Vec::new(),
            detailed_exitcodes: false,
            features: Vec::new(),
        }
    }
}

impl Settings {
    /// Load from `path`, or from the default location when `None`
    ///
    /// An explicit path must exist; the default location may be missing.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (default_path()?, false),
        };
        if !path.exists() {
            if required {
                anyhow::bail!("Settings file {} does not exist", path.display());
            }
            log::debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid settings in {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Module path entries with `~` expanded; with an environmentpath, the
    /// environment's own `modules` directory comes first
    pub fn modulepath(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(dir) = self.environment_dir() {
            paths.push(dir.join("modules"));
        }
        paths.extend(self.modulepath.iter().map(|p| expand(p)));
        paths
    }

    /// `<environmentpath>/<environment>`, when an environmentpath is set
    pub fn environment_dir(&self) -> Option<PathBuf> {
        self.environmentpath
            .as_deref()
            .map(|root| expand(root).join(&self.environment))
    }

    /// The configured main manifest, else the environment's `manifests`
    /// directory
    pub fn manifest(&self) -> Option<PathBuf> {
        self.manifest
            .as_deref()
            .map(expand)
            .or_else(|| self.environment_dir().map(|dir| dir.join("manifests")))
    }

    pub fn reportdir(&self) -> Option<PathBuf> {
        self.reportdir.as_deref().map(expand)
    }

    pub fn factsfile(&self) -> Option<PathBuf> {
        self.factsfile.as_deref().map(expand)
    }

    /// Settings as the flat string map provider confines see
    pub fn as_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::from([
            ("environment".to_string(), self.environment.clone()),
            ("noop".to_string(), self.noop.to_string()),
            (
                "detailed_exitcodes".to_string(),
                self.detailed_exitcodes.to_string(),
            ),
        ]);
        let optional = [
            ("certname", &self.certname),
            ("environmentpath", &self.environmentpath),
            ("manifest", &self.manifest),
            ("reportdir", &self.reportdir),
            ("factsfile", &self.factsfile),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                map.insert(name.to_string(), value.clone());
            }
        }
        if !self.modulepath.is_empty() {
            map.insert("modulepath".to_string(), self.modulepath.join(":"));
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::parse("").unwrap();
        assert_eq!(settings.environment, "production");
        assert!(!settings.noop);
        assert!(settings.manifest().is_none());
        assert!(settings.modulepath().is_empty());
    }

    #[test]
    fn test_parse_full_file() {
        let settings = Settings::parse(
            r#"
certname = "web1.example.com"
environment = "staging"
environmentpath = "/etc/puppet/code/environments"
modulepath = ["/opt/modules"]
noop = true
capability_types = ["sql", "http"]
"#,
        )
        .unwrap();

        assert_eq!(settings.certname.as_deref(), Some("web1.example.com"));
        assert_eq!(
            settings.manifest(),
            Some(PathBuf::from("/etc/puppet/code/environments/staging/manifests"))
        );
        assert_eq!(
            settings.modulepath(),
            vec![
                PathBuf::from("/etc/puppet/code/environments/staging/modules"),
                PathBuf::from("/opt/modules"),
            ]
        );
        assert_eq!(settings.capability_types, vec!["sql", "http"]);

        let map = settings.as_map();
        assert_eq!(map["noop"], "true");
        assert_eq!(map["certname"], "web1.example.com");
        assert!(!map.contains_key("reportdir"));
    }

    #[test]
    fn test_explicit_manifest_wins() {
        let settings = Settings::parse(
            "manifest = \"/srv/site.pp\"\nenvironmentpath = \"/envs\"",
        )
        .unwrap();
        assert_eq!(settings.manifest(), Some(PathBuf::from("/srv/site.pp")));
    }

    #[test]
    fn test_load_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(Settings::load(Some(&missing)).is_err());

        let path = dir.path().join("puppet.toml");
        fs::write(&path, "noop = true\n").unwrap();
        assert!(Settings::load(Some(&path)).unwrap().noop);
    }

    #[test]
    fn test_wrong_value_type_is_rejected() {
        assert!(Settings::parse("noop = \"yes\"").is_err());
    }

    #[test]
    fn test_tilde_expansion() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand("~/reports"), home.join("reports"));
    }
}
