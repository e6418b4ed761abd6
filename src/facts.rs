//! Local fact gathering
//!
//! A small built-in fact set: identity, OS family, architecture and user.
//! Facts from the settings' `factsfile` and from `--facts` are layered on
//! top, later sources winning.

use anyhow::{Context, Result, bail};
use provider::FeatureSet;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Facts describing the local machine
pub fn gather() -> HashMap<String, String> {
    let mut facts = HashMap::new();

    let hostname = hostname().unwrap_or_else(|| "localhost".to_string());
    let (short, domain) = match hostname.split_once('.') {
        Some((short, domain)) => (short.to_string(), Some(domain.to_string())),
        None => (hostname.clone(), None),
    };
    facts.insert("hostname".to_string(), short);
    if let Some(domain) = domain {
        facts.insert("domain".to_string(), domain);
    }
    facts.insert("fqdn".to_string(), hostname);

    facts.insert("kernel".to_string(), kernel().to_string());
    facts.insert("architecture".to_string(), std::env::consts::ARCH.to_string());

    let os_release = fs::read_to_string("/etc/os-release").unwrap_or_default();
    let (osfamily, operatingsystem) = os_family(std::env::consts::OS, &parse_os_release(&os_release));
    facts.insert("osfamily".to_string(), osfamily);
    facts.insert("operatingsystem".to_string(), operatingsystem);

    if let Ok(user) = std::env::var("USER") {
        facts.insert("id".to_string(), user);
    }
    if let Ok(path) = std::env::var("PATH") {
        facts.insert("path".to_string(), path);
    }
    facts.insert("is_root".to_string(), is_root().to_string());
    facts
}

/// Read extra facts from a JSON or TOML file of top-level keys
///
/// Non-string values are stored in their textual form.
pub fn load_file(path: &Path) -> Result<HashMap<String, String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Could not read facts file {}", path.display()))?;
    let is_toml = path.extension().is_some_and(|ext| ext == "toml");

    let table: serde_json::Map<String, serde_json::Value> = if is_toml {
        let value: toml::Value = toml::from_str(&content)
            .with_context(|| format!("Invalid TOML in {}", path.display()))?;
        match serde_json::to_value(value)? {
            serde_json::Value::Object(map) => map,
            _ => bail!("Facts file {} must contain a table", path.display()),
        }
    } else {
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in {}", path.display()))?
    };

    Ok(table
        .into_iter()
        .map(|(name, value)| {
            let text = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (name, text)
        })
        .collect())
}

/// Features confines can ask for: `posix`, `root` and any configured names
pub fn features(extra: &[String]) -> FeatureSet {
    let mut features = FeatureSet::new()
        .with_check("posix", || cfg!(unix))
        .with_check("root", is_root);
    for name in extra {
        features = features.with(name, true);
    }
    features
}

#[cfg(unix)]
fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn is_root() -> bool {
    false
}

#[cfg(unix)]
fn hostname() -> Option<String> {
    let mut buf = [0_u8; 256];
    // SAFETY: buf is valid for writes of buf.len() bytes
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast::<libc::c_char>(), buf.len()) };
    if rc != 0 {
        return None;
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let name = String::from_utf8_lossy(&buf[..end]).trim().to_string();
    (!name.is_empty()).then_some(name)
}

#[cfg(not(unix))]
fn hostname() -> Option<String> {
    std::env::var("COMPUTERNAME").ok()
}

fn kernel() -> &'static str {
    match std::env::consts::OS {
        "linux" => "Linux",
        "macos" => "Darwin",
        "windows" => "windows",
        "freebsd" => "FreeBSD",
        other => other,
    }
}

fn parse_os_release(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            (
                key.trim().to_string(),
                value.trim().trim_matches('"').trim_matches('\'').to_string(),
            )
        })
        .collect()
}

/// `(osfamily, operatingsystem)` from the target OS and `/etc/os-release`
fn os_family(os: &str, release: &HashMap<String, String>) -> (String, String) {
    match os {
        "macos" => return ("Darwin".to_string(), "Darwin".to_string()),
        "windows" => return ("windows".to_string(), "windows".to_string()),
        "linux" => {}
        other => return (other.to_string(), other.to_string()),
    }

    let id = release.get("ID").map_or("linux", String::as_str);
    let operatingsystem = release
        .get("NAME")
        .and_then(|name| name.split_whitespace().next())
        .unwrap_or(id)
        .to_string();

    let mut candidates = vec![id];
    if let Some(like) = release.get("ID_LIKE") {
        candidates.extend(like.split_whitespace());
    }
    let family = candidates.iter().find_map(|candidate| match *candidate {
        "debian" | "ubuntu" => Some("Debian"),
        "rhel" | "centos" | "fedora" | "rocky" | "almalinux" => Some("RedHat"),
        "suse" | "opensuse" | "sles" => Some("Suse"),
        "arch" | "archlinux" => Some("Archlinux"),
        "alpine" => Some("Alpine"),
        _ => None,
    });
    (family.unwrap_or("Linux").to_string(), operatingsystem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_has_identity_facts() {
        let facts = gather();
        for name in ["hostname", "fqdn", "kernel", "architecture", "osfamily"] {
            assert!(facts.contains_key(name), "missing fact {name}");
        }
        assert!(facts["fqdn"].starts_with(&facts["hostname"]));
    }

    #[test]
    fn test_os_family_from_id_like() {
        let release = parse_os_release(
            "NAME=\"Linux Mint\"\nID=linuxmint\nID_LIKE=\"ubuntu debian\"\nVERSION_ID=\"21.3\"\n",
        );
        assert_eq!(
            os_family("linux", &release),
            ("Debian".to_string(), "Linux".to_string())
        );

        let rocky = parse_os_release("NAME=\"Rocky Linux\"\nID=\"rocky\"\n");
        assert_eq!(os_family("linux", &rocky).0, "RedHat");
        assert_eq!(os_family("macos", &HashMap::new()).0, "Darwin");
        assert_eq!(os_family("linux", &HashMap::new()).0, "Linux");
    }

    #[test]
    fn test_load_json_and_toml_facts() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("facts.json");
        fs::write(&json, r#"{"role": "web", "cores": 8, "virtual": false}"#).unwrap();
        let facts = load_file(&json).unwrap();
        assert_eq!(facts["role"], "web");
        assert_eq!(facts["cores"], "8");
        assert_eq!(facts["virtual"], "false");

        let toml = dir.path().join("facts.toml");
        fs::write(&toml, "role = \"db\"\n").unwrap();
        assert_eq!(load_file(&toml).unwrap()["role"], "db");

        let broken = dir.path().join("broken.json");
        fs::write(&broken, "[1, 2]").unwrap();
        assert!(load_file(&broken).is_err());
    }

    #[test]
    fn test_configured_features() {
        let host = provider::Host::from_facts(HashMap::new())
            .with_features(features(&["selinux".to_string()]));
        assert!(host.feature("selinux"));
        assert_eq!(host.feature("posix"), cfg!(unix));
        assert!(!host.feature("augeas"));
    }
}
