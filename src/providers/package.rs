//! package - rpm packages installed through yum

use super::{output, run};
use anyhow::{Result, bail};
use catalog::{Resource, Value};
use provider::{Provider, State};

/// `yum check-update` exit code when updates are available
const UPDATES_AVAILABLE: i32 = 100;

fn name_of(resource: &Resource) -> &str {
    resource.get_str("name").unwrap_or_else(|| resource.title())
}

/// What an `ensure` value asks for
#[derive(Debug, PartialEq, Eq)]
enum Wanted<'a> {
    Installed,
    Absent,
    Purged,
    Latest,
    Version(&'a str),
}

impl<'a> Wanted<'a> {
    fn parse(desired: &'a Value) -> Result<Self> {
        match desired.as_str() {
            Some("present" | "installed") => Ok(Self::Installed),
            Some("absent") => Ok(Self::Absent),
            Some("purged") => Ok(Self::Purged),
            Some("latest") => Ok(Self::Latest),
            Some(version) if !version.is_empty() => Ok(Self::Version(version)),
            _ => bail!("Invalid value '{desired}' for ensure"),
        }
    }
}

/// `name` or `name-version` as yum takes it
fn install_target(name: &str, wanted: &Wanted<'_>) -> String {
    match wanted {
        Wanted::Version(version) => format!("{name}-{version}"),
        _ => name.to_string(),
    }
}

/// Whether the installed `version-release` satisfies a requested version,
/// which may leave the release off
fn version_matches(installed: &str, requested: &str) -> bool {
    installed == requested
        || installed
            .strip_prefix(requested)
            .is_some_and(|rest| rest.starts_with('-'))
}

/// yum exits 0 when a named package does not exist, so look for its message
fn check_available(name: &str, stdout: &[u8], stderr: &[u8]) -> Result<()> {
    let needle = "No package";
    for text in [stdout, stderr] {
        let text = String::from_utf8_lossy(text);
        if let Some(line) = text.lines().find(|line| line.contains(needle)) {
            bail!("Could not find package {name}: {}", line.trim());
        }
    }
    Ok(())
}

/// Packages on Red Hat family systems
pub struct PackageYum;

impl PackageYum {
    /// Installed `version-release`, `None` when rpm does not know the package
    fn installed(name: &str) -> Result<Option<String>> {
        let out = output("rpm", &["-q", "--qf", "%{VERSION}-%{RELEASE}\\n", name])?;
        if !out.status.success() {
            return Ok(None);
        }
        let version = String::from_utf8_lossy(&out.stdout).trim().to_string();
        Ok((!version.is_empty()).then_some(version))
    }

    fn yum(args: &[&str], name: &str) -> Result<()> {
        let out = output("yum", args)?;
        if !out.status.success() {
            bail!(
                "yum {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }
        check_available(name, &out.stdout, &out.stderr)
    }

    fn install(name: &str, wanted: &Wanted<'_>, operation: &str) -> Result<()> {
        let target = install_target(name, wanted);
        Self::yum(&["-d", "0", "-e", "0", "-y", operation, &target], name)
    }
}

impl Provider for PackageYum {
    fn retrieve(&self, resource: &Resource) -> Result<State> {
        let name = name_of(resource);
        let ensure = match Self::installed(name)? {
            None => Value::from("absent"),
            Some(version) => {
                let wants_latest = resource.get_str("ensure") == Some("latest");
                if wants_latest {
                    let code = output("yum", &["-q", "check-update", name])?.status.code();
                    if code == Some(UPDATES_AVAILABLE) {
                        Value::from(version)
                    } else {
                        Value::from("latest")
                    }
                } else {
                    Value::from(version)
                }
            }
        };
        Ok(State::from([("ensure".to_string(), ensure)]))
    }

    fn insync(&self, property: &str, current: &Value, desired: &Value) -> bool {
        if property != "ensure" {
            return provider::values_match(current, desired);
        }
        let Some(current) = current.as_str() else {
            return false;
        };
        match Wanted::parse(desired) {
            Ok(Wanted::Installed) => current != "absent",
            Ok(Wanted::Absent | Wanted::Purged) => current == "absent",
            Ok(Wanted::Latest) => current == "latest",
            Ok(Wanted::Version(version)) => version_matches(current, version),
            Err(_) => false,
        }
    }

    fn create(&self, resource: &Resource) -> Result<()> {
        let name = name_of(resource);
        let desired = resource.get("ensure").cloned().unwrap_or_else(|| Value::from("present"));
        let wanted = Wanted::parse(&desired)?;
        log::info!("{}: installing {}", resource.reference, install_target(name, &wanted));
        Self::install(name, &wanted, "install")
    }

    fn destroy(&self, resource: &Resource) -> Result<()> {
        run("rpm", &["-e", name_of(resource)])
    }

    fn sync(&self, resource: &Resource, property: &str, desired: &Value) -> Result<()> {
        if property != "ensure" {
            bail!("Unsupported package property '{property}'");
        }
        let name = name_of(resource);
        match Wanted::parse(desired)? {
            Wanted::Installed => Ok(()),
            Wanted::Absent => self.destroy(resource),
            Wanted::Purged => Self::yum(&["-y", "erase", name], name),
            Wanted::Latest => Self::yum(&["-d", "0", "-e", "0", "-y", "update", name], name),
            wanted @ Wanted::Version(_) => {
                // moving to an older version needs downgrade, which yum
                // refuses for newer ones, so try install first
                match Self::install(name, &wanted, "install") {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        log::debug!("{}: install failed, trying downgrade: {e:#}", resource.reference);
                        Self::install(name, &wanted, "downgrade")
                    }
                }
            }
        }
    }
}
