//! file - plain files and directories

use anyhow::{Context, Result, bail};
use catalog::{Resource, Value};
use provider::{Provider, State, values_match};
use similar::TextDiff;
use std::fs;
use std::path::{Path, PathBuf};

/// Digest stored as the current `content` value
fn digest(content: &[u8]) -> String {
    format!("{{blake3}}{}", blake3::hash(content).to_hex())
}

fn path_of(resource: &Resource) -> PathBuf {
    PathBuf::from(resource.get_str("path").unwrap_or_else(|| resource.title()))
}

fn content_of(resource: &Resource) -> Option<String> {
    resource.get("content").map(ToString::to_string)
}

/// Unified diff between what is on disk and what is declared
pub fn content_diff(path: &Path, current: &str, desired: &str) -> String {
    let label = path.display().to_string();
    TextDiff::from_lines(current, desired)
        .unified_diff()
        .header(&label, &label)
        .to_string()
}

pub struct FilePosix;

impl FilePosix {
    fn write(path: &Path, resource: &Resource) -> Result<()> {
        let content = content_of(resource).unwrap_or_default();
        fs::write(path, content).with_context(|| format!("Could not write {}", path.display()))?;
        if let Some(mode) = resource.get("mode") {
            set_mode(path, mode)?;
        }
        Ok(())
    }
}

impl Provider for FilePosix {
    fn retrieve(&self, resource: &Resource) -> Result<State> {
        let path = path_of(resource);
        let mut state = State::new();
        let metadata = match fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                state.insert("ensure".to_string(), Value::from("absent"));
                return Ok(state);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Could not stat {}", path.display()));
            }
        };

        let kind = if metadata.is_dir() { "directory" } else { "file" };
        state.insert("ensure".to_string(), Value::from(kind));

        if metadata.is_file()
            && let Some(desired) = content_of(resource)
        {
            let current = fs::read(&path).with_context(|| format!("Could not read {}", path.display()))?;
            if current != desired.as_bytes()
                && let Ok(text) = std::str::from_utf8(&current)
            {
                log::info!(
                    "{}: content differs\n{}",
                    resource.reference,
                    content_diff(&path, text, &desired)
                );
            }
            state.insert("content".to_string(), Value::from(digest(&current)));
        }
        if let Some(mode) = mode_of(&metadata) {
            state.insert("mode".to_string(), Value::from(mode));
        }
        Ok(state)
    }

    fn insync(&self, property: &str, current: &Value, desired: &Value) -> bool {
        match property {
            "ensure" if desired.as_str() == Some("present") => current.as_str() != Some("absent"),
            "content" => current.as_str() == Some(digest(desired.to_string().as_bytes()).as_str()),
            "mode" => match (parse_mode(current), parse_mode(desired)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
            _ => values_match(current, desired),
        }
    }

    fn create(&self, resource: &Resource) -> Result<()> {
        let path = path_of(resource);
        match resource.get_str("ensure") {
            Some("directory") => {
                fs::create_dir(&path)
                    .with_context(|| format!("Could not create directory {}", path.display()))?;
                if let Some(mode) = resource.get("mode") {
                    set_mode(&path, mode)?;
                }
                Ok(())
            }
            _ => Self::write(&path, resource),
        }
    }

    fn destroy(&self, resource: &Resource) -> Result<()> {
        let path = path_of(resource);
        let metadata = fs::symlink_metadata(&path)
            .with_context(|| format!("Could not stat {}", path.display()))?;
        if metadata.is_dir() {
            // only empty directories; anything else needs an explicit purge
            fs::remove_dir(&path)
                .with_context(|| format!("Could not remove directory {}", path.display()))
        } else {
            fs::remove_file(&path).with_context(|| format!("Could not remove {}", path.display()))
        }
    }

    fn sync(&self, resource: &Resource, property: &str, desired: &Value) -> Result<()> {
        let path = path_of(resource);
        match property {
            "ensure" => bail!(
                "Could not set '{desired}' on ensure: {} already exists with another type",
                path.display()
            ),
            "content" => fs::write(&path, desired.to_string())
                .with_context(|| format!("Could not write {}", path.display())),
            "mode" => set_mode(&path, desired),
            other => bail!("Unsupported file property '{other}'"),
        }
    }
}

/// Selection-only stand-in for Windows hosts
pub struct FileWindows;

impl Provider for FileWindows {
    fn retrieve(&self, resource: &Resource) -> Result<State> {
        bail!("{}: file management is not available on Windows hosts", resource.reference)
    }

    fn sync(&self, resource: &Resource, _property: &str, _desired: &Value) -> Result<()> {
        bail!("{}: file management is not available on Windows hosts", resource.reference)
    }
}

fn parse_mode(value: &Value) -> Option<u32> {
    match value {
        Value::Integer(i) => u32::from_str_radix(&i.to_string(), 8).ok(),
        other => u32::from_str_radix(other.as_str()?, 8).ok(),
    }
}

#[cfg(unix)]
fn mode_of(metadata: &fs::Metadata) -> Option<String> {
    use std::os::unix::fs::PermissionsExt;
    Some(format!("{:04o}", metadata.permissions().mode() & 0o7777))
}

#[cfg(not(unix))]
fn mode_of(_metadata: &fs::Metadata) -> Option<String> {
    None
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: &Value) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let Some(bits) = parse_mode(mode) else {
        bail!("Invalid mode '{mode}' for {}", path.display());
    };
    fs::set_permissions(path, fs::Permissions::from_mode(bits))
        .with_context(|| format!("Could not set mode on {}", path.display()))
}

#[cfg(not(unix))]
fn set_mode(path: &Path, _mode: &Value) -> Result<()> {
    bail!("Setting a mode on {} is not supported here", path.display())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &Path) -> Resource {
        Resource::new("file", path.to_string_lossy().into_owned())
    }

    #[test]
    fn test_missing_file_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let state = FilePosix.retrieve(&file(&dir.path().join("nope"))).unwrap();
        assert_eq!(state["ensure"], Value::from("absent"));
    }

    #[test]
    fn test_create_writes_content_and_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("motd");
        let resource = file(&path)
            .with_param("ensure", "file")
            .with_param("content", "hello\n")
            .with_param("mode", "0600");

        FilePosix.create(&resource).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello\n");

        let state = FilePosix.retrieve(&resource).unwrap();
        assert_eq!(state["ensure"], Value::from("file"));
        assert!(FilePosix.insync("content", &state["content"], &Value::from("hello\n")));
        assert!(!FilePosix.insync("content", &state["content"], &Value::from("bye\n")));
        #[cfg(unix)]
        assert!(FilePosix.insync("mode", &state["mode"], &Value::from("600")));
    }

    #[test]
    fn test_sync_and_destroy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf");
        fs::write(&path, "old\n").unwrap();
        let resource = file(&path).with_param("content", "new\n");

        FilePosix.sync(&resource, "content", &Value::from("new\n")).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new\n");
        assert!(FilePosix.sync(&resource, "ensure", &Value::from("directory")).is_err());

        FilePosix.destroy(&resource).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        let resource = file(&path).with_param("ensure", "directory");
        FilePosix.create(&resource).unwrap();

        let state = FilePosix.retrieve(&resource).unwrap();
        assert_eq!(state["ensure"], Value::from("directory"));
        assert!(FilePosix.insync("ensure", &state["ensure"], &Value::from("present")));
        assert!(!FilePosix.insync("ensure", &state["ensure"], &Value::from("file")));
    }

    #[test]
    fn test_content_diff_is_unified() {
        let diff = content_diff(Path::new("/etc/motd"), "a\nb\n", "a\nc\n");
        assert!(diff.contains("--- /etc/motd"));
        assert!(diff.contains("-b"));
        assert!(diff.contains("+c"));
    }

    #[test]
    fn test_windows_shim_refuses_to_manage() {
        assert!(FileWindows.retrieve(&Resource::new("file", "C:/x")).is_err());
    }
}
