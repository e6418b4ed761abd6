//! exec - run a command through `sh`

use super::{shell_command, wait_with_timeout};
use anyhow::{Result, bail};
use catalog::{Resource, Value};
use provider::{Provider, State};
use std::path::Path;
use std::process::Output;
use std::time::Duration;

/// Seconds a command (or check) may run before it is killed
const DEFAULT_TIMEOUT: f64 = 300.0;

pub struct ExecPosix;

/// Strings from a parameter given as one value or an array of them
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        None | Some(Value::Undef) => Vec::new(),
        Some(Value::Array(items)) => items.iter().map(ToString::to_string).collect(),
        Some(other) => vec![other.to_string()],
    }
}

/// How to run the resource's command and its checks
struct Invocation<'a> {
    resource: &'a Resource,
    cwd: Option<&'a Path>,
    path: Option<String>,
    environment: Vec<(String, String)>,
    timeout: Option<Duration>,
}

impl<'a> Invocation<'a> {
    fn new(resource: &'a Resource) -> Result<Self> {
        let dirs = string_list(resource.get("path"));
        let path = (!dirs.is_empty()).then(|| dirs.join(":"));

        let mut environment = Vec::new();
        for setting in string_list(resource.get("environment")) {
            let Some((name, value)) = setting.split_once('=') else {
                bail!("Invalid environment setting '{setting}'");
            };
            environment.push((name.to_string(), value.to_string()));
        }

        let seconds = match resource.get("timeout") {
            None | Some(Value::Undef) => DEFAULT_TIMEOUT,
            Some(Value::Integer(i)) => *i as f64,
            Some(Value::Float(x)) => *x,
            Some(Value::String(s)) => match s.trim().parse::<f64>() {
                Ok(x) => x,
                Err(_) => bail!("The timeout must be a number."),
            },
            Some(_) => bail!("The timeout must be a number."),
        };
        if seconds < 0.0 {
            bail!("The timeout must be a number.");
        }
        let timeout = (seconds > 0.0).then(|| Duration::from_secs_f64(seconds));

        Ok(Self {
            resource,
            cwd: resource.get_str("cwd").map(Path::new),
            path,
            environment,
            timeout,
        })
    }

    fn run(&self, command: &str) -> Result<Output> {
        let mut cmd = shell_command(command, self.cwd);
        if let Some(path) = &self.path {
            cmd.env("PATH", path);
        }
        cmd.envs(self.environment.iter().map(|(k, v)| (k, v)));
        let out = wait_with_timeout(cmd, command, self.timeout)?;
        for line in String::from_utf8_lossy(&out.stdout).lines() {
            log::debug!("{}: {line}", self.resource.reference);
        }
        Ok(out)
    }

    /// Whether a check command exits 0; a check that cannot finish counts as
    /// failed
    fn check(&self, command: &str) -> bool {
        match self.run(command) {
            Ok(out) => out.status.success(),
            Err(e) => {
                log::error!("{}: Check '{command}' failed: {e:#}", self.resource.reference);
                false
            }
        }
    }
}

impl ExecPosix {
    fn command(resource: &Resource) -> &str {
        resource.get_str("command").unwrap_or_else(|| resource.title())
    }

    /// Acceptable exit codes, `[0]` unless `returns` says otherwise
    fn returns(resource: &Resource) -> Result<Vec<i32>> {
        let codes = string_list(resource.get("returns"));
        if codes.is_empty() {
            return Ok(vec![0]);
        }
        codes
            .iter()
            .map(|code| match code.trim().parse() {
                Ok(code) => Ok(code),
                Err(_) => bail!("Invalid return code '{code}'"),
            })
            .collect()
    }

    /// `creates`, `onlyif` and `unless` all agree the command should run
    fn checks_pass(resource: &Resource, invocation: &Invocation<'_>) -> bool {
        if let Some(path) = resource.get_str("creates")
            && Path::new(path).exists()
        {
            log::debug!("{}: '{path}' exists, not running", resource.reference);
            return false;
        }
        for check in string_list(resource.get("onlyif")) {
            if !invocation.check(&check) {
                log::debug!("{}: onlyif '{check}' failed, not running", resource.reference);
                return false;
            }
        }
        for check in string_list(resource.get("unless")) {
            if invocation.check(&check) {
                log::debug!("{}: unless '{check}' succeeded, not running", resource.reference);
                return false;
            }
        }
        true
    }

    fn refreshonly(resource: &Resource) -> bool {
        resource.get("refreshonly").and_then(Value::as_bool) == Some(true)
    }

    fn execute(resource: &Resource, invocation: &Invocation<'_>) -> Result<()> {
        let command = Self::command(resource);
        let returns = Self::returns(resource)?;
        let out = invocation.run(command)?;

        let code = out.status.code();
        if !code.is_some_and(|c| returns.contains(&c)) {
            let code = code.map_or_else(|| "a signal".to_string(), |c| c.to_string());
            let expected: Vec<String> = returns.iter().map(ToString::to_string).collect();
            let stderr = String::from_utf8_lossy(&out.stderr);
            bail!(
                "'{command}' returned {code} instead of one of [{}]: {}",
                expected.join(", "),
                stderr.trim()
            );
        }
        log::info!("{}: executed successfully", resource.reference);
        Ok(())
    }
}

impl Provider for ExecPosix {
    /// `notrun` while the command still needs running, else the command
    /// itself so the property reads as in sync
    fn retrieve(&self, resource: &Resource) -> Result<State> {
        let invocation = Invocation::new(resource)?;
        let should_run = !Self::refreshonly(resource) && Self::checks_pass(resource, &invocation);
        let current = if should_run {
            Value::from("notrun")
        } else {
            Value::from(Self::command(resource))
        };
        Ok(State::from([("command".to_string(), current)]))
    }

    fn sync(&self, resource: &Resource, _property: &str, _desired: &Value) -> Result<()> {
        Self::execute(resource, &Invocation::new(resource)?)
    }

    fn refresh(&self, resource: &Resource) -> Result<()> {
        let invocation = Invocation::new(resource)?;
        if !Self::checks_pass(resource, &invocation) {
            return Ok(());
        }
        Self::execute(resource, &invocation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn should_run(resource: &Resource) -> bool {
        ExecPosix.retrieve(resource).unwrap()["command"] == Value::from("notrun")
    }

    #[test]
    fn test_runs_until_creates_exists() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("done");
        let resource = Resource::new("exec", "touch done")
            .with_param("cwd", dir.path().to_string_lossy().into_owned())
            .with_param("creates", marker.to_string_lossy().into_owned());

        assert!(should_run(&resource));
        ExecPosix.sync(&resource, "command", &Value::from("touch done")).unwrap();
        assert!(marker.exists());

        let state = ExecPosix.retrieve(&resource).unwrap();
        assert!(ExecPosix.insync("command", &state["command"], &Value::from("touch done")));
    }

    #[test]
    fn test_refreshonly_runs_only_on_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let command = format!("echo refreshed >> {}", out.display());
        let resource = Resource::new("exec", command.clone()).with_param("refreshonly", true);

        let state = ExecPosix.retrieve(&resource).unwrap();
        assert!(ExecPosix.insync("command", &state["command"], &Value::from(command)));
        assert!(!out.exists());

        ExecPosix.refresh(&resource).unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), "refreshed\n");
    }

    #[test]
    fn test_failing_command_reports_exit_code() {
        let resource = Resource::new("exec", "echo broken >&2; exit 4");
        let err = ExecPosix
            .sync(&resource, "command", &Value::Undef)
            .unwrap_err()
            .to_string();
        assert!(err.contains("returned 4 instead of one of [0]"), "{err}");
        assert!(err.contains("broken"));
    }

    #[test]
    fn test_onlyif_and_unless_gate_the_command() {
        let resource = Resource::new("exec", "true").with_param("onlyif", "test 1 -eq 1");
        assert!(should_run(&resource));
        let resource = Resource::new("exec", "true").with_param(
            "onlyif",
            Value::Array(vec![Value::from("true"), Value::from("false")]),
        );
        assert!(!should_run(&resource));

        let resource = Resource::new("exec", "true").with_param("unless", "false");
        assert!(should_run(&resource));
        let resource = Resource::new("exec", "true").with_param("unless", "true");
        assert!(!should_run(&resource));
    }

    #[test]
    fn test_unless_also_guards_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let resource = Resource::new("exec", format!("touch {}", out.display()))
            .with_param("refreshonly", true)
            .with_param("unless", "true");
        ExecPosix.refresh(&resource).unwrap();
        assert!(!out.exists());
    }

    #[test]
    fn test_returns_lists_acceptable_codes() {
        let resource = Resource::new("exec", "exit 2").with_param(
            "returns",
            Value::Array(vec![Value::Integer(0), Value::Integer(2)]),
        );
        assert!(ExecPosix.sync(&resource, "command", &Value::Undef).is_ok());

        let resource = Resource::new("exec", "exit 3").with_param("returns", "2");
        let err = ExecPosix
            .sync(&resource, "command", &Value::Undef)
            .unwrap_err()
            .to_string();
        assert!(err.contains("returned 3 instead of one of [2]"), "{err}");
    }

    #[test]
    fn test_timeout_fails_the_command() {
        let resource = Resource::new("exec", "sleep 5").with_param("timeout", "0.2");
        let err = ExecPosix
            .sync(&resource, "command", &Value::Undef)
            .unwrap_err()
            .to_string();
        assert!(err.contains("exceeded timeout"), "{err}");

        let resource = Resource::new("exec", "true").with_param("timeout", "soon");
        let err = ExecPosix.retrieve(&resource).unwrap_err().to_string();
        assert_eq!(err, "The timeout must be a number.");
    }

    #[test]
    fn test_environment_and_path() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let resource = Resource::new("exec", format!("echo \"$GREETING\" > {}", out.display()))
            .with_param("environment", Value::Array(vec![Value::from("GREETING=hello world")]))
            .with_param("path", Value::Array(vec![Value::from("/usr/bin"), Value::from("/bin")]));
        ExecPosix.sync(&resource, "command", &Value::Undef).unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), "hello world\n");

        let resource = Resource::new("exec", "true").with_param("environment", "NOEQUALS");
        assert!(ExecPosix.retrieve(&resource).is_err());
    }
}
