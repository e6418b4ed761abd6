//! service - daemons managed by systemd or by process table inspection

use super::{output, run, shell};
use anyhow::{Result, bail};
use catalog::{Resource, Value};
use provider::{Provider, State};
use std::thread;
use std::time::Duration;

fn name_of(resource: &Resource) -> &str {
    resource.get_str("name").unwrap_or_else(|| resource.title())
}

fn wants_running(desired: &Value) -> Result<bool> {
    match (desired.as_str(), desired.as_bool()) {
        (Some("running"), _) => Ok(true),
        (Some("stopped"), _) => Ok(false),
        (_, Some(running)) => Ok(running),
        _ => bail!("Invalid value '{desired}' for ensure, expected running or stopped"),
    }
}

/// Units controlled with `systemctl`
pub struct ServiceSystemd;

impl ServiceSystemd {
    fn systemctl(action: &str, name: &str) -> Result<()> {
        run("systemctl", &[action, "--", name])
    }

    fn query(action: &str, name: &str) -> Result<bool> {
        Ok(output("systemctl", &[action, "--quiet", "--", name])?.status.success())
    }
}

impl Provider for ServiceSystemd {
    fn retrieve(&self, resource: &Resource) -> Result<State> {
        let name = name_of(resource);
        let mut state = State::new();
        let running = Self::query("is-active", name)?;
        state.insert(
            "ensure".to_string(),
            Value::from(if running { "running" } else { "stopped" }),
        );
        if resource.get("enable").is_some() {
            state.insert("enable".to_string(), Value::from(Self::query("is-enabled", name)?));
        }
        Ok(state)
    }

    fn sync(&self, resource: &Resource, property: &str, desired: &Value) -> Result<()> {
        let name = name_of(resource);
        match property {
            "ensure" => {
                let action = if wants_running(desired)? { "start" } else { "stop" };
                Self::systemctl(action, name)
            }
            "enable" => {
                let action = if desired.as_bool().unwrap_or(false) {
                    "enable"
                } else {
                    "disable"
                };
                Self::systemctl(action, name)
            }
            other => bail!("Unsupported service property '{other}'"),
        }
    }

    fn refresh(&self, resource: &Resource) -> Result<()> {
        let name = name_of(resource);
        if Self::query("is-active", name)? {
            log::info!("{}: restarting", resource.reference);
            Self::systemctl("restart", name)
        } else {
            log::debug!("{}: not running, skipping restart", resource.reference);
            Ok(())
        }
    }
}

/// Any daemon found in `ps` output, started and stopped with the resource's
/// `start` and `stop` commands
pub struct ServiceBase;

impl ServiceBase {
    fn running(name: &str) -> Result<bool> {
        let out = output("ps", &["-A", "-o", "comm="])?;
        Ok(in_process_table(&String::from_utf8_lossy(&out.stdout), name))
    }

    fn command(resource: &Resource, key: &str) -> Result<()> {
        let Some(command) = resource.get_str(key) else {
            bail!("{}: the base provider needs a '{key}' command", resource.reference);
        };
        let out = shell(command, None)?;
        if !out.status.success() {
            bail!(
                "'{command}' failed: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }
        Ok(())
    }

    fn stop(resource: &Resource) -> Result<()> {
        if resource.get("stop").is_some() {
            return Self::command(resource, "stop");
        }
        run("pkill", &["-x", name_of(resource)])
    }
}

impl Provider for ServiceBase {
    fn retrieve(&self, resource: &Resource) -> Result<State> {
        let running = Self::running(name_of(resource))?;
        Ok(State::from([(
            "ensure".to_string(),
            Value::from(if running { "running" } else { "stopped" }),
        )]))
    }

    fn sync(&self, resource: &Resource, property: &str, desired: &Value) -> Result<()> {
        match property {
            "ensure" if wants_running(desired)? => Self::command(resource, "start"),
            "ensure" => Self::stop(resource),
            "enable" => bail!("{}: the base provider cannot enable services", resource.reference),
            other => bail!("Unsupported service property '{other}'"),
        }
    }

    fn refresh(&self, resource: &Resource) -> Result<()> {
        if !Self::running(name_of(resource))? {
            return Ok(());
        }
        if resource.get("restart").is_some() {
            return Self::command(resource, "restart");
        }
        Self::stop(resource)?;
        thread::sleep(Duration::from_millis(500));
        Self::command(resource, "start")
    }
}

/// Whether `ps -o comm=` output lists a process with this exact name
fn in_process_table(ps: &str, name: &str) -> bool {
    ps.lines().map(str::trim).any(|comm| {
        comm == name
            || comm
                .rsplit('/')
                .next()
                .is_some_and(|base| base == name)
    })
}
