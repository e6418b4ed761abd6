//! Providers for the built-in types

mod exec;
mod file;
mod notify;
mod package;
mod service;

pub use exec::ExecPosix;
pub use file::{FilePosix, FileWindows};
pub use notify::NotifyDefault;
pub use package::PackageYum;
pub use service::{ServiceBase, ServiceSystemd};

use anyhow::{Context, Result, bail};
use provider::{Confine, ProviderEntry, ProviderRegistry};
use std::io::Read;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Every built-in provider, registered in selection-priority order
pub fn builtin_providers() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();

    registry.register(ProviderEntry::new("notify", "default", Arc::new(NotifyDefault)));

    registry.register(
        ProviderEntry::new("file", "windows", Arc::new(FileWindows))
            .confine(Confine::variable("osfamily", &["windows"])),
    );
    registry.register(
        ProviderEntry::new("file", "posix", Arc::new(FilePosix))
            .confine(Confine::feature(&["posix"])),
    );

    registry.register(
        ProviderEntry::new("exec", "posix", Arc::new(ExecPosix)).confine(Confine::exists(&["sh"])),
    );

    registry.register(
        ProviderEntry::new("package", "yum", Arc::new(PackageYum))
            .confine(Confine::exists(&["yum", "rpm"]))
            .defaultfor(&[("osfamily", &["redhat"])]),
    );

    registry.register(
        ProviderEntry::new("service", "base", Arc::new(ServiceBase)).confine(Confine::exists(&["ps"])),
    );
    registry.register(
        ProviderEntry::new("service", "systemd", Arc::new(ServiceSystemd))
            .confine(Confine::exists(&["systemctl", "/run/systemd/system"]))
            .defaultfor(&[("osfamily", &["redhat", "debian", "suse", "archlinux"])]),
    );

    registry
}

/// Run a program and capture its output, failing only if it cannot start
fn output(program: &str, args: &[&str]) -> Result<Output> {
    Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("Failed to execute {program}"))
}

/// Run a program, failing with its stderr when it exits non-zero
fn run(program: &str, args: &[&str]) -> Result<()> {
    let out = output(program, args)?;
    if !out.status.success() {
        bail!(
            "{program} {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&out.stderr).trim()
        );
    }
    Ok(())
}

/// `sh -c command`, optionally in `cwd`
fn shell_command(command: &str, cwd: Option<&Path>) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }
    cmd
}

/// Run a command line through `sh -c`
fn shell(command: &str, cwd: Option<&Path>) -> Result<Output> {
    wait_with_timeout(shell_command(command, cwd), command, None)
}

/// Run `cmd` to completion, killing it once `timeout` has passed
///
/// Output pipes are drained on helper threads so a chatty child cannot
/// block on a full pipe while we poll for its exit.
fn wait_with_timeout(mut cmd: Command, label: &str, timeout: Option<Duration>) -> Result<Output> {
    let Some(timeout) = timeout else {
        return cmd
            .output()
            .with_context(|| format!("Failed to execute '{label}'"));
    };

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to execute '{label}'"))?;
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            bail!("'{label}' exceeded timeout of {} seconds", timeout.as_secs_f64());
        }
        thread::sleep(Duration::from_millis(10));
    };

    Ok(Output {
        status,
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}

fn drain(mut pipe: impl Read + Send + 'static) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        // a read error just truncates the captured output
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}
