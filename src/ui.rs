use colored::Colorize;
use transaction::{ProgressCallback, ResourceStatus, Status, TransactionReport};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Prints each resource outcome as the transaction reaches it
pub struct ConsoleProgress {
    quiet: bool,
    verbose: bool,
    total: usize,
    done: usize,
}

impl ConsoleProgress {
    pub fn new(quiet: bool, verbose: bool) -> Self {
        Self {
            quiet,
            verbose,
            total: 0,
            done: 0,
        }
    }
}

impl ProgressCallback for ConsoleProgress {
    fn on_transaction_start(&mut self, count: usize) {
        self.total = count;
        if !self.quiet {
            info(&format!("Applying {count} resources"));
        }
    }

    fn on_resource_start(&mut self, reference: &str) {
        log::trace!("Evaluating {reference}");
    }

    fn on_resource_complete(&mut self, status: &ResourceStatus) {
        self.done += 1;
        if status.status == Status::Failed {
            let message = status.error.as_deref().unwrap_or("failed");
            error(&format!("{}: {message}", status.resource));
            return;
        }
        if self.quiet {
            return;
        }
        let progress = format!("[{}/{}]", self.done, self.total).blue().bold();
        match status.status {
            Status::Changed => {
                for event in &status.events {
                    println!(
                        "{progress} {}/{}: {}",
                        status.resource,
                        event.property,
                        event.message.green()
                    );
                }
                if status.events.is_empty() && status.refreshed {
                    println!("{progress} {}: {}", status.resource, "refreshed".green());
                }
            }
            Status::Noop => {
                for event in &status.events {
                    println!(
                        "{progress} {}/{}: {}",
                        status.resource,
                        event.property,
                        event.message.cyan()
                    );
                }
            }
            Status::Skipped => println!(
                "{progress} {}: {}",
                status.resource,
                "skipped because of failed dependencies".yellow()
            ),
            Status::Unchanged if status.refreshed => {
                println!("{progress} {}: {}", status.resource, "refreshed".green());
            }
            Status::Unchanged if self.verbose => dim(&format!("{} unchanged", status.resource)),
            Status::Unchanged | Status::Failed => {}
        }
    }

    fn on_transaction_complete(&mut self, report: &TransactionReport) {
        if self.quiet {
            return;
        }
        summary(report);
    }
}

/// Counts per status and the run time
pub fn summary(report: &TransactionReport) {
    let m = &report.metrics;
    header(&format!("Applied catalog for {}", report.host));
    kv("status", &report.status.to_string());
    kv("changed", &m.changed.to_string());
    if m.failed > 0 {
        kv("failed", &m.failed.to_string().red().to_string());
    }
    if m.skipped > 0 {
        kv("skipped", &m.skipped.to_string().yellow().to_string());
    }
    if report.noop {
        kv("noop", &m.noop.to_string());
    }
    kv("unchanged", &m.unchanged.to_string());
    kv("time", &format!("{:.2}s", m.total_time));

    if m.failed > 0 {
        error("Some resources failed");
    } else if m.has_changes() {
        success("Catalog applied");
    } else {
        success("Nothing to do");
    }
}
