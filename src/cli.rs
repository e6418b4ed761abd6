use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "puppet")]
#[command(version)]
#[command(about = "Compile Puppet manifests into catalogs and apply them", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Settings file (default: ~/.config/puppet/puppet.toml)
    #[arg(long, global = true, env = "PUPPET_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Compile a manifest for this host and apply it
    Apply(ApplyArgs),

    /// Compile a manifest and print the catalog as JSON
    Compile(CompileArgs),

    /// Work with manifests without compiling them
    #[command(subcommand)]
    Parser(ParserCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Manifest file or directory (default: the configured manifest)
    pub manifest: Option<PathBuf>,

    /// Show what would change without changing anything
    #[arg(long)]
    pub noop: bool,

    /// Extra facts from a JSON or TOML file
    #[arg(long)]
    pub facts: Option<PathBuf>,

    /// Exit 2 on changes, 4 on failures, 6 on both
    #[arg(long)]
    pub detailed_exitcodes: bool,

    /// Write a JSON report below this directory
    #[arg(long)]
    pub report_dir: Option<PathBuf>,
}

#[derive(Args)]
pub struct CompileArgs {
    /// Manifest file or directory (default: the configured manifest)
    pub manifest: Option<PathBuf>,

    /// Node to compile for; repeat to compile several nodes together
    #[arg(long = "node", short = 'n')]
    pub nodes: Vec<String>,

    /// Extra facts from a JSON or TOML file
    #[arg(long)]
    pub facts: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum ParserCommand {
    /// Check manifests for syntax errors
    Validate {
        /// Files or directories to check
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}
