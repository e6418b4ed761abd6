mod cli;
mod commands;
mod facts;
mod providers;
mod settings;
mod types;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command, ParserCommand};
use commands::Context;
use settings::Settings;
use std::io;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    if let Command::Completions { shell } = cli.command {
        generate(shell, &mut Cli::command(), "puppet", &mut io::stdout());
        return Ok(());
    }

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        settings: Settings::load(cli.config.as_deref())?,
    };

    match &cli.command {
        Command::Apply(args) => {
            let code = commands::apply::run(&ctx, args)?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        Command::Compile(args) => commands::compile::run(&ctx, args),
        Command::Parser(ParserCommand::Validate { paths }) => {
            commands::parser::validate(&ctx, paths)
        }
        Command::Completions { .. } => Ok(()),
    }
}
