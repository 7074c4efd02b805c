mod cli;
mod commands;
mod config;
mod progress;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use declarative::PlanMode;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub dir: PathBuf,
    pub state: Option<PathBuf>,
    pub vars: Vec<(String, String)>,
    pub targets: Vec<String>,
    pub jobs: Option<usize>,
    pub timeout: Option<u64>,
    pub refresh: Option<bool>,
    pub auto_approve: bool,
}

fn main() -> ExitCode {
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

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            ui::error(&format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        dir: cli.dir,
        state: cli.state,
        vars: cli.vars,
        targets: cli.targets,
        jobs: cli.jobs,
        timeout: cli.timeout,
        refresh: cli.refresh,
        auto_approve: cli.auto_approve,
    };

    match cli.command {
        Command::Plan(args) => commands::plan::run(&ctx, &args),
        Command::Apply => commands::apply::run(&ctx, PlanMode::Apply),
        Command::Destroy => commands::apply::run(&ctx, PlanMode::Destroy),
        Command::Output(args) => commands::output::run(&ctx, &args).map(|()| ExitCode::SUCCESS),
        Command::Validate => commands::validate::run(&ctx).map(|()| ExitCode::SUCCESS),
        Command::State(cmd) => commands::state::run(&ctx, &cmd).map(|()| ExitCode::SUCCESS),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "stratum", &mut io::stdout());
            Ok(ExitCode::SUCCESS)
        }
    }
}
