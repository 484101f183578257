use clap::Parser;
use std::path::PathBuf;

mod calibration;
mod collect;
mod commands;
mod config;
mod dataset;
mod deltas;
mod error;
mod evaluation;
mod jsonl;
mod leaderboard;
mod logging;
mod models;
mod normalize;
mod output;
mod prompts;
mod runner;
mod scoring;
mod submission;

use crate::commands::Command;
use crate::config::Config;
use crate::output::OutputFormat;

/// TrustBench - offline scoring of model responses for safety, ambiguity and
/// reasoning, aggregated into a leaderboard
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to the TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format: plain or json
    #[arg(short, long, global = true, default_value = "plain")]
    output: OutputFormat,

    /// Verbose output - debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write a timestamped log file into this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logging::init(args.verbose, args.log_dir.as_deref(), args.command.name())?;
    let config = Config::load(args.config.as_deref())?;

    commands::execute(args.command, config, args.output, args.verbose)
}
