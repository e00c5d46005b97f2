mod commands;
mod input;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;

use commands::drivers::{self, MonteCarloArgs};
use commands::model::{ModelPathArgs, RemoveStreamArgs, StreamMutationArgs, UpdateStreamArgs};
use commands::preview::{self, PreviewArgs};
use commands::sensitivity::{self, BreakevenArgs};

/// Discounted cash flow modeling engine
#[derive(Parser)]
#[command(
    name = "dcf",
    version,
    about = "Discounted cash flow modeling engine",
    long_about = "A CLI for building stream-graph DCF models and running deterministic, \
                  Monte Carlo, and sensitivity drivers against them."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// List every stream in a model document
    ListStreams(ModelPathArgs),
    /// Add a stream to a model document
    AddStream(StreamMutationArgs),
    /// Replace an existing stream in a model document
    UpdateStream(UpdateStreamArgs),
    /// Remove a stream from a model document
    RemoveStream(RemoveStreamArgs),
    /// Run the deterministic driver
    RunDeterministic(ModelPathArgs),
    /// Run the Monte Carlo driver
    RunMonteCarlo(MonteCarloArgs),
    /// Run a tornado sensitivity scan
    RunTornado(ModelPathArgs),
    /// List every parameter eligible for a breakeven search
    EnumerateBreakeven(ModelPathArgs),
    /// Solve for the value of a parameter that reaches a target NPV
    RunBreakeven(BreakevenArgs),
    /// Preview a distribution's expected band over a horizon
    PreviewDistribution(PreviewArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

fn main() {
    let cli = Cli::parse();

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::ListStreams(args) => commands::model::run_list_streams(args),
        Commands::AddStream(args) => commands::model::run_add_stream(args),
        Commands::UpdateStream(args) => commands::model::run_update_stream(args),
        Commands::RemoveStream(args) => commands::model::run_remove_stream(args),
        Commands::RunDeterministic(args) => drivers::run_deterministic(args),
        Commands::RunMonteCarlo(args) => drivers::run_monte_carlo(args),
        Commands::RunTornado(args) => sensitivity::run_tornado(args),
        Commands::EnumerateBreakeven(args) => sensitivity::run_enumerate_breakeven(args),
        Commands::RunBreakeven(args) => sensitivity::run_breakeven(args),
        Commands::PreviewDistribution(args) => preview::run_preview(args),
        Commands::Version => {
            println!("dcf {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    }
}
