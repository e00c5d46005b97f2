use clap::Args;
use serde_json::Value;

use dcf_engine_core::deterministic;
use dcf_engine_core::monte_carlo::{self, MonteCarloConfig};

use super::model::ModelPathArgs;

pub fn run_deterministic(args: ModelPathArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let model = super::model::load(&args.model)?;
    let output = deterministic::run_deterministic(&model)?;
    Ok(serde_json::to_value(output)?)
}

/// Arguments for a Monte Carlo run.
#[derive(Args)]
pub struct MonteCarloArgs {
    /// Path to the model document (JSON)
    #[arg(long)]
    pub model: String,

    /// Number of independent simulations to run
    #[arg(long, default_value = "10000")]
    pub simulations: usize,

    /// RNG seed; omit for a non-reproducible run
    #[arg(long)]
    pub seed: Option<u64>,
}

pub fn run_monte_carlo(args: MonteCarloArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let model = super::model::load(&args.model)?;
    let config = MonteCarloConfig { n_simulations: args.simulations, seed: args.seed };
    let output = monte_carlo::run_monte_carlo(&model, &config)?;
    Ok(serde_json::to_value(output)?)
}
