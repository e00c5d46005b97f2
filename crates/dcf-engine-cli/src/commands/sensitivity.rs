use clap::Args;
use serde_json::Value;

use dcf_engine_core::sensitivity;

use super::model::ModelPathArgs;

pub fn run_tornado(args: ModelPathArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let model = super::model::load(&args.model)?;
    let output = sensitivity::run_tornado(&model)?;
    Ok(serde_json::to_value(output)?)
}

pub fn run_enumerate_breakeven(args: ModelPathArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let model = super::model::load(&args.model)?;
    let params = sensitivity::enumerate_uncertain_parameters(&model)?;
    Ok(serde_json::to_value(params)?)
}

/// Arguments for a breakeven search on a single parameter.
#[derive(Args)]
pub struct BreakevenArgs {
    /// Path to the model document (JSON)
    #[arg(long)]
    pub model: String,

    /// Parameter name to solve for, e.g. "Discount Rate" or "rev.amount"
    #[arg(long)]
    pub parameter: String,

    /// NPV value the solver targets
    #[arg(long)]
    pub target_npv: f64,
}

pub fn run_breakeven(args: BreakevenArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let model = super::model::load(&args.model)?;
    let output = sensitivity::run_breakeven(&model, &args.parameter, args.target_npv)?;
    Ok(serde_json::to_value(output)?)
}
