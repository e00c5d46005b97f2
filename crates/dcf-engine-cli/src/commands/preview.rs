use clap::Args;
use serde_json::Value;

use dcf_engine_core::distribution::Distribution;

use crate::input;

/// Arguments for previewing a distribution without a model.
#[derive(Args)]
pub struct PreviewArgs {
    /// Path to the distribution definition (JSON); reads stdin if omitted
    #[arg(long)]
    pub distribution: Option<String>,

    /// Number of months to preview
    #[arg(long)]
    pub horizon: u32,

    /// First active month
    #[arg(long, default_value = "0")]
    pub start_month: u32,

    /// Last active month (open-ended if omitted)
    #[arg(long)]
    pub end_month: Option<u32>,
}

pub fn run_preview(args: PreviewArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let dist: Distribution = if let Some(ref path) = args.distribution {
        input::file::read_json(path)?
    } else if let Some(data) = input::stdin::read_stdin()? {
        serde_json::from_value(data)?
    } else {
        return Err("--distribution <file.json> or stdin required".into());
    };
    dist.validate()?;
    let points = dist.preview(args.start_month, args.end_month, args.horizon);
    Ok(serde_json::to_value(points)?)
}
