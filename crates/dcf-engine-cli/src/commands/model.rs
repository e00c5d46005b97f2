use clap::Args;
use serde_json::Value;

use dcf_engine_core::model::{FinancialModel, ModelDocument, Stream};

use crate::input;

pub(crate) fn load(path: &str) -> Result<FinancialModel, Box<dyn std::error::Error>> {
    let doc: ModelDocument = input::file::read_json(path)?;
    Ok(FinancialModel::from_document(doc)?)
}

fn save_model(path: &str, model: &FinancialModel) -> Result<(), Box<dyn std::error::Error>> {
    let doc = model.to_document();
    std::fs::write(path, serde_json::to_string_pretty(&doc)?)?;
    Ok(())
}

fn read_stream(path: Option<&str>) -> Result<Stream, Box<dyn std::error::Error>> {
    if let Some(path) = path {
        Ok(input::file::read_json(path)?)
    } else if let Some(data) = input::stdin::read_stdin()? {
        Ok(serde_json::from_value(data)?)
    } else {
        Err("--stream <file.json> or stdin required".into())
    }
}

/// Arguments shared by every command that operates on a saved model document.
#[derive(Args)]
pub struct ModelPathArgs {
    /// Path to the model document (JSON)
    #[arg(long)]
    pub model: String,
}

/// Arguments for adding or replacing a stream.
#[derive(Args)]
pub struct StreamMutationArgs {
    /// Path to the model document (JSON)
    #[arg(long)]
    pub model: String,

    /// Path to the stream definition (JSON); reads stdin if omitted
    #[arg(long)]
    pub stream: Option<String>,
}

/// Arguments for removing a stream by id.
#[derive(Args)]
pub struct RemoveStreamArgs {
    /// Path to the model document (JSON)
    #[arg(long)]
    pub model: String,

    /// Id of the stream to remove
    #[arg(long)]
    pub id: String,
}

/// Arguments for updating an existing stream by id.
#[derive(Args)]
pub struct UpdateStreamArgs {
    /// Path to the model document (JSON)
    #[arg(long)]
    pub model: String,

    /// Id of the stream to update
    #[arg(long)]
    pub id: String,

    /// Path to the replacement stream definition (JSON); reads stdin if omitted
    #[arg(long)]
    pub stream: Option<String>,
}

pub fn run_list_streams(args: ModelPathArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let model = load(&args.model)?;
    Ok(serde_json::to_value(model.streams())?)
}

pub fn run_add_stream(args: StreamMutationArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let mut model = load(&args.model)?;
    let stream = read_stream(args.stream.as_deref())?;
    model.add_stream(stream)?;
    save_model(&args.model, &model)?;
    Ok(serde_json::to_value(model.to_document())?)
}

pub fn run_update_stream(args: UpdateStreamArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let mut model = load(&args.model)?;
    let stream = read_stream(args.stream.as_deref())?;
    model.update_stream(&args.id, stream)?;
    save_model(&args.model, &model)?;
    Ok(serde_json::to_value(model.to_document())?)
}

pub fn run_remove_stream(args: RemoveStreamArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let mut model = load(&args.model)?;
    model.remove_stream(&args.id)?;
    save_model(&args.model, &model)?;
    Ok(serde_json::to_value(model.to_document())?)
}
