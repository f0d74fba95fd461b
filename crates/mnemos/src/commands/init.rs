//! Init command - index a knowledge folder.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use console::{Style, style};

use super::Context;

/// Arguments for the init command.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Folder of documents to index
    #[arg(required = true)]
    pub folder: PathBuf,

    /// Embedding model id to record (defaults to the configured model)
    #[arg(long)]
    pub embedding_model: Option<String>,
}

/// Run the init command.
pub async fn run(args: InitArgs, ctx: &Context) -> Result<()> {
    let orchestrator = ctx.orchestrator()?;
    let model_id = args
        .embedding_model
        .unwrap_or_else(|| ctx.embedding_model_id());
    let dim = Style::new().dim();

    if ctx.verbose && !ctx.json_output {
        println!(
            "{}",
            dim.apply_to(format!(
                "Indexing {} with {}",
                args.folder.display(),
                model_id
            ))
        );
    }

    let report = orchestrator
        .init_knowledge_base(&args.folder, &model_id)
        .await?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", style("Knowledge base ready").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!("  Documents:  {}", report.document_count);
    println!("  Chunks:     {}", report.count);
    println!("  Re-embedded: {}", report.rebuilt_count);
    if report.removed_count > 0 {
        println!("  Removed:    {}", report.removed_count);
    }
    println!("  {}", dim.apply_to(format!("Stored at {}", report.cache_location)));

    Ok(())
}
