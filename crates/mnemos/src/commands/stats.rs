//! Stats command - statistics for every tier.

use anyhow::Result;
use clap::Args;
use console::{Style, style};

use super::Context;

/// Arguments for the stats command.
#[derive(Args, Debug)]
pub struct StatsArgs {}

/// Run the stats command.
pub async fn run(_args: StatsArgs, ctx: &Context) -> Result<()> {
    let stats = ctx.offline_orchestrator()?.stats()?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    let heading = |title: &str| {
        println!("{}", style(title).bold());
        println!("{}", dim.apply_to("─".repeat(50)));
    };

    heading("Vector cache");
    println!("  Documents:  {}", stats.vector.document_count);
    println!("  Chunks:     {}", stats.vector.entry_count);
    println!(
        "  Model:      {}",
        stats.vector.embedding_model_id.as_deref().unwrap_or("-")
    );
    println!("  {}", dim.apply_to(&stats.vector.location));
    println!();

    heading("Response cache");
    println!("  Cached:       {}", stats.responses.cached_count);
    println!(
        "  Hit rate:     {:.1}% ({}/{})",
        stats.responses.hit_rate * 100.0,
        stats.responses.hits,
        stats.responses.lookups
    );
    println!("  Tokens saved: {}", stats.responses.total_tokens_saved);
    println!(
        "  Chunks:       {} (reused {} times)",
        stats.responses.chunk_count, stats.responses.chunk_reuse_total
    );
    println!("  {}", dim.apply_to(&stats.responses.location));
    println!();

    heading("Memory store");
    println!("  Records:        {}", stats.memory.total_records);
    println!(
        "  Avg confidence: {:.2}",
        stats.memory.average_confidence
    );
    println!("  Accesses:       {}", stats.memory.total_accesses);
    println!("  Last 24h:       {}", stats.memory.records_created_last_24h);
    println!(
        "  Threads:        {}  Relations: {}",
        stats.memory.thread_count, stats.memory.relation_count
    );
    println!("  {}", dim.apply_to(&stats.memory.location));

    Ok(())
}
