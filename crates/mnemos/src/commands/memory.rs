//! Memory command - memory store operations.

use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use console::{Style, style};
use mnemos_cache::RecordId;

use super::{Context, truncate};

/// Arguments for the memory command.
#[derive(Args, Debug)]
pub struct MemoryArgs {
    #[command(subcommand)]
    pub command: MemoryCommand,
}

#[derive(Subcommand, Debug)]
pub enum MemoryCommand {
    /// Find past exchanges similar to a query
    Search {
        /// Search query
        query: String,

        /// Maximum results to return
        #[arg(short, long, default_value = "5")]
        limit: usize,

        /// Ignore records below this confidence
        #[arg(long, default_value = "0.0")]
        min_confidence: f32,
    },

    /// Show one record with its relations
    Show {
        /// Record id
        id: i64,
    },

    /// List tags with their record counts
    Tags,

    /// Delete old, low-confidence records
    Cleanup {
        /// Only records older than this many days are considered
        #[arg(short, long, default_value = "30")]
        days: u32,
    },
}

/// Run the memory command.
pub async fn run(args: MemoryArgs, ctx: &Context) -> Result<()> {
    match args.command {
        MemoryCommand::Search {
            query,
            limit,
            min_confidence,
        } => cmd_search(&query, limit, min_confidence, ctx),
        MemoryCommand::Show { id } => cmd_show(RecordId(id), ctx),
        MemoryCommand::Tags => cmd_tags(ctx),
        MemoryCommand::Cleanup { days } => cmd_cleanup(days, ctx),
    }
}

fn cmd_search(query: &str, limit: usize, min_confidence: f32, ctx: &Context) -> Result<()> {
    let store = ctx.memory_store()?;
    let results = store.retrieve_similar(query, limit, min_confidence)?;
    let dim = Style::new().dim();

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }
    if results.is_empty() {
        println!("{}", dim.apply_to("No matching memories"));
        return Ok(());
    }

    println!("{}", style("Memory Search Results").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!();
    for (i, scored) in results.iter().enumerate() {
        let record = &scored.record;
        println!(
            "{}. {} {}",
            style(i + 1).cyan(),
            dim.apply_to(format!("#{}", record.id)),
            truncate(&record.query, 60)
        );
        println!("   {}", truncate(&record.response, 70));
        println!(
            "   {}",
            dim.apply_to(format!(
                "(score: {:.3}, similarity: {:.3}, confidence: {:.2})",
                scored.score, scored.similarity, record.confidence_score
            ))
        );
        println!();
    }
    Ok(())
}

fn cmd_show(id: RecordId, ctx: &Context) -> Result<()> {
    let store = ctx.memory_store()?;
    let Some(record) = store.get(id)? else {
        bail!("memory #{} not found", id);
    };
    let relations = store.relations(id)?;

    if ctx.json_output {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "record": record,
                "relations": relations,
            }))?
        );
        return Ok(());
    }

    let dim = Style::new().dim();
    println!("{} {}", style(format!("Memory #{}", record.id)).bold(), dim.apply_to(&record.model_id));
    println!("{}", dim.apply_to("─".repeat(50)));
    println!("{} {}", style("Q:").cyan(), record.query);
    println!("{} {}", style("A:").cyan(), record.response);
    println!();
    let tags: Vec<&str> = record.tags.iter().map(String::as_str).collect();
    println!(
        "{}",
        dim.apply_to(format!(
            "confidence {:.2}, accessed {} times, tags [{}]",
            record.confidence_score,
            record.access_count,
            tags.join(", ")
        ))
    );
    for relation in relations {
        let other = if relation.source_id == id {
            relation.related_id
        } else {
            relation.source_id
        };
        println!(
            "{}",
            dim.apply_to(format!(
                "  {} #{} ({:.2})",
                relation.relation_type, other, relation.similarity_score
            ))
        );
    }
    Ok(())
}

fn cmd_tags(ctx: &Context) -> Result<()> {
    let counts = ctx.memory_store()?.tag_counts()?;

    if ctx.json_output {
        let map: serde_json::Map<String, serde_json::Value> = counts
            .into_iter()
            .map(|(tag, count)| (tag, count.into()))
            .collect();
        println!("{}", serde_json::to_string_pretty(&map)?);
        return Ok(());
    }
    if counts.is_empty() {
        println!("{}", Style::new().dim().apply_to("No tags yet"));
        return Ok(());
    }
    for (tag, count) in counts {
        println!("  {:<20} {}", tag, count);
    }
    Ok(())
}

fn cmd_cleanup(days: u32, ctx: &Context) -> Result<()> {
    let removed = ctx.offline_orchestrator()?.cleanup_memory(days)?;

    if ctx.json_output {
        println!("{}", serde_json::json!({ "removed": removed, "days": days }));
    } else {
        println!(
            "Removed {} record(s) older than {} days below the retention threshold",
            removed, days
        );
    }
    Ok(())
}
