//! Clear command - reset the caches.

use anyhow::Result;
use clap::Args;
use console::style;

use super::Context;

/// Arguments for the clear command.
#[derive(Args, Debug)]
pub struct ClearArgs {
    /// Also clear the memory store
    #[arg(long)]
    pub memory: bool,
}

/// Run the clear command.
pub async fn run(args: ClearArgs, ctx: &Context) -> Result<()> {
    let orchestrator = ctx.offline_orchestrator()?;
    orchestrator.clear_caches().await?;
    if args.memory {
        orchestrator.clear_memory()?;
    }

    if ctx.json_output {
        println!(
            "{}",
            serde_json::json!({ "caches_cleared": true, "memory_cleared": args.memory })
        );
    } else if args.memory {
        println!("{}", style("Caches and memory store cleared").green());
    } else {
        println!("{}", style("Vector and response caches cleared").green());
    }

    Ok(())
}
