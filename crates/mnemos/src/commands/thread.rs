//! Thread command - conversation thread operations.

use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use console::{Style, style};
use mnemos_cache::{ConversationThread, RecordId};

use super::{Context, truncate};

/// Arguments for the thread command.
#[derive(Args, Debug)]
pub struct ThreadArgs {
    #[command(subcommand)]
    pub command: ThreadCommand,
}

#[derive(Subcommand, Debug)]
pub enum ThreadCommand {
    /// Create a new thread
    Create {
        /// Thread id
        id: String,

        /// Human-readable title
        #[arg(short, long, default_value = "")]
        title: String,
    },

    /// Append a memory record to a thread
    Add {
        /// Thread id
        id: String,

        /// Record id
        record: i64,
    },

    /// Show a thread and its records
    Show {
        /// Thread id
        id: String,
    },

    /// List all threads
    List,

    /// Set a thread's summary
    Summarize {
        /// Thread id
        id: String,

        /// Summary text
        summary: String,
    },
}

/// Run the thread command.
pub async fn run(args: ThreadArgs, ctx: &Context) -> Result<()> {
    let store = ctx.memory_store()?;

    match args.command {
        ThreadCommand::Create { id, title } => {
            let thread = store.create_thread(&id, &title)?;
            print_thread_line(&thread, ctx)?;
        }
        ThreadCommand::Add { id, record } => {
            store.add_to_thread(&id, RecordId(record))?;
            if ctx.json_output {
                println!("{}", serde_json::json!({ "thread_id": id, "record_id": record }));
            } else {
                println!("Added memory #{} to thread {}", record, style(&id).cyan());
            }
        }
        ThreadCommand::Show { id } => {
            let Some(thread) = store.thread(&id)? else {
                bail!("thread '{}' not found", id);
            };
            if ctx.json_output {
                println!("{}", serde_json::to_string_pretty(&thread)?);
                return Ok(());
            }

            let dim = Style::new().dim();
            println!("{} {}", style(&thread.thread_id).bold(), thread.title);
            println!("{}", dim.apply_to("─".repeat(50)));
            if let Some(ref summary) = thread.summary {
                println!("{}", summary);
                println!();
            }
            if thread.record_ids.is_empty() {
                println!("{}", dim.apply_to("No records"));
            }
            for (i, record_id) in thread.record_ids.iter().enumerate() {
                match store.get(*record_id)? {
                    Some(record) => println!(
                        "{}. {} {}",
                        style(i + 1).cyan(),
                        dim.apply_to(format!("#{}", record_id)),
                        truncate(&record.query, 60)
                    ),
                    None => println!("{}. {}", i + 1, dim.apply_to(format!("#{} (deleted)", record_id))),
                }
            }
        }
        ThreadCommand::List => {
            let threads = store.threads()?;
            if ctx.json_output {
                println!("{}", serde_json::to_string_pretty(&threads)?);
            } else if threads.is_empty() {
                println!("{}", Style::new().dim().apply_to("No threads"));
            } else {
                for thread in &threads {
                    print_thread_line(thread, ctx)?;
                }
            }
        }
        ThreadCommand::Summarize { id, summary } => {
            store.set_thread_summary(&id, &summary)?;
            if ctx.json_output {
                println!("{}", serde_json::json!({ "thread_id": id, "summary": summary }));
            } else {
                println!("Summary updated for thread {}", style(&id).cyan());
            }
        }
    }

    Ok(())
}

fn print_thread_line(thread: &ConversationThread, ctx: &Context) -> Result<()> {
    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(thread)?);
    } else {
        println!(
            "{}  {}  {}",
            style(&thread.thread_id).cyan(),
            thread.title,
            Style::new()
                .dim()
                .apply_to(format!("({} records)", thread.record_ids.len()))
        );
    }
    Ok(())
}
