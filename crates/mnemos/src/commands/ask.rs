//! Ask command - answer a question through the cache tiers.

use std::io::Write;

use anyhow::{Result, bail};
use clap::Args;
use console::Style;
use futures::StreamExt;
use mnemos_rag::{Answer, AnswerEvent, AnswerOptions, CancellationToken};

use super::Context;

/// Arguments for the ask command.
#[derive(Args, Debug)]
pub struct AskArgs {
    /// The question to answer
    #[arg(required = true)]
    pub question: String,

    /// Generation model (defaults to the configured model)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Bypass the exact-match response cache
    #[arg(long)]
    pub no_cache: bool,

    /// Do not record this exchange in the memory store
    #[arg(long)]
    pub no_memory: bool,

    /// Do not recall past exchanges as context
    #[arg(long)]
    pub no_recall: bool,

    /// Context budget in estimated tokens
    #[arg(long)]
    pub budget: Option<usize>,

    /// Append the stored exchange to this thread
    #[arg(long)]
    pub thread: Option<String>,

    /// Extra tag for the stored exchange (repeatable)
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Print tokens as they are generated
    #[arg(long)]
    pub stream: bool,
}

impl AskArgs {
    fn options(&self) -> AnswerOptions {
        let mut options = AnswerOptions::default()
            .with_cache(!self.no_cache)
            .with_memory(!self.no_memory)
            .with_recall(!self.no_recall);
        if let Some(budget) = self.budget {
            options = options.with_token_budget(budget);
        }
        if let Some(ref thread) = self.thread {
            options = options.with_thread(thread.clone());
        }
        for tag in &self.tags {
            options = options.with_tag(tag.clone());
        }
        options
    }
}

/// Run the ask command.
pub async fn run(args: AskArgs, ctx: &Context) -> Result<()> {
    let orchestrator = ctx.orchestrator()?;
    let model_id = args.model.clone().unwrap_or_else(|| ctx.model_id());
    let options = args.options();

    let answer = if args.stream && !ctx.json_output {
        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_interrupt.cancel();
            }
        });

        let mut stream = orchestrator.answer_stream(&args.question, &model_id, options, cancel);
        let mut done = None;
        while let Some(event) = stream.next().await {
            match event? {
                AnswerEvent::Token(token) => {
                    print!("{}", token);
                    std::io::stdout().flush()?;
                }
                AnswerEvent::Done(answer) => done = Some(answer),
            }
        }
        println!();
        match done {
            Some(answer) => answer,
            None => bail!("answer stream ended without a result"),
        }
    } else {
        let answer = orchestrator
            .answer(&args.question, &model_id, &options)
            .await?;
        if !ctx.json_output {
            println!("{}", answer.response);
        }
        answer
    };

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&answer)?);
    } else {
        print_summary(&answer, ctx.verbose);
    }

    Ok(())
}

fn print_summary(answer: &Answer, verbose: bool) {
    let dim = Style::new().dim();
    let stats = &answer.stats;
    let sources: Vec<&str> = stats
        .optimization_source
        .iter()
        .map(|s| s.as_str())
        .collect();

    println!();
    println!(
        "{}",
        dim.apply_to(format!(
            "cache hit: {}  memory reused: {}  contexts: {}  tokens saved: {}",
            stats.cache_hit, stats.memory_reused, stats.contexts_retrieved, stats.tokens_saved
        ))
    );
    if !sources.is_empty() {
        println!("{}", dim.apply_to(format!("sources: {}", sources.join(", "))));
    }
    if let Some(id) = answer.memory_id {
        println!("{}", dim.apply_to(format!("stored as memory #{}", id)));
    }
    if verbose && !answer.retrieved_memories.is_empty() {
        let ids: Vec<String> = answer
            .retrieved_memories
            .iter()
            .map(|id| id.to_string())
            .collect();
        println!("{}", dim.apply_to(format!("recalled: {}", ids.join(", "))));
    }
}
