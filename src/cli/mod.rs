//! CLI entry point for runline.

use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;

use crate::config::RunlineConfig;
use crate::consumer::{ConversationStore, RunClient, RunConsumer, RunOutcome};
use crate::error::RunlineError;
use crate::protocol::{ExecuteRequest, RunEvent};
use crate::server::{self, EchoDriver};
use crate::tools::{FnTool, SafeTool};

/// runline: stream agent runs over a line-oriented event protocol
#[derive(Parser, Debug)]
#[command(name = "runline", version, about)]
pub struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the demo echo run endpoint
    Serve(ServeArgs),
    /// Submit a prompt and print the run as it streams
    Run(RunArgs),
}

#[derive(Parser, Debug)]
pub struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1:3000")]
    pub addr: SocketAddr,

    /// Delay between echoed words, in milliseconds
    #[arg(long, default_value_t = 50)]
    pub delay_ms: u64,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    pub prompt: String,

    /// Execution endpoint (defaults to the configured base URL)
    #[arg(long)]
    pub url: Option<String>,

    #[arg(short, long)]
    pub model: Option<String>,
}

pub async fn handle_serve(config: &RunlineConfig, args: ServeArgs) -> Result<(), RunlineError> {
    let word_count = FnTool::new("word_count", "Count words in the prompt", |input| async move {
        let words = match input.into_value() {
            serde_json::Value::String(text) => text.split_whitespace().count(),
            other => other.to_string().split_whitespace().count(),
        };
        Ok(json!({ "words": words }))
    });
    let tool = SafeTool::new(word_count, config.safety_policy());
    let driver = EchoDriver::new()
        .with_tool(Arc::new(tool))
        .with_delay(std::time::Duration::from_millis(args.delay_ms));

    server::serve(args.addr, server::router(Arc::new(driver))).await
}

pub async fn handle_run(config: &RunlineConfig, args: RunArgs) -> Result<(), RunlineError> {
    let client = match args.url {
        Some(url) => RunClient::new(url)?,
        None => RunClient::from_config(config)?,
    };
    let mut request = ExecuteRequest::new(args.prompt);
    if let Some(model) = args.model {
        request = request.with_model(model);
    }

    let consumer = RunConsumer::new(ConversationStore::new()).with_observer(Arc::new(print_event));
    let summary = consumer.submit(&client, &request).await?;
    println!();

    match summary.outcome {
        RunOutcome::Finished => Ok(()),
        RunOutcome::Errored(error) | RunOutcome::Interrupted(error) => {
            Err(RunlineError::Stream(error))
        }
        RunOutcome::Cancelled => Err(RunlineError::Cancelled),
    }
}

fn print_event(event: &RunEvent) {
    match event {
        RunEvent::TextMessageContent { delta } => {
            print!("{delta}");
            let _ = std::io::stdout().flush();
        }
        RunEvent::ToolCallStart { name } => eprintln!("[tool] {name}"),
        RunEvent::ToolCallEnd { name, result } => eprintln!("[tool] {name} -> {result}"),
        RunEvent::RunError { error } => eprintln!("\nerror: {error}"),
        RunEvent::RunStarted {} | RunEvent::RunFinished {} => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_model() {
        let cli = Cli::parse_from(["runline", "run", "hello world", "--model", "gpt-4o"]);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.prompt, "hello world");
                assert_eq!(args.model.as_deref(), Some("gpt-4o"));
                assert!(args.url.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn serve_has_a_default_address() {
        let cli = Cli::parse_from(["runline", "serve"]);
        match cli.command {
            Commands::Serve(args) => assert_eq!(args.addr.port(), 3000),
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
