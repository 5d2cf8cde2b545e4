//! runline CLI binary entry point.

use clap::Parser;
use runline::cli::{handle_run, handle_serve, Cli, Commands};
use runline::config::RunlineConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("runline=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match RunlineConfig::load(cli.config.as_deref()) {
        Ok(config) => match cli.command {
            Commands::Serve(args) => handle_serve(&config, args).await,
            Commands::Run(args) => handle_run(&config, args).await,
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
