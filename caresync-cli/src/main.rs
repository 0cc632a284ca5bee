//! CareSync queue CLI.
//!
//! Usage:
//!   caresync --db queue.db status
//!   caresync --db queue.db sync --endpoint https://api.example.com/v1

use anyhow::Result;
use caresync_cli::{Cli, run};
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let output = run(cli).await?;
    println!("{output}");
    Ok(())
}
