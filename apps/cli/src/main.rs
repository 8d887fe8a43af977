//! PageWatch CLI — track web pages and score how much they change.
//!
//! Creates tracked jobs, drives the fetch → parse → change-detection
//! pipeline for a run, and reports version history and change scores.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
