mod bootstrap;
mod cli_args;
mod cli_types;
mod commands;

use anyhow::Result;
use clap::Parser;

use crate::bootstrap::init_tracing;
use crate::cli_args::Cli;
use crate::commands::run_cli;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run_cli(cli).await
}
