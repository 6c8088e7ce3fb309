//! ecotax CLI: Brazilian job-title occupation taxonomy pipeline.
//!
//! Every stage can be run on its own, or all of them in order with `run`.

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
