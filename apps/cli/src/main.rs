//! woof-rs CLI, send any number of files/directories over a local network.
//!
//! A single file is served as-is; several paths (or a directory) are bundled
//! into a tar.gz first. The server exits after the configured number of
//! downloads.

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
