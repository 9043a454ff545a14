//! Tessella CLI — static IIIF site builder.
//!
//! Turns configured content stores into a static, cacheable tree of
//! documents plus cross-cutting indices.

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
