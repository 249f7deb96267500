//! kbforge CLI: draft knowledge-base articles from resolved incidents.
//!
//! Loads an incident from the local record store, asks a generative
//! chat-completions service to write it up, and files the result as a
//! draft article linked back to the incident.

mod commands;

use std::process::ExitCode;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
