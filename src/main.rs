//! SectorDesk - sector-routed customer support desk with bot handoff and
//! real-time agent dispatch.

use clap::Parser;
use std::process::ExitCode;

mod bot;
mod channel;
mod cli;
mod config;
mod core;
mod error;
mod heartbeat;
mod logging;
mod model;
mod store;
mod web;

use cli::Commands;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    if let Err(e) = logging::init() {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    // Parse command line arguments
    let args = Commands::parse();

    // Run the command
    match args.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
