//! Lockgov Node - command-line front end of the staking and governance
//! protocol.
//!
//! Each invocation resumes the protocol from the state store, applies one
//! command through the single-writer service and persists the result.

pub mod commands;
pub mod config;
pub mod node;
pub mod service;
pub mod telemetry;

use clap::Parser;
use tracing::{debug, error};

use crate::commands::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (config, config_path) = cli.load_config()?;
    telemetry::init_from_config(&config.logging)?;
    debug!(
        name = %config.name,
        data_dir = %config.data_dir.display(),
        config = %config_path.display(),
        "Loaded configuration"
    );

    let now = cli.now()?;
    match commands::run(cli.command, &config, &config_path, now).await {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            Err(e)
        }
    }
}
