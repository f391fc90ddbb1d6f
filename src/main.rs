use anyhow::Context;
use clap::Parser;
use sessionguard::cli::{self, Cli, Commands};
use sessionguard::config::AppConfig;

mod main_runtime;

use main_runtime::{init_logging, init_logging_simple};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::load_validated(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config))?;

    match cli.command {
        Commands::Health => {
            init_logging_simple();
            if !cli::check_health(&config).await? {
                std::process::exit(1);
            }
        }
        Commands::Replay {
            bars,
            instrument,
            live_after,
            sync_replay,
        } => {
            init_logging(&config.logging, cli.json_logs);
            config.remote.sync_replay |= sync_replay;

            let status = cli::run_replay(config, &bars, &instrument, live_after).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}
