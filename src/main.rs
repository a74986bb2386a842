use anyhow::{Context, Result as AnyhowResult};
use clap::Parser;
use tracing::{info, warn};

use sdnstats::cli::{handle_generate_config, handle_validate, handle_version, Cli, Commands};
use sdnstats::constants::{ENGINE_FULL_NAME, ENGINE_VERSION};
use sdnstats::filler::StatsFiller;
use sdnstats::logging::init_logging;
use sdnstats::server::StatsServer;
use sdnstats::EngineConfig;

#[tokio::main]
async fn main() -> AnyhowResult<()> {
    let cli = Cli::parse();

    // Subcommands that don't need logging or a config
    match &cli.command {
        Some(Commands::Version) => {
            handle_version();
            return Ok(());
        }
        Some(Commands::GenerateConfig { output }) => {
            handle_generate_config(output.as_deref())?;
            return Ok(());
        }
        Some(Commands::Validate { verbose }) => {
            handle_validate(&cli.config, *verbose)?;
            return Ok(());
        }
        _ => {}
    }

    let config_found = cli.config.exists();
    let mut config = if config_found {
        EngineConfig::load(&cli.config)
            .with_context(|| format!("Failed to load config from {}", cli.config.display()))?
    } else {
        EngineConfig::default()
    };

    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if cli.debug {
        config.logging.level = "debug".into();
    }

    let _log_guard = init_logging(&config.logging).context("Failed to initialize logging")?;
    if !config_found {
        warn!("Config file not found at {}, using defaults", cli.config.display());
    }

    info!("📈 {} v{}", ENGINE_FULL_NAME, ENGINE_VERSION);
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    match cli.command {
        Some(Commands::Fill(args)) => {
            let mut filler = StatsFiller::new(args.into()).context("Invalid fill options")?;
            let summary = filler.fill().await?;
            if summary.failed_requests > 0 {
                anyhow::bail!("{} of the fill requests were rejected", summary.failed_requests);
            }
        }
        Some(Commands::Serve { listen }) => {
            if let Some(listen) = listen {
                config.server.listen_address = listen;
            }
            StatsServer::new(config).run().await?;
        }
        None => {
            StatsServer::new(config).run().await?;
        }
        Some(Commands::Version | Commands::GenerateConfig { .. } | Commands::Validate { .. }) => {}
    }

    Ok(())
}
