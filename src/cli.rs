// ============================================================================
// COMMAND LINE INTERFACE
// ============================================================================

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::config::{EngineConfig, StorageBackend};
use crate::constants::{DEFAULT_CONFIG_PATH, ENGINE_FULL_NAME, ENGINE_VERSION, LOCALHOST_ID};
use crate::error::{EngineError, EngineResult};
use crate::filler::{FillerConfig, StatKind};

/// sdnstats CLI
#[derive(Parser, Debug)]
#[command(
    name = "sdnstats",
    version,
    about = "Time-series stats and event-log engine for SDN controllers",
    long_about = "sdnstats stores controller and switch statistics in day-sized \
                  buckets, serves downsampled and windowed queries over REST, \
                  and keeps a structured event log alongside them."
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, env = "SDNSTATS_CONFIG")]
    pub config: PathBuf,

    /// Log level override
    #[arg(short, long, env = "SDNSTATS_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Enable debug mode
    #[arg(short, long, env = "SDNSTATS_DEBUG")]
    pub debug: bool,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the REST server (default)
    Serve {
        /// Listen address, overriding server.listen_address
        #[arg(long)]
        listen: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Show full parsed configuration
        #[arg(short, long)]
        verbose: bool,
    },

    /// Generate default configuration file
    GenerateConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show version and build info
    Version,

    /// Fill a running server with synthetic stats and events
    Fill(FillArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct FillArgs {
    /// Server URL including the REST base path
    #[arg(long, default_value = "http://localhost:8000/rest/v1")]
    pub url: String,

    /// Cluster to fill
    #[arg(short = 'u', long, default_value = "default")]
    pub cluster: String,

    /// Controller target id (and event node id)
    #[arg(long, default_value = LOCALHOST_ID)]
    pub controller_id: String,

    /// Time period to fill, ending now (e.g. 100s, 15m, 2h, 3d)
    #[arg(short, long, default_value = "10m", value_parser = humantime::parse_duration)]
    pub period: Duration,

    /// Sampling interval in seconds
    #[arg(short = 't', long, default_value_t = 5)]
    pub interval: u64,

    /// Samples per PUT
    #[arg(short, long, default_value_t = 5)]
    pub batch: usize,

    /// Number of switches for OpenFlow stats; dpids start at 00:00:00:00:00:00:00:01
    #[arg(short, long, default_value_t = 0)]
    pub switches: usize,

    /// Comma separated stat kinds
    #[arg(short = 'm', long, value_enum, value_delimiter = ',', default_value = "cpu,mem,swap")]
    pub stats: Vec<StatKind>,

    /// Comma separated component names for log events
    #[arg(short = 'z', long, value_delimiter = ',', default_value = "sdnplatform,cassandra")]
    pub components: Vec<String>,

    /// Seed for reproducible data
    #[arg(short = 'r', long)]
    pub seed: Option<u64>,
}

impl From<FillArgs> for FillerConfig {
    fn from(args: FillArgs) -> Self {
        Self {
            url: args.url,
            cluster: args.cluster,
            controller_id: args.controller_id,
            period: args.period,
            interval_secs: args.interval,
            batch: args.batch,
            switches: args.switches,
            stats: args.stats,
            components: args.components,
            seed: args.seed,
        }
    }
}

// ----------------------------------------------------------------------------
// Handlers
// ----------------------------------------------------------------------------

/// Handle the validate subcommand
pub fn handle_validate(config_path: &Path, verbose: bool) -> EngineResult<()> {
    println!("Validating configuration file: {}", config_path.display());

    match EngineConfig::load(config_path) {
        Ok(config) => {
            println!("✅ Configuration is valid!");

            if verbose {
                println!("\n📋 Parsed configuration:");
                println!("{}", "=".repeat(60));
                match toml::to_string_pretty(&config) {
                    Ok(s) => println!("{}", s),
                    Err(e) => println!("Failed to serialize: {}", e),
                }
            }

            println!("\n📊 Configuration Summary:");
            println!("  • Listen address: {}", config.server.listen_address);
            println!("  • Base path: {}", config.server.base_path);
            match config.storage.backend {
                StorageBackend::Memory => println!("  • Storage: memory"),
                StorageBackend::Wal => println!(
                    "  • Storage: wal at {} ({:?})",
                    config
                        .storage
                        .data_dir
                        .as_deref()
                        .map(|d| d.display().to_string())
                        .unwrap_or_default(),
                    config.storage.wal_sync
                ),
            }
            println!("  • Keyspace: {}", config.storage.keyspace);
            println!("  • Controller id: {}", config.controller.id);
            println!(
                "  • Metadata: {} file source(s), {} inline entr{}{}",
                config.metadata.sources.len(),
                config.metadata.inline.len(),
                if config.metadata.inline.len() == 1 { "y" } else { "ies" },
                if config.metadata.include_builtin { ", built-in OS stats" } else { "" }
            );
            println!("  • Default sample count: {}", config.query.default_sample_count);

            Ok(())
        }
        Err(e) => {
            println!("❌ Configuration validation failed!");
            println!("Error: {}", e);
            Err(EngineError::Config(e))
        }
    }
}

/// Handle the generate-config subcommand
pub fn handle_generate_config(output: Option<&Path>) -> EngineResult<()> {
    let config_str = EngineConfig::generate_default_config();

    match output {
        Some(path) => {
            fs::write(path, &config_str)?;
            println!("✅ Default configuration written to: {}", path.display());
        }
        None => {
            println!("{}", config_str);
        }
    }

    Ok(())
}

/// Handle the version subcommand
pub fn handle_version() {
    println!("📈 {} v{}", ENGINE_FULL_NAME, ENGINE_VERSION);
    println!();
    println!("Build Information:");
    println!("  • Target: {}", std::env::consts::ARCH);
    println!("  • OS: {}", std::env::consts::OS);
    println!("  • Family: {}", std::env::consts::FAMILY);
    println!();
    println!("Features:");
    println!("  • Day-bucketed stats series with downsampling and windowed rates");
    println!("  • Stats-type and target indexes");
    println!("  • Structured event log");
    println!("  • In-memory and write-ahead-log storage backends");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_fill_arguments() {
        let cli = Cli::try_parse_from([
            "sdnstats", "fill", "--period", "2h", "--stats", "cpu,of,log", "--switches", "3", "--seed", "11",
        ])
        .unwrap();
        let Some(Commands::Fill(args)) = cli.command else {
            panic!("expected the fill command");
        };
        let config = FillerConfig::from(args);
        assert_eq!(config.period, Duration::from_secs(7200));
        assert_eq!(config.stats, vec![StatKind::Cpu, StatKind::Of, StatKind::Log]);
        assert_eq!(config.components, vec!["sdnplatform", "cassandra"]);
        assert_eq!(config.num_samples(), 1440);
        assert_eq!(config.seed, Some(11));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serve_is_optional() {
        let cli = Cli::try_parse_from(["sdnstats", "--debug"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.debug);

        let cli = Cli::try_parse_from(["sdnstats", "serve", "--listen", "127.0.0.1:9000"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Serve { listen: Some(l) }) if l == "127.0.0.1:9000"));
    }

    #[test]
    fn test_generate_and_validate_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sdnstats.toml");
        handle_generate_config(Some(&path)).unwrap();
        handle_validate(&path, true).unwrap();
        assert!(handle_validate(&dir.path().join("missing.toml"), false).is_err());
    }
}
