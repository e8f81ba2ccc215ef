use clap::{Parser, Subcommand};
use pairsync::config::{AppConfig, LoggingConfig};
use pairsync::coordinator::Engine;
use pairsync::error::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pairsync", version, about = "Position state reconciliation and order execution engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the engine against the configured venues
    Run {
        /// Directory holding default.toml and environment overrides
        #[arg(long, env = "PAIRSYNC_CONFIG_DIR", default_value = "config")]
        config_dir: PathBuf,
    },
    /// Validate the configuration and exit
    Check {
        #[arg(long, env = "PAIRSYNC_CONFIG_DIR", default_value = "config")]
        config_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config_dir } => {
            let config = AppConfig::load_from(&config_dir)?;
            init_logging(&config.logging);
            run(config).await?;
        }
        Commands::Check { config_dir } => {
            let config = AppConfig::load_from(&config_dir)?;
            match config.validate() {
                Ok(()) => println!(
                    "Configuration OK: {} exchanges, {} pairs",
                    config.exchanges.len(),
                    config.pairs.len()
                ),
                Err(errors) => {
                    for e in &errors {
                        eprintln!("  - {}", e);
                    }
                    return Err(pairsync::PairSyncError::InvalidConfig(format!(
                        "{} problems in {}",
                        errors.len(),
                        config_dir.display()
                    )));
                }
            }
        }
    }

    Ok(())
}

async fn run(config: AppConfig) -> Result<()> {
    let engine = Arc::new(Engine::new(config)?);

    let runner = engine.clone();
    let handle = tokio::spawn(async move { runner.run().await });

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
    }
    engine.shutdown();

    match handle.await {
        Ok(result) => result,
        Err(e) => Err(anyhow::anyhow!("engine task failed: {}", e).into()),
    }
}

fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},pairsync=debug", config.level)));

    // `rolling::daily` panics when it cannot create the file, so check first
    let file_layer = config.dir.as_ref().and_then(|log_dir| {
        if let Err(e) = std::fs::create_dir_all(log_dir) {
            eprintln!("Warning: Could not create log directory {} ({}), file logging disabled", log_dir, e);
            return None;
        }

        let test_path = std::path::Path::new(log_dir).join(".pairsync_write_test");
        if let Err(e) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&test_path)
        {
            eprintln!("Warning: Could not write to log directory {} ({}), file logging disabled", log_dir, e);
            return None;
        }
        let _ = std::fs::remove_file(&test_path);

        let file_appender = tracing_appender::rolling::daily(log_dir, "pairsync.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // lives for the whole process
        Box::leak(Box::new(guard));

        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true),
        )
    });

    let (plain, json) = if config.json {
        (None, Some(tracing_subscriber::fmt::layer().json().with_target(true)))
    } else {
        (Some(tracing_subscriber::fmt::layer().with_target(true)), None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .with(file_layer)
        .init();
}
