//! appconfig - command-line client for the cached configuration facade

use anyhow::{Context, Result};
use appconfig_core::ConfigurationFacade;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use config::Config;

/// appconfig - read and publish hosted configurations through a local cache
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/appconfig.toml", env = "APPCONFIG_CONFIG")]
    config: String,

    /// Application name
    #[arg(short, long)]
    application: Option<String>,

    /// Environment name
    #[arg(short, long)]
    environment: Option<String>,

    /// Store region
    #[arg(long)]
    region: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a configuration
    Get {
        name: String,
        /// Read straight from the store
        #[arg(long)]
        ignore_cache: bool,
    },
    /// Create a configuration and deploy its first version
    Create {
        name: String,
        #[command(flatten)]
        content: ContentArgs,
    },
    /// Deploy a new version of a configuration
    Update {
        name: String,
        #[command(flatten)]
        content: ContentArgs,
    },
    /// Delete a configuration and all of its versions
    Delete { name: String },
    /// Print a configuration whenever the cached copy changes
    Watch {
        name: String,
        /// Seconds between reads
        #[arg(long, default_value_t = 5)]
        every: u64,
        /// Override the background refresh interval, in seconds
        #[arg(long)]
        refresh_interval: Option<u64>,
    },
    /// Print the effective configuration
    ShowConfig,
}

#[derive(clap::Args, Debug)]
#[group(required = true, multiple = false)]
struct ContentArgs {
    /// Inline content
    #[arg(long)]
    content: Option<String>,
    /// Read content from a file
    #[arg(long)]
    file: Option<String>,
}

impl ContentArgs {
    async fn read(&self) -> Result<Vec<u8>> {
        match (&self.content, &self.file) {
            (Some(content), _) => Ok(content.clone().into_bytes()),
            (None, Some(path)) => tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read content file: {}", path)),
            (None, None) => anyhow::bail!("either --content or --file is required"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load(&args.config)?;
    if let Some(application) = args.application {
        config.store.application = application;
    }
    if args.environment.is_some() {
        config.store.environment = args.environment;
    }
    if args.region.is_some() {
        config.store.region = args.region;
    }

    // Initialize logging
    init_logging(&config.logging.level, &config.logging.format);

    if let Command::ShowConfig = args.command {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let facade = ConfigurationFacade::connect(config.facade_options())
        .await
        .context("Failed to initialize configuration facade")?;

    match args.command {
        Command::Get { name, ignore_cache } => {
            let content = if ignore_cache {
                facade.get_configuration_ignoring_cache(&name).await?
            } else {
                facade.get_configuration(&name).await?
            };
            write_stdout(&content)?;
        }
        Command::Create { name, content } => {
            let profile_id = facade.create_configuration(&name, content.read().await?).await?;
            info!("Created configuration {} (profile {})", name, profile_id);
        }
        Command::Update { name, content } => {
            facade.update_configuration(&name, content.read().await?).await?;
            info!("Updated configuration {}", name);
        }
        Command::Delete { name } => {
            facade.delete_configuration(&name).await?;
            info!("Deleted configuration {}", name);
        }
        Command::Watch {
            name,
            every,
            refresh_interval,
        } => {
            if let Some(secs) = refresh_interval {
                facade.set_refresh_interval(Duration::from_secs(secs))?;
            }
            watch(&facade, &name, Duration::from_secs(every.max(1))).await?;
        }
        Command::ShowConfig => {}
    }

    facade.shutdown();
    Ok(())
}

/// Poll a configuration until interrupted, printing it when it changes
async fn watch(facade: &ConfigurationFacade, name: &str, every: Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(every);
    let mut last = None;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match facade.get_configuration(name).await {
                    Ok(content) => {
                        if last.as_ref() != Some(&content) {
                            write_stdout(&content)?;
                            last = Some(content);
                        }
                    }
                    Err(e) if e.is_transient() => warn!("Read of {} failed: {}", name, e),
                    Err(e) => return Err(e.into()),
                }
            }
            _ = &mut shutdown => break,
        }
    }

    Ok(())
}

fn write_stdout(content: &[u8]) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(content)?;
    if !content.ends_with(b"\n") {
        stdout.write_all(b"\n")?;
    }
    stdout.flush()?;
    Ok(())
}

/// Initialize logging. Logs go to stderr so stdout carries content only.
fn init_logging(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    if format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for CTRL+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
