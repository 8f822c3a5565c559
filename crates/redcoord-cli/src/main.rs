mod cli;
mod commands;
mod observability;
mod output;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use redcoord::store::RedisStore;
use redcoord_config::CoordConfig;

use cli::{Cli, Commands};
use output::print_error;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // Warn-level until the configured level is known
    observability::init_tracing_with_level("warn");
    let config = load_config(&cli)?;
    observability::apply_logging_level(&config.logging.level);

    let format = cli.format.unwrap_or_default();

    match &cli.command {
        Commands::Lock(args) => {
            let store = connect(&config).await?;
            commands::lock::run(store, &config, args).await?;
        }
        Commands::Invalidate(args) => {
            let store = connect(&config).await?;
            commands::invalidate::run(store, &config, args, format).await?;
        }
        Commands::History(args) => {
            let store = connect(&config).await?;
            commands::history::run(store, &config, args, format).await?;
        }
        Commands::Watch(args) => {
            commands::watch::run(&cli, config, args).await?;
        }
        Commands::Ping => {
            connect(&config).await?;
            output::print_success(&format!(
                "Connected to {}",
                redcoord::store::redact_url(&config.redis.url)
            ));
        }
    }

    Ok(())
}

/// Load the configuration file and apply command-line overrides.
pub(crate) fn load_config(cli: &Cli) -> Result<CoordConfig> {
    let mut config = redcoord_config::load_config(cli.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(url) = &cli.url {
        config.redis.url = url.clone();
    }
    if let Some(prefix) = &cli.prefix {
        config.redis.key_prefix = prefix.clone();
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    Ok(config)
}

async fn connect(config: &CoordConfig) -> Result<Arc<dyn redcoord::BackingStore>> {
    let store = RedisStore::from_config(&config.redis).context("failed to create Redis store")?;
    store.ping().await.with_context(|| {
        format!(
            "Redis at {} is not reachable",
            redcoord::store::redact_url(&config.redis.url)
        )
    })?;
    Ok(Arc::new(store))
}
