use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use redcoord::invalidation::EvictFn;
use redcoord::{InvalidationKeys, NamedClient, SubscriberAgent};
use redcoord_config::CoordConfig;

use crate::cli::{Cli, WatchArgs};
use crate::observability;
use crate::output::print_success;

pub async fn run(cli: &Cli, config: CoordConfig, args: &WatchArgs) -> Result<()> {
    let client = Arc::new(NamedClient::from_config(&config.redis));
    let keys = InvalidationKeys::new(&config.redis.key_prefix);
    let evictor = Arc::new(EvictFn(|key: &str| {
        println!("{} {}", "evict".red(), key);
    }));

    println!(
        "{} {} on {}",
        "Watching".cyan(),
        keys.channel(),
        redcoord::store::redact_url(&config.redis.url)
    );
    let agent = SubscriberAgent::new(
        args.name.clone(),
        client.clone(),
        evictor,
        keys,
        &config.invalidation,
    )
    .start();
    let mut state = agent.watch_state();

    let mut reload = tokio::time::interval(Duration::from_secs(args.reload_secs.max(1)));
    reload.tick().await;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result.context("failed to listen for Ctrl+C")?;
                break;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                println!("{} {}", "state".cyan(), current);
            }
            _ = reload.tick() => match crate::load_config(cli) {
                Ok(fresh) => {
                    if fresh.redis.url != *client.url() {
                        tracing::info!(
                            url = %redcoord::store::redact_url(&fresh.redis.url),
                            "Redis URL changed, subscriber will reconnect"
                        );
                        client.set_url(fresh.redis.url.clone());
                    }
                    observability::apply_logging_level(&fresh.logging.level);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "config reload failed, keeping current settings");
                }
            },
        }
    }

    agent.stop().await;
    print_success("Stopped");
    Ok(())
}
