use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use redcoord::{BackingStore, DistributedLock};
use redcoord_config::CoordConfig;

use crate::cli::LockArgs;
use crate::output::{print_success, print_warning};

pub async fn run(store: Arc<dyn BackingStore>, config: &CoordConfig, args: &LockArgs) -> Result<()> {
    let lock = DistributedLock::new(store, config.lock.clone());
    let timeout = Duration::from_millis(args.timeout_ms);
    let max_hold = args
        .max_hold_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.lock.default_max_hold());

    println!("{} {}", "Acquiring".cyan(), args.key);
    let mut handle = lock.acquire_with_max_hold(&args.key, timeout, max_hold).await;
    if !handle.success() {
        anyhow::bail!(
            "Lock {} not acquired within {}ms",
            args.key,
            args.timeout_ms
        );
    }
    print_success(&format!("Acquired {} (token {})", args.key, handle.token()));

    match args.hold_ms {
        Some(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
        None => {
            println!("Holding until Ctrl+C");
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl+C")?;
        }
    }

    if !handle.is_renewing() {
        print_warning("Hold ceiling reached before release; the lease may have lapsed");
    }
    if handle.release().await {
        print_success(&format!("Released {}", args.key));
    } else {
        print_warning(&format!("{} was no longer held by this token", args.key));
    }
    Ok(())
}
