use std::sync::Arc;

use anyhow::Result;
use redcoord::{BackingStore, Broadcaster, InvalidationKeys, SystemClock};
use redcoord_config::CoordConfig;

use crate::cli::{InvalidateArgs, OutputFormat};
use crate::output::print_report;

pub async fn run(
    store: Arc<dyn BackingStore>,
    config: &CoordConfig,
    args: &InvalidateArgs,
    format: OutputFormat,
) -> Result<()> {
    let broadcaster = Broadcaster::new(
        store,
        InvalidationKeys::new(&config.redis.key_prefix),
        &config.invalidation,
        Arc::new(SystemClock),
    );

    let report = broadcaster.invalidate(&args.keys).await;
    print_report(&report, format);

    let sendable = report.requested - report.skipped;
    if report.published < sendable {
        anyhow::bail!(
            "{} of {} key(s) failed to publish",
            sendable - report.published,
            sendable
        );
    }
    Ok(())
}
