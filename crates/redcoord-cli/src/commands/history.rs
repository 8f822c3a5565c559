use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use redcoord::{BackingStore, InvalidationKeys, InvalidationLog, SystemClock};
use redcoord_config::CoordConfig;

use crate::cli::{HistoryArgs, OutputFormat};
use crate::output::print_history;

pub async fn run(
    store: Arc<dyn BackingStore>,
    config: &CoordConfig,
    args: &HistoryArgs,
    format: OutputFormat,
) -> Result<()> {
    let log = InvalidationLog::new(
        store,
        InvalidationKeys::new(&config.redis.key_prefix),
        config.invalidation.retention(),
        Arc::new(SystemClock),
    );

    let window = args
        .since_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| log.retention());
    let now_ms = log.now_ms();
    let records = log
        .read_since(now_ms - window.as_millis() as i64)
        .await
        .context("failed to read invalidation history")?;

    print_history(&records, now_ms, format);
    Ok(())
}
