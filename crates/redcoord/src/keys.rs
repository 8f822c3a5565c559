//! Well-known channel and key names for the invalidation broadcast.

const MESSAGE_CHANNEL: &str = "memory_sub:message";
const DELETE_HISTORY: &str = "memory_sub:history";

/// Names shared by every broadcaster and subscriber using the same prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationKeys {
    channel: String,
    history: String,
}

impl InvalidationKeys {
    pub fn new(prefix: &str) -> Self {
        Self {
            channel: format!("{prefix}{MESSAGE_CHANNEL}"),
            history: format!("{prefix}{DELETE_HISTORY}"),
        }
    }

    /// Pub/sub channel carrying space-joined key batches.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Sorted set of recently invalidated keys scored by milliseconds.
    pub fn history(&self) -> &str {
        &self.history
    }
}

impl Default for InvalidationKeys {
    fn default() -> Self {
        Self::new("")
    }
}
