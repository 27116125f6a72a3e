use chrono::Duration;

/// Immutable per-invocation knobs, passed explicitly to the runner. Webhook
/// chunking and pacing live on the sink itself.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hard cap on messages fetched per invocation. Full-history passes
    /// advance through the mailbox in chunks of this size.
    pub max_fetch: usize,
    /// Only fetch messages newer than now minus this window. `None` means
    /// unbounded (full reprocess).
    pub lookback: Option<Duration>,
    /// Value reported in the webhook payload's `source` field.
    pub source_label: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_fetch: 500,
            lookback: None,
            source_label: "gmail".to_string(),
        }
    }
}
