//! Run one reservation reconciliation pass over a mailbox dump.
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use envconfig::Envconfig;
use tracing::{info, warn};
use url::Url;

use reconciler::config::EngineConfig;
use reconciler::runner::Engine;
use reconciler::sinks::webhook::WebhookSink;
use reconciler::source::{FileOffset, JsonFileSource};
use reconciler::store::StoreRegistry;

mod config;

use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::init_from_env().expect("Invalid configuration:");

    let source = JsonFileSource::new(
        PathBuf::from(&config.mailbox_path),
        PathBuf::from(&config.processed_path),
    )
    .context("failed to open mailbox dump")?;
    let offsets = FileOffset::new(PathBuf::from(&config.offset_path));

    let engine_config = EngineConfig {
        max_fetch: config.max_fetch,
        lookback: config.lookback_hours.map(chrono::Duration::hours),
        source_label: config.source_label.as_str().to_owned(),
    };

    let mut engine = Engine::new(
        StoreRegistry::with_defaults(),
        engine_config,
        Arc::new(source),
        Box::new(offsets),
    );

    match (&config.webhook_url, &config.webhook_api_key) {
        (Some(url), Some(api_key)) => {
            let url = Url::parse(url).context("invalid WEBHOOK_URL")?;
            engine = engine.with_webhook(WebhookSink::new(
                url,
                api_key.as_str(),
                config.request_timeout.0,
                config.webhook_chunk_size,
                config.chunk_pace.0,
                config.source_label.as_str().to_owned(),
            ));
        }
        (None, None) => info!("no webhook configured, running calendar-only"),
        _ => warn!("webhook needs both WEBHOOK_URL and WEBHOOK_API_KEY, skipping delivery"),
    }

    let summary = engine.run_once().await?;

    for rejection in &summary.capacity_rejections {
        warn!(
            title = %rejection.title,
            current = rejection.rejection.current,
            max = rejection.rejection.max,
            "booking rejected, window at capacity"
        );
    }
    if summary.aborted {
        warn!("pass aborted on rate limit, offset kept for the next run");
    }
    info!(
        fetched = summary.fetched,
        not_applicable = summary.not_applicable,
        other_store = summary.other_store,
        no_schedule = summary.no_schedule,
        parse_failures = summary.parse_failures,
        slots = summary.slots,
        duplicates = summary.duplicates,
        calendar_created = summary.calendar_created,
        calendar_unchanged = summary.calendar_unchanged,
        calendar_deleted = summary.calendar_deleted,
        capacity_rejections = summary.capacity_rejections.len(),
        webhook_delivered = summary.webhook_delivered,
        webhook_failed = summary.webhook_failed,
        marked_processed = summary.marked_processed,
        "pass finished"
    );

    Ok(())
}
