use chrono::Utc;
use metrics::counter;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, warn};
use url::Url;

use crate::error::SinkError;
use crate::event::ResolvedSlot;

/// One reservation row in the webhook batch payload. Field names are the
/// receiver's wire contract.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReservationEntry {
    pub date: String,
    pub start: String,
    pub end: String,
    pub customer_name: String,
    pub room_name: String,
    pub store: String,
    pub r#type: String,
    pub is_cancellation: bool,
    pub is_charter: bool,
    pub source: String,
    pub email_id: String,
    pub email_subject: String,
    pub email_date: String,
}

impl ReservationEntry {
    pub fn from_slot(slot: &ResolvedSlot, source_label: &str) -> Self {
        let winner = &slot.winner;
        Self {
            date: winner.slot_date.format("%Y-%m-%d").to_string(),
            start: winner.start_time.format("%H:%M").to_string(),
            end: winner
                .end_time
                .unwrap_or(winner.start_time)
                .format("%H:%M")
                .to_string(),
            customer_name: winner.customer_name.clone(),
            room_name: winner.room.clone(),
            store: winner.store.slug().to_string(),
            r#type: if winner.is_charter { "charter" } else { "gmail" }.to_string(),
            is_cancellation: !slot.is_active(),
            is_charter: winner.is_charter,
            source: source_label.to_string(),
            email_id: winner.source_id.clone(),
            email_subject: winner.source_subject.clone(),
            email_date: winner.received_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    source: &'a str,
    timestamp: String,
    reservations: &'a [ReservationEntry],
}

/// Entry indices that reached the receiver, per chunk. A failed chunk's
/// members stay unmarked upstream and are retried by the next invocation.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DeliveryReport {
    pub delivered: Vec<usize>,
    pub failed: Vec<usize>,
    /// The receiver pushed back with a rate-limit status; the invocation
    /// should stop writing and resume later.
    pub rate_limited: bool,
}

/// Batch-posting webhook client. One client per process, chunked sends with
/// pacing between chunks.
pub struct WebhookSink {
    client: reqwest::Client,
    url: Url,
    chunk_size: usize,
    pace: Duration,
    source_label: String,
}

impl WebhookSink {
    pub fn new(
        url: Url,
        api_key: &str,
        request_timeout: Duration,
        chunk_size: usize,
        pace: Duration,
        source_label: String,
    ) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        // A key that cannot be sent would leave every request unauthenticated.
        let mut value =
            HeaderValue::from_str(api_key).expect("webhook API key is not a valid header value");
        value.set_sensitive(true);
        headers.insert("X-API-Key", value);
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(request_timeout)
            .build()
            .expect("failed to construct webhook client");
        Self {
            client,
            url,
            chunk_size: chunk_size.max(1),
            pace,
            source_label,
        }
    }

    async fn post_chunk(&self, chunk: &[ReservationEntry]) -> Result<(), SinkError> {
        let payload = WebhookPayload {
            source: &self.source_label,
            timestamp: Utc::now().to_rfc3339(),
            reservations: chunk,
        };
        let response = self.client.post(self.url.clone()).json(&payload).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status.as_u16() == 429 {
            return Err(SinkError::RateLimited);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SinkError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// Send all entries in fixed-size chunks with pacing in between. Chunk
    /// failures are isolated; a rate-limit response stops the remaining
    /// chunks entirely.
    pub async fn send_all(&self, entries: &[ReservationEntry]) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for (chunk_index, chunk) in entries.chunks(self.chunk_size).enumerate() {
            if chunk_index > 0 {
                tokio::time::sleep(self.pace).await;
            }
            let base = chunk_index * self.chunk_size;
            match self.post_chunk(chunk).await {
                Ok(()) => {
                    counter!("reconciler_webhook_chunks_sent_total").increment(1);
                    info!(chunk = chunk_index, entries = chunk.len(), "webhook chunk delivered");
                    report.delivered.extend(base..base + chunk.len());
                }
                Err(SinkError::RateLimited) => {
                    error!(chunk = chunk_index, "webhook rate limited, stopping this pass");
                    counter!("reconciler_webhook_chunks_failed_total").increment(1);
                    report.failed.extend(base..entries.len());
                    report.rate_limited = true;
                    break;
                }
                Err(e) => {
                    warn!(chunk = chunk_index, error = %e, "webhook chunk failed");
                    counter!("reconciler_webhook_chunks_failed_total").increment(1);
                    report.failed.extend(base..base + chunk.len());
                }
            }
        }
        report
    }
}
