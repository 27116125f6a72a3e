use chrono::Utc;
use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::admission::CapacityRejection;
use crate::config::EngineConfig;
use crate::error::{EngineError, SinkError};
use crate::event::ResolvedSlot;
use crate::extract::{extract, Extraction};
use crate::resolve::resolve;
use crate::sinks::calendar::{slot_title, Calendar, CalendarOutcome, CalendarSynchronizer};
use crate::sinks::webhook::{ReservationEntry, WebhookSink};
use crate::source::{FetchFilter, MessageSource, OffsetStore};
use crate::store::{StoreId, StoreRegistry};

/// A capacity rejection tied to the slot that triggered it, for the
/// invocation summary.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotRejection {
    pub title: String,
    pub rejection: CapacityRejection,
}

/// Structured outcome of one reconciliation pass. Always produced, also on
/// early abort, so partial progress is visible.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunSummary {
    pub fetched: usize,
    pub not_applicable: usize,
    pub other_store: usize,
    pub no_schedule: usize,
    pub parse_failures: usize,
    pub slots: usize,
    pub duplicates: usize,
    pub calendar_created: usize,
    pub calendar_unchanged: usize,
    pub calendar_deleted: usize,
    pub sink_failures: usize,
    pub capacity_rejections: Vec<SlotRejection>,
    pub webhook_delivered: usize,
    pub webhook_failed: usize,
    pub marked_processed: usize,
    /// Marker writes that failed; the affected messages are re-fetched and
    /// re-applied idempotently next pass.
    pub mark_failures: usize,
    /// A rate-limit response cut this pass short; the offset was kept so
    /// the next invocation resumes where this one stopped.
    pub aborted: bool,
}

/// One logical writer over the whole pipeline: fetch, extract, resolve,
/// apply to sinks, mark processed, advance the offset. Safe to re-run after
/// interruption because resolution is recomputed from scratch and sink
/// application is idempotent.
pub struct Engine {
    registry: StoreRegistry,
    config: EngineConfig,
    source: Arc<dyn MessageSource + Send + Sync>,
    offsets: Box<dyn OffsetStore + Send + Sync>,
    calendars: HashMap<StoreId, CalendarSynchronizer>,
    webhook: Option<WebhookSink>,
}

impl Engine {
    pub fn new(
        registry: StoreRegistry,
        config: EngineConfig,
        source: Arc<dyn MessageSource + Send + Sync>,
        offsets: Box<dyn OffsetStore + Send + Sync>,
    ) -> Self {
        Self {
            registry,
            config,
            source,
            offsets,
            calendars: HashMap::new(),
            webhook: None,
        }
    }

    /// Attach a calendar for one store. The store's profile decides the
    /// opt-out: a profile without a configured calendar id skips calendar
    /// sync even when a calendar is offered here.
    pub fn with_calendar(mut self, store: StoreId, calendar: Arc<dyn Calendar + Send + Sync>) -> Self {
        let configured = self
            .registry
            .get(store)
            .is_some_and(|p| p.calendar_id.is_some());
        if configured {
            self.calendars.insert(store, CalendarSynchronizer::new(calendar));
        } else {
            warn!(%store, "store profile has no calendar configured, skipping calendar sync");
        }
        self
    }

    pub fn with_webhook(mut self, webhook: WebhookSink) -> Self {
        self.webhook = Some(webhook);
        self
    }

    /// Marker and offset writes never abort a pass; the summary with the
    /// work already done is always reported, and unmarked messages are
    /// simply re-fetched and re-applied idempotently.
    async fn mark(&self, slot: &ResolvedSlot, summary: &mut RunSummary) {
        for id in &slot.source_ids {
            match self.source.mark_processed(id).await {
                Ok(()) => summary.marked_processed += 1,
                Err(e) => {
                    warn!(%id, error = %e, "failed to mark message processed, it will be re-fetched");
                    summary.mark_failures += 1;
                }
            }
        }
    }

    fn store_offset(&self, offset: usize) {
        if let Err(e) = self.offsets.store(offset) {
            error!(error = %e, "failed to persist fetch offset");
        }
    }

    pub async fn run_once(&self) -> Result<RunSummary, EngineError> {
        let mut summary = RunSummary::default();
        let offset = self.offsets.load().map_err(EngineError::Offset)?;
        let after = self.config.lookback.map(|window| Utc::now() - window);

        let messages = self
            .source
            .fetch(FetchFilter {
                after,
                offset,
                max: self.config.max_fetch,
            })
            .await?;
        summary.fetched = messages.len();
        counter!("reconciler_messages_fetched_total").increment(messages.len() as u64);
        if messages.is_empty() {
            // Source drained; the next pass starts over from the top.
            self.store_offset(0);
            return Ok(summary);
        }

        let mut events = Vec::new();
        for message in &messages {
            match extract(message, &self.registry) {
                Ok(Extraction::Event(event)) => events.push(event),
                Ok(Extraction::NotApplicable) => summary.not_applicable += 1,
                Ok(Extraction::OtherStore) => summary.other_store += 1,
                Ok(Extraction::NoSchedule) => summary.no_schedule += 1,
                Err(e) => {
                    // Permanently unparseable until the source text changes;
                    // left unmarked and counted so operators can see it.
                    warn!(id = %message.id, error = %e, "message matched a schedule pattern but failed to parse");
                    counter!("reconciler_parse_failures_total").increment(1);
                    summary.parse_failures += 1;
                }
            }
        }

        let mut slots: Vec<ResolvedSlot> = resolve(events).into_values().collect();
        slots.sort_by(|a, b| {
            let left = &a.winner;
            let right = &b.winner;
            (left.store.slug(), left.slot_date, left.start_time, &left.customer_name).cmp(&(
                right.store.slug(),
                right.slot_date,
                right.start_time,
                &right.customer_name,
            ))
        });
        summary.slots = slots.len();
        summary.duplicates = slots.iter().filter(|s| s.is_duplicate).count();

        // Calendar phase. One bad slot must not block the rest, but a
        // rate-limit response stops the whole pass with the offset intact.
        let mut admitted: Vec<&ResolvedSlot> = Vec::new();
        for slot in &slots {
            let synchronizer = self.calendars.get(&slot.winner.store);
            if slot.is_active() {
                let Some(synchronizer) = synchronizer else {
                    admitted.push(slot);
                    continue;
                };
                let max_slots = self.registry.get(slot.winner.store).and_then(|p| p.max_slots);
                match synchronizer.upsert(slot, max_slots).await {
                    Ok(CalendarOutcome::Created) => {
                        summary.calendar_created += 1;
                        admitted.push(slot);
                    }
                    Ok(CalendarOutcome::AlreadySynced) => {
                        summary.calendar_unchanged += 1;
                        admitted.push(slot);
                    }
                    Ok(CalendarOutcome::Rejected(rejection)) => {
                        let winner = &slot.winner;
                        let title = slot_title(&winner.customer_name, &winner.room, winner.is_charter);
                        warn!(%title, current = rejection.current, max = rejection.max, "capacity exceeded");
                        summary.capacity_rejections.push(SlotRejection { title, rejection });
                    }
                    Err(SinkError::RateLimited) => {
                        summary.aborted = true;
                        self.store_offset(offset);
                        return Ok(summary);
                    }
                    Err(e) => {
                        warn!(error = %e, "calendar upsert failed, slot left for the next pass");
                        summary.sink_failures += 1;
                    }
                }
            } else {
                if let Some(synchronizer) = synchronizer {
                    match synchronizer.remove(slot).await {
                        Ok(deleted) => summary.calendar_deleted += deleted,
                        Err(SinkError::RateLimited) => {
                            summary.aborted = true;
                            self.store_offset(offset);
                            return Ok(summary);
                        }
                        Err(e) => {
                            warn!(error = %e, "calendar removal failed, slot left for the next pass");
                            summary.sink_failures += 1;
                            continue;
                        }
                    }
                }
                // Cancelled slots never reach the webhook batch.
                self.mark(slot, &mut summary).await;
            }
        }

        // Webhook phase, admitted active slots only.
        match &self.webhook {
            Some(webhook) => {
                let entries: Vec<ReservationEntry> = admitted
                    .iter()
                    .map(|slot| ReservationEntry::from_slot(slot, &self.config.source_label))
                    .collect();
                let report = webhook.send_all(&entries).await;
                summary.webhook_delivered = report.delivered.len();
                summary.webhook_failed = report.failed.len();
                for index in report.delivered {
                    if let Some(slot) = admitted.get(index) {
                        self.mark(slot, &mut summary).await;
                    }
                }
                if report.rate_limited {
                    summary.aborted = true;
                    self.store_offset(offset);
                    return Ok(summary);
                }
            }
            None => {
                for slot in &admitted {
                    self.mark(slot, &mut summary).await;
                }
            }
        }

        let next_offset = if summary.fetched < self.config.max_fetch {
            0
        } else {
            // Marked messages drop out of the unprocessed list on their
            // own; only the seen-but-unmarked ones still sit ahead of new
            // mail and need skipping.
            offset + summary.fetched - summary.marked_processed
        };
        self.store_offset(next_offset);

        info!(
            fetched = summary.fetched,
            slots = summary.slots,
            created = summary.calendar_created,
            deleted = summary.calendar_deleted,
            rejected = summary.capacity_rejections.len(),
            delivered = summary.webhook_delivered,
            "reconciliation pass complete"
        );
        Ok(summary)
    }
}
