use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime};
use metrics::counter;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::admission::{admit, Admission, CapacityRejection, ExistingBooking};
use crate::classify::PRODUCT_MARKER;
use crate::error::SinkError;
use crate::event::ResolvedSlot;

/// Search tolerance around a slot when looking for its prior calendar
/// representation on the create path.
pub const CREATE_TOLERANCE_SECS: i64 = 60;
/// Wider tolerance on the cancel path; cancellation notices tolerate more
/// clock skew.
pub const CANCEL_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq)]
pub struct CalendarEvent {
    /// Sink-side handle used for deletion.
    pub reference: String,
    pub title: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// The calendar collaborator's whole surface: range listing, create,
/// delete. There is no stable external key, which is why the synchronizer
/// reconstructs identity from titles and time windows.
#[async_trait]
pub trait Calendar {
    async fn list_events(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<CalendarEvent>, SinkError>;

    async fn create_event(
        &self,
        title: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<(), SinkError>;

    async fn delete_event(&self, reference: &str) -> Result<(), SinkError>;
}

/// In-memory calendar, used in tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryCalendar {
    inner: Mutex<MemoryCalendarInner>,
}

#[derive(Debug, Default)]
struct MemoryCalendarInner {
    events: Vec<CalendarEvent>,
    next_reference: u64,
    creates: usize,
    deletes: usize,
}

impl MemoryCalendar {
    pub fn with_events(events: Vec<CalendarEvent>) -> Self {
        Self {
            inner: Mutex::new(MemoryCalendarInner {
                events,
                next_reference: 1_000,
                creates: 0,
                deletes: 0,
            }),
        }
    }

    pub fn events(&self) -> Vec<CalendarEvent> {
        self.inner.lock().unwrap().events.clone()
    }

    /// Total create and delete calls since construction.
    pub fn write_counts(&self) -> (usize, usize) {
        let inner = self.inner.lock().unwrap();
        (inner.creates, inner.deletes)
    }
}

#[async_trait]
impl Calendar for MemoryCalendar {
    async fn list_events(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<CalendarEvent>, SinkError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .events
            .iter()
            .filter(|e| e.start < end && start < e.end)
            .cloned()
            .collect())
    }

    async fn create_event(
        &self,
        title: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<(), SinkError> {
        let mut inner = self.inner.lock().unwrap();
        let reference = format!("mem-{}", inner.next_reference);
        inner.next_reference += 1;
        inner.creates += 1;
        inner.events.push(CalendarEvent {
            reference,
            title: title.to_string(),
            start,
            end,
        });
        Ok(())
    }

    async fn delete_event(&self, reference: &str) -> Result<(), SinkError> {
        let mut inner = self.inner.lock().unwrap();
        inner.events.retain(|e| e.reference != reference);
        inner.deletes += 1;
        Ok(())
    }
}

/// Display title carried by a slot's calendar event. Identity is
/// reconstructed from it, so its shape is a contract.
pub fn slot_title(customer_name: &str, room: &str, is_charter: bool) -> String {
    if is_charter {
        format!("{customer_name} - {PRODUCT_MARKER}-【貸切】")
    } else {
        format!("{customer_name} - {PRODUCT_MARKER}-{room}")
    }
}

/// Outcome of applying one active slot to the calendar.
#[derive(Debug, Clone, PartialEq)]
pub enum CalendarOutcome {
    Created,
    /// An event with the identical title already sits in the window.
    AlreadySynced,
    Rejected(CapacityRejection),
}

/// Idempotently applies resolved slot state to a calendar that only
/// supports fuzzy lookups.
pub struct CalendarSynchronizer {
    calendar: Arc<dyn Calendar + Send + Sync>,
}

impl CalendarSynchronizer {
    pub fn new(calendar: Arc<dyn Calendar + Send + Sync>) -> Self {
        Self { calendar }
    }

    /// Materialize an active slot. Prior representations of the same slot
    /// (customer name + marker, start/end within tolerance) are either kept
    /// as-is when the title is byte-identical, or deleted as stale label
    /// assignments. Capacity is checked against whatever marker events then
    /// remain in the window.
    pub async fn upsert(
        &self,
        slot: &ResolvedSlot,
        max_slots: Option<u32>,
    ) -> Result<CalendarOutcome, SinkError> {
        let winner = &slot.winner;
        let title = slot_title(&winner.customer_name, &winner.room, winner.is_charter);
        let start = winner.start_at();
        let end = winner.end_at();
        let tolerance = Duration::seconds(CREATE_TOLERANCE_SECS);

        let existing = self
            .calendar
            .list_events(start - tolerance, end + tolerance)
            .await?;

        let mut remaining = Vec::new();
        let mut already_synced = false;
        for event in existing {
            let is_prior = event.title.contains(&winner.customer_name)
                && event.title.contains(PRODUCT_MARKER)
                && (event.start - start).num_seconds().abs() <= CREATE_TOLERANCE_SECS
                && (event.end - end).num_seconds().abs() <= CREATE_TOLERANCE_SECS;
            if !is_prior {
                remaining.push(event);
                continue;
            }
            if event.title == title {
                already_synced = true;
                remaining.push(event);
            } else {
                // Stale room or charter label from an earlier message.
                debug!(stale = %event.title, "deleting stale slot representation");
                self.calendar.delete_event(&event.reference).await?;
                counter!("reconciler_calendar_deleted_total").increment(1);
            }
        }
        if already_synced {
            return Ok(CalendarOutcome::AlreadySynced);
        }

        let occupying: Vec<ExistingBooking> = remaining
            .iter()
            .filter(|e| e.title.contains(PRODUCT_MARKER))
            .map(|e| ExistingBooking {
                reference: e.title.clone(),
                start: e.start,
                end: e.end,
            })
            .collect();
        if let Admission::Rejected(rejection) = admit(start, end, &occupying, max_slots) {
            counter!("reconciler_capacity_rejections_total").increment(1);
            return Ok(CalendarOutcome::Rejected(rejection));
        }

        self.calendar.create_event(&title, start, end).await?;
        counter!("reconciler_calendar_created_total").increment(1);
        info!(%title, %start, "created calendar event");
        Ok(CalendarOutcome::Created)
    }

    /// Remove every representation of a cancelled slot. Deletes all
    /// customer+marker matches in the window, plural, because earlier
    /// retries may have left more than one.
    pub async fn remove(&self, slot: &ResolvedSlot) -> Result<usize, SinkError> {
        let winner = &slot.winner;
        let start = winner.start_at();
        let end = winner.end_at();
        let tolerance = Duration::seconds(CANCEL_TOLERANCE_SECS);

        let existing = self
            .calendar
            .list_events(start - tolerance, end + tolerance)
            .await?;
        let mut deleted = 0;
        for event in existing {
            if event.title.contains(&winner.customer_name) && event.title.contains(PRODUCT_MARKER)
            {
                self.calendar.delete_event(&event.reference).await?;
                counter!("reconciler_calendar_deleted_total").increment(1);
                deleted += 1;
            }
        }
        if deleted > 0 {
            info!(customer = %winner.customer_name, deleted, "removed cancelled slot");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ActionType, NotificationEvent};
    use crate::store::StoreId;
    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};

    fn slot(action: ActionType, room: &str) -> ResolvedSlot {
        ResolvedSlot {
            winner: NotificationEvent {
                store: StoreId::Ebisu,
                customer_name: "田中太郎".to_string(),
                slot_date: NaiveDate::from_ymd_opt(2025, 8, 5).unwrap(),
                start_time: NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
                end_time: NaiveTime::from_hms_opt(15, 30, 0),
                room: room.to_string(),
                is_charter: false,
                action,
                received_at: Utc.with_ymd_and_hms(2025, 8, 1, 9, 0, 0).unwrap(),
                source_id: "m1".to_string(),
                source_subject: String::new(),
            },
            is_duplicate: false,
            source_ids: vec!["m1".to_string()],
        }
    }

    fn synchronizer() -> (Arc<MemoryCalendar>, CalendarSynchronizer) {
        let calendar = Arc::new(MemoryCalendar::default());
        let sync = CalendarSynchronizer::new(calendar.clone());
        (calendar, sync)
    }

    #[tokio::test]
    async fn creates_then_noops_on_reapply() {
        let (calendar, sync) = synchronizer();
        let slot = slot(ActionType::Booking, "STUDIO A");

        assert_eq!(sync.upsert(&slot, Some(2)).await.unwrap(), CalendarOutcome::Created);
        assert_eq!(
            sync.upsert(&slot, Some(2)).await.unwrap(),
            CalendarOutcome::AlreadySynced
        );

        let events = calendar.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "田中太郎 - HALLEL-STUDIO A");
        assert_eq!(calendar.write_counts(), (1, 0));
    }

    #[tokio::test]
    async fn stale_room_label_is_replaced() {
        let (calendar, sync) = synchronizer();
        sync.upsert(&slot(ActionType::Booking, "STUDIO A"), Some(2))
            .await
            .unwrap();
        assert_eq!(
            sync.upsert(&slot(ActionType::Booking, "STUDIO B"), Some(2))
                .await
                .unwrap(),
            CalendarOutcome::Created
        );

        let events = calendar.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "田中太郎 - HALLEL-STUDIO B");
        assert_eq!(calendar.write_counts(), (2, 1));
    }

    #[tokio::test]
    async fn charter_title_hides_the_room() {
        let (calendar, sync) = synchronizer();
        let mut charter = slot(ActionType::Booking, "STUDIO A");
        charter.winner.is_charter = true;
        sync.upsert(&charter, None).await.unwrap();
        assert_eq!(calendar.events()[0].title, "田中太郎 - HALLEL-【貸切】");
    }

    #[tokio::test]
    async fn cancellation_deletes_every_representation() {
        let start = NaiveDate::from_ymd_opt(2025, 8, 5)
            .unwrap()
            .and_hms_opt(14, 0, 0)
            .unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 8, 5)
            .unwrap()
            .and_hms_opt(15, 30, 0)
            .unwrap();
        let calendar = Arc::new(MemoryCalendar::with_events(vec![
            CalendarEvent {
                reference: "e1".to_string(),
                title: "田中太郎 - HALLEL-STUDIO A".to_string(),
                start,
                end,
            },
            CalendarEvent {
                reference: "e2".to_string(),
                title: "田中太郎 - HALLEL-STUDIO B".to_string(),
                start,
                end,
            },
            CalendarEvent {
                reference: "e3".to_string(),
                title: "佐藤花子 - HALLEL-STUDIO A".to_string(),
                start,
                end,
            },
        ]));
        let sync = CalendarSynchronizer::new(calendar.clone());

        let deleted = sync.remove(&slot(ActionType::Cancellation, "STUDIO A")).await.unwrap();
        assert_eq!(deleted, 2);
        let events = calendar.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "佐藤花子 - HALLEL-STUDIO A");
    }

    #[tokio::test]
    async fn capacity_rejection_reports_occupants() {
        let start = NaiveDate::from_ymd_opt(2025, 8, 5)
            .unwrap()
            .and_hms_opt(14, 0, 0)
            .unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 8, 5)
            .unwrap()
            .and_hms_opt(15, 30, 0)
            .unwrap();
        let calendar = Arc::new(MemoryCalendar::with_events(vec![
            CalendarEvent {
                reference: "e1".to_string(),
                title: "佐藤花子 - HALLEL-STUDIO A".to_string(),
                start,
                end,
            },
            CalendarEvent {
                reference: "e2".to_string(),
                title: "鈴木一郎 - HALLEL-STUDIO B".to_string(),
                start,
                end,
            },
        ]));
        let sync = CalendarSynchronizer::new(calendar.clone());

        match sync.upsert(&slot(ActionType::Booking, "STUDIO A"), Some(2)).await.unwrap() {
            CalendarOutcome::Rejected(r) => {
                assert_eq!((r.current, r.max), (2, 2));
                assert!(r.existing.contains(&"佐藤花子 - HALLEL-STUDIO A".to_string()));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        assert_eq!(calendar.write_counts(), (0, 0));
    }

    #[tokio::test]
    async fn unrelated_events_in_window_are_untouched() {
        let start = NaiveDate::from_ymd_opt(2025, 8, 5)
            .unwrap()
            .and_hms_opt(14, 0, 0)
            .unwrap();
        let calendar = Arc::new(MemoryCalendar::with_events(vec![CalendarEvent {
            reference: "e1".to_string(),
            title: "スタッフ会議".to_string(),
            start,
            end: start + Duration::hours(1),
        }]));
        let sync = CalendarSynchronizer::new(calendar.clone());

        sync.upsert(&slot(ActionType::Booking, "STUDIO A"), Some(2))
            .await
            .unwrap();
        assert_eq!(calendar.events().len(), 2);
    }
}
