use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::StoreId;

/// What a notification message says happened to a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Booking,
    Cancellation,
}

/// One structured event, extracted from exactly one raw message.
///
/// Events are immutable: the same raw text always parses to the same event,
/// and the engine never mutates or deletes one. `received_at` is the mailbox
/// arrival time, not the slot's own schedule, and is the only ordering
/// signal used for reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEvent {
    pub store: StoreId,
    /// Customer display name; "N/A" when no name pattern matched.
    pub customer_name: String,
    pub slot_date: NaiveDate,
    pub start_time: NaiveTime,
    /// Absent for legacy-template cancellations, which carry only a start.
    pub end_time: Option<NaiveTime>,
    /// Store-specific room/area label. Display only, never identity.
    pub room: String,
    pub is_charter: bool,
    pub action: ActionType,
    pub received_at: DateTime<Utc>,
    /// Opaque id of the raw message. Used for processed-marker bookkeeping,
    /// never for slot identity.
    pub source_id: String,
    /// Subject of the raw message, passed through to the webhook sink.
    pub source_subject: String,
}

impl NotificationEvent {
    /// Stable grouping key for reconciliation. Room, charter flag, action
    /// and arrival time are deliberately excluded: a correction or
    /// cancellation for the same human booking may differ in all of them.
    pub fn key(&self) -> SlotKey {
        SlotKey {
            store: self.store,
            slot_date: self.slot_date,
            start_time: self.start_time,
            end_time: self.end_time,
            customer_name: self.customer_name.clone(),
        }
    }

    pub fn start_at(&self) -> NaiveDateTime {
        self.slot_date.and_time(self.start_time)
    }

    /// End of the slot window. Legacy cancellations without an end time
    /// collapse to the start instant, which still lands inside the sink
    /// synchronizer's search tolerances.
    pub fn end_at(&self) -> NaiveDateTime {
        self.slot_date.and_time(self.end_time.unwrap_or(self.start_time))
    }
}

/// Identity of a reservation slot as reconstructed from message text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub store: StoreId,
    pub slot_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: Option<NaiveTime>,
    pub customer_name: String,
}

/// The current authoritative state of one slot, derived fresh on every
/// reconciliation pass from all events sharing its key.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSlot {
    /// The event with the latest `received_at` in the group. Its display
    /// fields (room, charter flag, customer name) win.
    pub winner: NotificationEvent,
    /// More than one message contributed to this slot. Observability only;
    /// correctness does not depend on it.
    pub is_duplicate: bool,
    /// Source ids of every message in the group, so all of them can be
    /// marked processed once the slot's state reaches the sinks.
    pub source_ids: Vec<String>,
}

impl ResolvedSlot {
    pub fn current_state(&self) -> ActionType {
        self.winner.action
    }

    pub fn is_active(&self) -> bool {
        self.winner.action == ActionType::Booking
    }
}
