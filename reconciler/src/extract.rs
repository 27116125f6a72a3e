use chrono::{NaiveDate, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::classify::classify;
use crate::error::ExtractError;
use crate::event::{ActionType, NotificationEvent};
use crate::source::RawMessage;
use crate::store::StoreRegistry;

/// Result of running one raw message through the extraction pipeline.
/// Skips are expected outcomes, not errors; only a matched schedule with
/// impossible values surfaces as `ExtractError`.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Event(NotificationEvent),
    /// No known store substring anywhere; unrelated tenant mail.
    NotApplicable,
    /// A store is mentioned but the classifier assigned it elsewhere.
    OtherStore,
    /// Classified, but no schedule pattern matched the body.
    NoSchedule,
}

/// Raw numeric fields captured by one schedule pattern, before validation.
struct RawWhen {
    year: i32,
    month: u32,
    day: u32,
    start_hour: u32,
    start_minute: u32,
    end: Option<(u32, u32)>,
}

struct ParsedWhen {
    date: NaiveDate,
    start: NaiveTime,
    end: Option<NaiveTime>,
}

impl RawWhen {
    fn build(self) -> Result<ParsedWhen, ExtractError> {
        let date = NaiveDate::from_ymd_opt(self.year, self.month, self.day).ok_or(
            ExtractError::InvalidDate {
                year: self.year,
                month: self.month,
                day: self.day,
            },
        )?;
        let start = NaiveTime::from_hms_opt(self.start_hour, self.start_minute, 0).ok_or(
            ExtractError::InvalidTime {
                hour: self.start_hour,
                minute: self.start_minute,
            },
        )?;
        let end = self
            .end
            .map(|(hour, minute)| {
                NaiveTime::from_hms_opt(hour, minute, 0)
                    .ok_or(ExtractError::InvalidTime { hour, minute })
            })
            .transpose()?;
        Ok(ParsedWhen { date, start, end })
    }
}

// The platform's structured template: 日時： 2025年8月5日(火) 14:00〜15:30
static PRIMARY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"日時[：:]\s*(\d{4})年(\d{1,2})月(\d{1,2})日[^\d]*(\d{1,2}):(\d{2})\s*[〜～~-]\s*(\d{1,2}):(\d{2})",
    )
    .unwrap()
});
// Legacy plain template: 予約：2025-08-05 14:00-15:30
static LEGACY_BOOKING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"予約[：:]\s*(\d{4})-(\d{2})-(\d{2})\s+(\d{1,2}):(\d{2})\s*[-~〜ー]\s*(\d{1,2}):(\d{2})")
        .unwrap()
});
// Legacy cancellation carries no end time: キャンセル：2025-08-05 14:00
static LEGACY_CANCELLATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"キャンセル[：:]\s*(\d{4})-(\d{2})-(\d{2})\s+(\d{1,2}):(\d{2})").unwrap());

static NAME_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^(.+?)\s*様").unwrap());
static NAME_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"お客様名[：:]\s*([^\r\n]+)").unwrap());

fn capture_u32(captures: &regex::Captures, index: usize) -> u32 {
    captures[index].parse().unwrap_or(0)
}

fn primary(body: &str) -> Option<RawWhen> {
    let c = PRIMARY.captures(body)?;
    Some(RawWhen {
        year: c[1].parse().unwrap_or(0),
        month: capture_u32(&c, 2),
        day: capture_u32(&c, 3),
        start_hour: capture_u32(&c, 4),
        start_minute: capture_u32(&c, 5),
        end: Some((capture_u32(&c, 6), capture_u32(&c, 7))),
    })
}

fn legacy_booking(body: &str) -> Option<RawWhen> {
    let c = LEGACY_BOOKING.captures(body)?;
    Some(RawWhen {
        year: c[1].parse().unwrap_or(0),
        month: capture_u32(&c, 2),
        day: capture_u32(&c, 3),
        start_hour: capture_u32(&c, 4),
        start_minute: capture_u32(&c, 5),
        end: Some((capture_u32(&c, 6), capture_u32(&c, 7))),
    })
}

fn legacy_cancellation(body: &str) -> Option<RawWhen> {
    let c = LEGACY_CANCELLATION.captures(body)?;
    Some(RawWhen {
        year: c[1].parse().unwrap_or(0),
        month: capture_u32(&c, 2),
        day: capture_u32(&c, 3),
        start_hour: capture_u32(&c, 4),
        start_minute: capture_u32(&c, 5),
        end: None,
    })
}

// Priority order is a contract: the structured template wins over the
// legacy forms when both happen to match.
const SCHEDULE_PATTERNS: &[fn(&str) -> Option<RawWhen>] =
    &[primary, legacy_booking, legacy_cancellation];

fn customer_name(body: &str) -> String {
    for c in NAME_LINE.captures_iter(body) {
        let name = c[1].trim();
        // The お客様名 label line also ends in 様; leave it to the label
        // pattern below.
        if name.is_empty() || name.starts_with("お客") {
            continue;
        }
        return name.to_string();
    }
    if let Some(c) = NAME_LABEL.captures(body) {
        let name = c[1].trim();
        if !name.is_empty() {
            return name.to_string();
        }
    }
    "N/A".to_string()
}

fn is_cancellation(body: &str) -> bool {
    body.contains("キャンセル") || body.to_lowercase().contains("cancel")
}

/// Turn one raw message into a structured event, or report why it was
/// skipped. Pure aside from the classifier's logging; the same text always
/// produces the same result.
pub fn extract(message: &RawMessage, registry: &StoreRegistry) -> Result<Extraction, ExtractError> {
    if !registry.mentions_any(&message.body) {
        return Ok(Extraction::NotApplicable);
    }
    let Some(classification) = classify(&message.subject, &message.body, registry) else {
        return Ok(Extraction::OtherStore);
    };
    let Some(profile) = registry.get(classification.store) else {
        return Ok(Extraction::OtherStore);
    };

    let Some(raw) = SCHEDULE_PATTERNS.iter().find_map(|p| p(&message.body)) else {
        return Ok(Extraction::NoSchedule);
    };
    let when = raw.build()?;

    let action = if is_cancellation(&message.body) {
        ActionType::Cancellation
    } else {
        ActionType::Booking
    };
    let is_charter = message.body.contains("貸切");
    let room = profile.extract_room(&message.body);

    Ok(Extraction::Event(NotificationEvent {
        store: profile.id,
        customer_name: customer_name(&message.body),
        slot_date: when.date,
        start_time: when.start,
        end_time: when.end,
        room,
        is_charter,
        action,
        received_at: message.received_at,
        source_id: message.id.clone(),
        source_subject: message.subject.clone(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn message(body: &str) -> RawMessage {
        RawMessage {
            id: "m1".to_string(),
            subject: "ご予約内容の確認".to_string(),
            body: body.to_string(),
            received_at: Utc.with_ymd_and_hms(2025, 8, 1, 9, 0, 0).unwrap(),
        }
    }

    fn registry() -> StoreRegistry {
        StoreRegistry::with_defaults()
    }

    fn event(body: &str) -> NotificationEvent {
        match extract(&message(body), &registry()).unwrap() {
            Extraction::Event(e) => e,
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn primary_template_booking() {
        let e = event(
            "田中太郎様\n店舗：HALLEL 半蔵門店\n設備： 半蔵門店 STUDIO B ② (1)\n日時： 2025年8月5日(火) 9:00〜10:30\n\n\n",
        );
        assert_eq!(e.store, crate::store::StoreId::Hanzomon);
        assert_eq!(e.customer_name, "田中太郎");
        assert_eq!(e.slot_date, NaiveDate::from_ymd_opt(2025, 8, 5).unwrap());
        assert_eq!(e.start_time, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_eq!(e.end_time, NaiveTime::from_hms_opt(10, 30, 0));
        assert_eq!(e.room, "STUDIO B ②");
        assert_eq!(e.action, ActionType::Booking);
        assert!(!e.is_charter);
    }

    #[test]
    fn body_without_any_store_is_not_applicable() {
        let text = "予約：2025-08-05 14:00-15:30\nお客様名: 田中太郎";
        assert_eq!(
            extract(&message(text), &registry()).unwrap(),
            Extraction::NotApplicable
        );
    }

    #[test]
    fn legacy_booking_template_with_store_keyword() {
        let e = event("渋谷店\n予約：2025-08-05 14:00-15:30\nお客様名: 田中太郎");
        assert_eq!(e.action, ActionType::Booking);
        assert_eq!(e.customer_name, "田中太郎");
        assert_eq!(e.slot_date, NaiveDate::from_ymd_opt(2025, 8, 5).unwrap());
        assert_eq!(e.start_time, NaiveTime::from_hms_opt(14, 0, 0).unwrap());
        assert_eq!(e.end_time, NaiveTime::from_hms_opt(15, 30, 0));
    }

    #[test]
    fn legacy_cancellation_has_no_end_time() {
        let e = event("渋谷店\nキャンセル：2025-08-05 14:00");
        assert_eq!(e.action, ActionType::Cancellation);
        assert_eq!(e.start_time, NaiveTime::from_hms_opt(14, 0, 0).unwrap());
        assert_eq!(e.end_time, None);
        assert_eq!(e.customer_name, "N/A");
    }

    #[test]
    fn cancellation_keyword_overrides_matched_pattern() {
        // Structured template plus a cancellation notice in the same body.
        let e = event(
            "田中太郎様\n店舗：HALLEL 恵比寿店\n日時： 2025年8月5日(火) 14:00〜15:30\nご予約のキャンセルを受け付けました\n\n\n",
        );
        assert_eq!(e.action, ActionType::Cancellation);
    }

    #[test]
    fn english_cancel_keyword_is_case_insensitive() {
        let e = event("渋谷店\n予約：2025-08-05 14:00-15:30\nStatus: CANCELLED");
        assert_eq!(e.action, ActionType::Cancellation);
    }

    #[test]
    fn charter_flag_from_body() {
        let e = event(
            "田中太郎様\n店舗：HALLEL 半蔵門店\n日時： 2025年8月5日(火) 14:00〜15:30\n【貸切】でのご利用\n\n\n",
        );
        assert!(e.is_charter);
    }

    #[test]
    fn matched_pattern_with_impossible_date_is_an_error() {
        let err = extract(
            &message("渋谷店\n予約：2025-02-31 14:00-15:30"),
            &registry(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ExtractError::InvalidDate {
                year: 2025,
                month: 2,
                day: 31
            }
        );
    }

    #[test]
    fn classified_body_without_schedule_is_skipped() {
        let text = "店舗：HALLEL 渋谷店\nキャンペーンのお知らせ\n\n";
        assert_eq!(
            extract(&message(text), &registry()).unwrap(),
            Extraction::NoSchedule
        );
    }

    #[test]
    fn name_label_fallback() {
        let e = event("渋谷店\n予約：2025-08-05 14:00-15:30\nお客様名： 佐藤花子");
        assert_eq!(e.customer_name, "佐藤花子");
    }

    #[test]
    fn primary_template_zero_pads_single_digit_hours() {
        let e = event("店舗：HALLEL 恵比寿店\n日時： 2025年8月5日(火) 9:00〜10:00\n\n");
        assert_eq!(e.start_time.format("%H:%M").to_string(), "09:00");
    }
}
