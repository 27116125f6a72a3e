use chrono::NaiveDateTime;

/// An already-materialized booking in the sink, as far as capacity counting
/// is concerned.
#[derive(Debug, Clone, PartialEq)]
pub struct ExistingBooking {
    /// Sink-side handle, e.g. the calendar event title. Surfaced verbatim
    /// in rejection reports so operators can see what is occupying the
    /// window.
    pub reference: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Admitted,
    Rejected(CapacityRejection),
}

/// Explicit capacity-exceeded outcome. Never silently dropped; the runner
/// carries these into the invocation summary.
#[derive(Debug, Clone, PartialEq)]
pub struct CapacityRejection {
    pub current: u32,
    pub max: u32,
    pub existing: Vec<String>,
}

/// Half-open interval overlap, so back-to-back bookings never conflict.
pub fn overlaps(s1: NaiveDateTime, e1: NaiveDateTime, s2: NaiveDateTime, e2: NaiveDateTime) -> bool {
    s1 < e2 && s2 < e1
}

/// Decide whether a booking may occupy `[start, end)` given the bookings
/// already holding the window. Rooms are fungible here; the ceiling counts
/// concurrent bookings regardless of nominal room assignment. Callers must
/// have removed the customer's own prior materializations first, so a
/// re-booking never collides with itself. Stores without a ceiling pass
/// everything through.
pub fn admit(
    start: NaiveDateTime,
    end: NaiveDateTime,
    existing: &[ExistingBooking],
    max_slots: Option<u32>,
) -> Admission {
    let Some(max) = max_slots else {
        return Admission::Admitted;
    };
    let overlapping: Vec<&ExistingBooking> = existing
        .iter()
        .filter(|b| overlaps(start, end, b.start, b.end))
        .collect();
    let current = overlapping.len() as u32;
    if current >= max {
        Admission::Rejected(CapacityRejection {
            current,
            max,
            existing: overlapping.iter().map(|b| b.reference.clone()).collect(),
        })
    } else {
        Admission::Admitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 8, 5)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn booking(reference: &str, start: NaiveDateTime, end: NaiveDateTime) -> ExistingBooking {
        ExistingBooking {
            reference: reference.to_string(),
            start,
            end,
        }
    }

    #[test]
    fn back_to_back_bookings_do_not_conflict() {
        assert!(!overlaps(at(10, 0), at(11, 0), at(11, 0), at(12, 0)));
        assert!(overlaps(at(10, 0), at(11, 0), at(10, 30), at(11, 30)));
    }

    #[test]
    fn third_overlapping_booking_is_rejected_at_max_two() {
        let existing = vec![
            booking("田中太郎 - HALLEL-STUDIO A", at(10, 0), at(11, 0)),
            booking("佐藤花子 - HALLEL-STUDIO B", at(10, 0), at(11, 0)),
        ];
        match admit(at(10, 0), at(11, 0), &existing, Some(2)) {
            Admission::Rejected(r) => {
                assert_eq!(r.current, 2);
                assert_eq!(r.max, 2);
                assert_eq!(r.existing.len(), 2);
            }
            Admission::Admitted => panic!("expected rejection"),
        }
    }

    #[test]
    fn non_overlapping_bookings_do_not_count() {
        let existing = vec![
            booking("a", at(8, 0), at(9, 0)),
            booking("b", at(9, 0), at(10, 0)),
        ];
        assert_eq!(
            admit(at(10, 0), at(11, 0), &existing, Some(1)),
            Admission::Admitted
        );
    }

    #[test]
    fn no_ceiling_means_pass_through() {
        let existing: Vec<ExistingBooking> = (0..20)
            .map(|i| booking(&format!("b{i}"), at(10, 0), at(11, 0)))
            .collect();
        assert_eq!(admit(at(10, 0), at(11, 0), &existing, None), Admission::Admitted);
    }
}
