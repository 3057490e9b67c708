//! Blocked-range aware availability.
//!
//! A declared slot is dropped as a whole when any block on the same date
//! overlaps it. The free remainder of a partially blocked slot is not offered.

use crate::{
    backend::BookingBackend,
    error::BookingError,
    types::{hhmm, DayOfWeek, TimeBlock, TimeRange, WeeklyAvailability},
};
use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

pub const DEFAULT_WINDOW_DAYS: u32 = 14;
pub const MAX_SLOTS: usize = 3;

/// Half-open interval overlap.
pub fn ranges_overlap(a: &TimeRange, b: &TimeRange) -> bool {
    a.start < b.end && a.end > b.start
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableSlot {
    pub date: NaiveDate,
    pub day: DayOfWeek,
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
    pub is_preferred_day: bool,
}

impl AvailableSlot {
    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.start, self.end)
    }
}

pub fn compute_available_slots(
    availability: &WeeklyAvailability,
    blocks: &[TimeBlock],
    window_start: NaiveDate,
    preferred_date: Option<NaiveDate>,
    window_days: u32,
    now: NaiveDateTime,
) -> Vec<AvailableSlot> {
    let mut blocks_by_date: HashMap<NaiveDate, Vec<TimeRange>> = HashMap::new();
    for block in blocks {
        blocks_by_date
            .entry(block.blocked_date)
            .or_default()
            .push(block.range());
    }

    let mut slots = Vec::new();
    for offset in 0..window_days {
        let Some(date) = window_start.checked_add_days(Days::new(u64::from(offset))) else {
            break;
        };
        let blocked = blocks_by_date.get(&date).map(Vec::as_slice).unwrap_or_default();
        let day = DayOfWeek::from(date.weekday());

        for slot in availability.slots_on(day) {
            if slot.is_empty() || date.and_time(slot.start) <= now {
                continue;
            }
            if blocked.iter().any(|block| ranges_overlap(slot, block)) {
                debug!(%date, start = %slot.start, "Slot overlaps a block");
                continue;
            }
            slots.push(AvailableSlot {
                date,
                day,
                start: slot.start,
                end: slot.end,
                is_preferred_day: Some(date) == preferred_date,
            });
        }
    }

    slots.sort_by(|a, b| {
        b.is_preferred_day
            .cmp(&a.is_preferred_day)
            .then(a.date.cmp(&b.date))
            .then(a.start.cmp(&b.start))
    });
    slots.truncate(MAX_SLOTS);
    slots
}

/// Open slots of an interviewer, after sweeping expired temporary holds.
///
/// The window starts at the preferred date, or today when that date is absent
/// or already past.
pub fn available_slots<T: BookingBackend>(
    backend: &T,
    interviewer_id: Uuid,
    preferred_date: Option<NaiveDate>,
    window_days: u32,
    now: DateTime<Utc>,
) -> Result<Vec<AvailableSlot>, BookingError> {
    let interviewer = backend.interviewer(interviewer_id)?;
    sweep_expired_holds(backend, now)?;

    let today = now.date_naive();
    let window_start = preferred_date.map_or(today, |preferred| preferred.max(today));
    let window_end = window_start
        .checked_add_days(Days::new(u64::from(window_days)))
        .unwrap_or(NaiveDate::MAX);
    let blocks = backend.time_blocks(interviewer_id, window_start, window_end)?;

    Ok(compute_available_slots(
        &interviewer.availability,
        &blocks,
        window_start,
        preferred_date,
        window_days,
        now.naive_utc(),
    ))
}

/// Fails with a conflict when the range overlaps any live block on that date.
pub fn ensure_range_free<T: BookingBackend>(
    backend: &T,
    interviewer_id: Uuid,
    date: NaiveDate,
    range: &TimeRange,
    now: DateTime<Utc>,
) -> Result<(), BookingError> {
    sweep_expired_holds(backend, now)?;
    let blocks = backend.time_blocks(interviewer_id, date, date)?;
    if blocks
        .iter()
        .any(|block| block.blocked_date == date && ranges_overlap(range, &block.range()))
    {
        return Err(BookingError::Conflict(format!(
            "Interviewer is not available on {date} from {} to {}",
            range.start.format("%H:%M"),
            range.end.format("%H:%M")
        )));
    }
    Ok(())
}

fn sweep_expired_holds<T: BookingBackend>(
    backend: &T,
    now: DateTime<Utc>,
) -> Result<(), BookingError> {
    let removed = backend.remove_expired_blocks(now)?;
    if removed > 0 {
        info!(removed, "Removed expired temporary holds");
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        local_backend::LocalBackend,
        testutils::{date, interviewer, time},
        types::BlockReason,
    };
    use chrono::{Duration, TimeZone};

    fn range(start: (u32, u32), end: (u32, u32)) -> TimeRange {
        TimeRange::new(time(start.0, start.1), time(end.0, end.1))
    }

    fn block(interviewer_id: Uuid, on: NaiveDate, range: TimeRange) -> TimeBlock {
        TimeBlock::new(interviewer_id, on, range, BlockReason::Manual, None)
    }

    fn long_ago() -> NaiveDateTime {
        date(2000, 1, 1).and_time(time(0, 0))
    }

    #[test_case::test_case((9, 0), (10, 0), (9, 30), (9, 45), true ; "contained")]
    #[test_case::test_case((9, 0), (10, 0), (9, 59), (11, 0), true ; "partial")]
    #[test_case::test_case((9, 0), (10, 0), (10, 0), (11, 0), false ; "touching")]
    #[test_case::test_case((9, 0), (10, 0), (12, 0), (13, 0), false ; "disjoint")]
    fn test_ranges_overlap(
        a_start: (u32, u32),
        a_end: (u32, u32),
        b_start: (u32, u32),
        b_end: (u32, u32),
        expected: bool,
    ) {
        let a = range(a_start, a_end);
        let b = range(b_start, b_end);
        assert_eq!(ranges_overlap(&a, &b), expected);
        assert_eq!(ranges_overlap(&b, &a), expected);
    }

    #[test]
    fn test_overlap_is_symmetric_and_reflexive() {
        let ranges: Vec<TimeRange> = (8..12)
            .flat_map(|start| (start + 1..14).map(move |end| range((start, 0), (end, 0))))
            .collect();

        for a in &ranges {
            assert!(ranges_overlap(a, a));
            for b in &ranges {
                assert_eq!(ranges_overlap(a, b), ranges_overlap(b, a));
            }
        }
    }

    #[test]
    fn test_partially_blocked_slot_is_excluded_entirely() {
        let interviewer_id = Uuid::new_v4();
        let monday = date(2030, 1, 7);
        let availability = WeeklyAvailability::default()
            .with_day(DayOfWeek::Monday, vec![range((9, 0), (10, 0))]);
        let blocks = vec![block(interviewer_id, monday, range((9, 30), (9, 45)))];

        let slots = compute_available_slots(&availability, &blocks, monday, None, 1, long_ago());
        assert!(slots.is_empty());
    }

    #[test]
    fn test_blocks_only_apply_to_their_date() {
        let interviewer_id = Uuid::new_v4();
        let monday = date(2030, 1, 7);
        let availability = WeeklyAvailability::default()
            .with_day(DayOfWeek::Monday, vec![range((9, 0), (10, 0))]);
        let blocks = vec![block(interviewer_id, monday, range((9, 0), (10, 0)))];

        let slots = compute_available_slots(&availability, &blocks, monday, None, 14, long_ago());
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].date, date(2030, 1, 14));
    }

    #[test]
    fn test_at_most_three_slots_without_overlaps() {
        let interviewer_id = Uuid::new_v4();
        let monday = date(2030, 1, 7);
        let daily = vec![range((9, 0), (10, 0)), range((13, 0), (14, 0))];
        let availability = WeeklyAvailability::default()
            .with_day(DayOfWeek::Monday, daily.clone())
            .with_day(DayOfWeek::Tuesday, daily.clone())
            .with_day(DayOfWeek::Wednesday, daily);
        let blocks = vec![
            block(interviewer_id, monday, range((8, 30), (9, 15))),
            block(interviewer_id, date(2030, 1, 8), range((13, 30), (15, 0))),
        ];

        let slots = compute_available_slots(&availability, &blocks, monday, None, 14, long_ago());
        assert_eq!(slots.len(), MAX_SLOTS);
        for slot in &slots {
            assert!(!blocks
                .iter()
                .any(|block| block.blocked_date == slot.date
                    && ranges_overlap(&slot.range(), &block.range())));
        }
        assert_eq!(
            slots
                .iter()
                .map(|slot| (slot.date, slot.start))
                .collect::<Vec<_>>(),
            vec![
                (monday, time(13, 0)),
                (date(2030, 1, 8), time(9, 0)),
                (date(2030, 1, 9), time(9, 0)),
            ]
        );
    }

    #[test]
    fn test_preferred_day_sorts_first() {
        let monday = date(2030, 1, 7);
        let availability = WeeklyAvailability::default()
            .with_day(DayOfWeek::Monday, vec![range((9, 0), (10, 0))])
            .with_day(DayOfWeek::Thursday, vec![range((15, 0), (16, 0)), range((8, 0), (9, 0))]);

        let slots = compute_available_slots(
            &availability,
            &[],
            monday,
            Some(date(2030, 1, 10)),
            7,
            long_ago(),
        );
        assert_eq!(slots.len(), 3);
        assert!(slots[0].is_preferred_day);
        assert_eq!(slots[0].start, time(8, 0));
        assert!(slots[1].is_preferred_day);
        assert_eq!(slots[1].start, time(15, 0));
        assert_eq!(slots[2].date, monday);
    }

    #[test]
    fn test_past_slots_are_skipped() {
        let monday = date(2030, 1, 7);
        let availability = WeeklyAvailability::default()
            .with_day(DayOfWeek::Monday, vec![range((9, 0), (10, 0)), range((16, 0), (17, 0))]);

        let now = monday.and_time(time(12, 0));
        let slots = compute_available_slots(&availability, &[], monday, None, 1, now);
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].start, time(16, 0));
    }

    #[test]
    fn test_available_slots_sweeps_expired_holds() {
        let backend = LocalBackend::default();
        let profile = interviewer(
            "Ada",
            &["rust"],
            WeeklyAvailability::default()
                .with_day(DayOfWeek::Monday, vec![range((9, 0), (10, 0))]),
        );
        backend.insert_interviewer(profile.clone());

        let monday = date(2030, 1, 7);
        let now = Utc.with_ymd_and_hms(2030, 1, 1, 8, 0, 0).unwrap();
        let expired_hold = TimeBlock::new(
            profile.id,
            monday,
            range((9, 0), (10, 0)),
            BlockReason::TemporaryHold,
            Some(now - Duration::minutes(1)),
        );
        backend.add_time_block(expired_hold).unwrap();

        let slots = available_slots(&backend, profile.id, Some(monday), 1, now).unwrap();
        assert_eq!(slots.len(), 1);
        assert!(slots[0].is_preferred_day);
        assert!(backend
            .time_blocks(profile.id, monday, monday)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_past_preferred_date_starts_window_today() {
        let backend = LocalBackend::default();
        let profile = interviewer(
            "Ada",
            &["rust"],
            WeeklyAvailability::default()
                .with_day(DayOfWeek::Monday, vec![range((9, 0), (10, 0))]),
        );
        backend.insert_interviewer(profile.clone());

        // Wednesday, two days after the preferred Monday
        let now = Utc.with_ymd_and_hms(2030, 1, 9, 8, 0, 0).unwrap();
        let slots = available_slots(&backend, profile.id, Some(date(2030, 1, 7)), 7, now).unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].date, date(2030, 1, 14));
        assert!(!slots[0].is_preferred_day);
    }

    #[test]
    fn test_ensure_range_free() {
        let backend = LocalBackend::default();
        let interviewer_id = Uuid::new_v4();
        let monday = date(2030, 1, 7);
        backend
            .add_time_block(block(interviewer_id, monday, range((9, 0), (10, 0))))
            .unwrap();

        let now = Utc::now();
        ensure_range_free(&backend, interviewer_id, monday, &range((9, 30), (10, 30)), now)
            .unwrap_err();
        ensure_range_free(&backend, interviewer_id, monday, &range((10, 0), (11, 0)), now)
            .unwrap();
        ensure_range_free(&backend, Uuid::new_v4(), monday, &range((9, 0), (10, 0)), now)
            .unwrap();
    }

    #[test]
    fn test_unknown_interviewer() {
        let backend = LocalBackend::default();
        let result = available_slots(&backend, Uuid::new_v4(), None, 14, Utc::now());
        assert!(matches!(result, Err(BookingError::NotFound(_))));
    }
}
