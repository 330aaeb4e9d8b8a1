use chrono::{Duration, NaiveDate};

use crate::model::*;

// ── Recurring-slot expansion ──────────────────────────────────────

/// How far a template expansion reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpansionWindow {
    /// `[start, start + 7 * weeks)` — a week count yields exactly that many
    /// occurrences of the weekday.
    Weeks(u32),
    /// Inclusive explicit end date.
    Until(NaiveDate),
}

/// Outcome of an expansion run. Zero new slots is reported explicitly so
/// callers can tell "already done" and "window too short" apart from failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expansion {
    Created(usize),
    NothingToCreate(NothingToCreate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NothingToCreate {
    /// Every candidate date already carries a slot at that start time.
    AlreadyPopulated,
    /// The window contains no occurrence of the weekday at all.
    EmptyWindow,
}

/// All occurrences of `weekday` (0 = Sunday) within the window, in order.
///
/// Advance a cursor from `start` to the first matching weekday, then step by
/// 7 days until the window is exhausted.
pub fn expansion_dates(weekday: u8, start: NaiveDate, window: ExpansionWindow) -> Vec<NaiveDate> {
    let offset = (7 + weekday as i64 - weekday_of(start) as i64) % 7;
    let mut cursor = start + Duration::days(offset);

    let mut dates = Vec::new();
    match window {
        ExpansionWindow::Weeks(weeks) => {
            let end_exclusive = start + Duration::days(7 * weeks as i64);
            while cursor < end_exclusive {
                dates.push(cursor);
                cursor = cursor + Duration::days(7);
            }
        }
        ExpansionWindow::Until(end) => {
            while cursor <= end {
                dates.push(cursor);
                cursor = cursor + Duration::days(7);
            }
        }
    }
    dates
}

/// Candidate dates that do not already carry a slot at the template's start
/// time. The availability flag is ignored on purpose: a disabled slot means
/// the time was booked, and re-materializing it would double-offer the hour.
pub fn filter_unpopulated(
    book: &TutorBook,
    dates: Vec<NaiveDate>,
    start_min: MinuteOfDay,
) -> Vec<NaiveDate> {
    dates
        .into_iter()
        .filter(|d| book.slot_at(*d, start_min).is_none())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    // ── expansion_dates ──────────────────────────────────

    #[test]
    fn four_weeks_from_matching_weekday() {
        // 2026-03-02 is a Monday
        let dates = expansion_dates(1, date(2026, 3, 2), ExpansionWindow::Weeks(4));
        assert_eq!(
            dates,
            vec![
                date(2026, 3, 2),
                date(2026, 3, 9),
                date(2026, 3, 16),
                date(2026, 3, 23),
            ]
        );
    }

    #[test]
    fn cursor_advances_to_first_matching_weekday() {
        // Start on a Wednesday, expand Mondays
        let dates = expansion_dates(1, date(2026, 3, 4), ExpansionWindow::Weeks(2));
        assert_eq!(dates, vec![date(2026, 3, 9), date(2026, 3, 16)]);
    }

    #[test]
    fn explicit_end_date_is_inclusive() {
        let dates = expansion_dates(
            1,
            date(2026, 3, 2),
            ExpansionWindow::Until(date(2026, 3, 16)),
        );
        assert_eq!(
            dates,
            vec![date(2026, 3, 2), date(2026, 3, 9), date(2026, 3, 16)]
        );
    }

    #[test]
    fn end_date_before_first_occurrence_is_empty() {
        // Start Tuesday, want Monday, window ends before next Monday
        let dates = expansion_dates(
            1,
            date(2026, 3, 3),
            ExpansionWindow::Until(date(2026, 3, 8)),
        );
        assert!(dates.is_empty());
    }

    #[test]
    fn zero_weeks_is_empty() {
        let dates = expansion_dates(1, date(2026, 3, 2), ExpansionWindow::Weeks(0));
        assert!(dates.is_empty());
    }

    #[test]
    fn sunday_weekday_zero() {
        let dates = expansion_dates(0, date(2026, 3, 2), ExpansionWindow::Weeks(1));
        // First Sunday on or after Monday 2026-03-02 is 2026-03-08, but the
        // one-week window [03-02, 03-09) still contains it.
        assert_eq!(dates, vec![date(2026, 3, 8)]);
    }

    // ── filter_unpopulated ───────────────────────────────

    fn slot(tutor: Ulid, d: NaiveDate, start_min: MinuteOfDay, available: bool) -> Slot {
        Slot {
            id: Ulid::new(),
            tutor_id: tutor,
            date: d,
            start_min,
            end_min: start_min + 60,
            available,
            origin: SlotOrigin::OneOff,
        }
    }

    #[test]
    fn populated_dates_are_dropped() {
        let tutor = Ulid::new();
        let mut book = TutorBook::new(tutor);
        book.insert_slot(slot(tutor, date(2026, 3, 9), 540, true));

        let dates = vec![date(2026, 3, 2), date(2026, 3, 9), date(2026, 3, 16)];
        let fresh = filter_unpopulated(&book, dates, 540);
        assert_eq!(fresh, vec![date(2026, 3, 2), date(2026, 3, 16)]);
    }

    #[test]
    fn disabled_slot_still_blocks_rematerialization() {
        let tutor = Ulid::new();
        let mut book = TutorBook::new(tutor);
        book.insert_slot(slot(tutor, date(2026, 3, 2), 540, false));

        let fresh = filter_unpopulated(&book, vec![date(2026, 3, 2)], 540);
        assert!(fresh.is_empty());
    }

    #[test]
    fn different_start_time_does_not_block() {
        let tutor = Ulid::new();
        let mut book = TutorBook::new(tutor);
        book.insert_slot(slot(tutor, date(2026, 3, 2), 540, true));

        let fresh = filter_unpopulated(&book, vec![date(2026, 3, 2)], 600);
        assert_eq!(fresh, vec![date(2026, 3, 2)]);
    }
}
