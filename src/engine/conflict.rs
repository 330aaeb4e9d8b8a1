use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start >= span.end {
        return Err(EngineError::Validation("span start must be before end"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

pub(crate) fn validate_minutes(
    start_min: MinuteOfDay,
    end_min: MinuteOfDay,
) -> Result<(), EngineError> {
    if start_min >= end_min {
        return Err(EngineError::Validation("start time must be before end time"));
    }
    if end_min > 24 * 60 {
        return Err(EngineError::Validation("time of day out of range"));
    }
    Ok(())
}

/// Does the candidate span overlap any appointment still occupying the
/// calendar? Terminal statuses (completed, cancelled, no-show) release their
/// time range and are skipped. Pure check over the already-locked book.
pub(crate) fn find_appointment_conflict(book: &TutorBook, span: &Span) -> Option<Ulid> {
    book.appointments_overlapping(span)
        .find(|a| !a.status.is_terminal())
        .map(|a| a.id)
}

/// Does a proposed slot time range overlap any active slot on the same date?
/// Disabled slots no longer guard their range.
pub(crate) fn find_slot_collision(
    book: &TutorBook,
    date: chrono::NaiveDate,
    start_min: MinuteOfDay,
    end_min: MinuteOfDay,
) -> Option<Ulid> {
    book.slots
        .iter()
        .filter(|s| s.available && s.date == date)
        .find(|s| start_min < s.end_min && s.start_min < end_min)
        .map(|s| s.id)
}
