use chrono::{DateTime, Timelike, Utc};

use crate::limits::{MAX_VALID_TIMESTAMP_MS, MIN_VALID_TIMESTAMP_MS};
use crate::model::{SlotId, Span, TutorState};

use super::EngineError;

pub(crate) fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Creation-time checks on a slot start instant, applied on the UTC frame:
/// timestamp range, 30-minute alignment with zero seconds, strictly future.
///
/// The future check happens at validation time; the gap until the WAL append
/// lands is an accepted race window, not re-checked at persistence.
pub(crate) fn validate_start(
    start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    let ms = start.timestamp_millis();
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&ms) {
        return Err(EngineError::LimitExceeded("start timestamp out of range"));
    }
    if start.minute() % 30 != 0 || start.second() != 0 || start.nanosecond() != 0 {
        return Err(EngineError::InvalidInterval(
            "start must sit on a 30-minute boundary",
        ));
    }
    if start <= now {
        return Err(EngineError::InvalidInterval("start is not in the future"));
    }
    Ok(())
}

/// Reject the candidate span if any of the tutor's other slots intersects it.
/// `exclude` skips the candidate's own identity so re-validation is a no-op.
pub(crate) fn check_no_overlap(
    state: &TutorState,
    span: &Span,
    exclude: Option<SlotId>,
) -> Result<(), EngineError> {
    for slot in state.overlapping(span) {
        if exclude == Some(slot.id) {
            continue;
        }
        return Err(EngineError::Conflict(slot.id));
    }
    Ok(())
}
