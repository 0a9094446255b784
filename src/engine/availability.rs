use chrono::{DateTime, Utc};

use crate::model::{Slot, SlotDuration, Span};

// ── Availability filters ─────────────────────────────────────────
//
// Pure halves of the two resolver variants. The tutor variant filters grid
// candidates against the tutor's own calendar; the student variant decides,
// per concrete slot, whether the asking student may reserve it. The exact
// start-instant query reuses `is_reservable` unchanged so both student views
// agree on eligibility.

/// Keep grid candidates whose would-be interval intersects none of `taken`.
pub fn filter_creatable(
    candidates: Vec<DateTime<Utc>>,
    duration: SlotDuration,
    taken: &[Span],
) -> Vec<DateTime<Utc>> {
    candidates
        .into_iter()
        .filter(|start| {
            let span = Span::new(*start, *start + duration.as_duration());
            !taken.iter().any(|t| t.overlaps(&span))
        })
        .collect()
}

/// A student may reserve a slot iff it is open, has the requested duration,
/// and intersects none of the student's own reserved intervals.
pub fn is_reservable(slot: &Slot, duration: SlotDuration, reserved: &[Span]) -> bool {
    !slot.is_booked()
        && slot.duration == duration
        && !reserved.iter().any(|r| r.overlaps(&slot.span()))
}
