use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::model::*;
use crate::observability;

use super::availability::{filter_creatable, is_reservable};
use super::conflict::now_utc;
use super::grid::{day_grid, day_window, require_not_past};
use super::{Engine, EngineError, SharedTutorState};

impl Engine {
    pub fn display_tz(&self) -> Tz {
        self.display_tz
    }

    /// Convert a stored UTC instant into the configured display timezone.
    /// String formatting stays with the presentation boundary.
    pub fn in_display_tz(&self, t: DateTime<Utc>) -> DateTime<Tz> {
        t.with_timezone(&self.display_tz)
    }

    /// The tutor's own slots, sorted by start, with their booked state.
    pub async fn slots_for_tutor(&self, tutor: TutorId) -> Vec<SlotInfo> {
        let Some(shard) = self.get_tutor(&tutor) else {
            return Vec::new();
        };
        let guard = shard.read().await;
        guard
            .slots
            .iter()
            .map(|s| SlotInfo {
                id: s.id,
                tutor: s.tutor,
                start: s.start,
                duration: s.duration,
                booked: s.is_booked(),
            })
            .collect()
    }

    /// The student's reservations with their slot times, sorted by start.
    pub async fn reservations_for_student(&self, student: StudentId) -> Vec<ReservationInfo> {
        let mut out = Vec::new();
        for slot_id in self.student_held_slots(&student) {
            let Some(tutor) = self.owner_of_slot(&slot_id) else {
                continue;
            };
            let Some(shard) = self.get_tutor(&tutor) else {
                continue;
            };
            let guard = shard.read().await;
            if let Some(slot) = guard.find_slot(&slot_id)
                && let Some(res) = &slot.reservation
                && res.student == student {
                    out.push(ReservationInfo {
                        id: res.id,
                        slot: slot.id,
                        tutor: slot.tutor,
                        start: slot.start,
                        duration: slot.duration,
                        created_at: res.created_at,
                    });
                }
        }
        out.sort_by_key(|r| r.start);
        out
    }

    /// Tutor variant of availability: grid candidates for the day minus any
    /// whose interval would overlap one of the tutor's own slots starting
    /// that day. The survivors are instants the tutor could create at.
    pub async fn tutor_open_starts(
        &self,
        tutor: TutorId,
        day: NaiveDate,
        duration: SlotDuration,
    ) -> Result<Vec<DateTime<Utc>>, EngineError> {
        let tz = self.display_tz();
        let candidates = day_grid(day, duration, now_utc(), tz)?;
        let window = day_window(day, tz)?;

        let taken: Vec<Span> = match self.get_tutor(&tutor) {
            Some(shard) => {
                let guard = shard.read().await;
                guard
                    .slots
                    .iter()
                    .filter(|s| window.contains_instant(s.start))
                    .map(|s| s.span())
                    .collect()
            }
            None => Vec::new(),
        };

        metrics::counter!(observability::AVAILABILITY_QUERIES_TOTAL).increment(1);
        Ok(filter_creatable(candidates, duration, &taken))
    }

    /// Student variant of availability: every tutor's open slots for the day
    /// with the exact duration, minus any whose interval overlaps one of the
    /// requesting student's own reservations (across all tutors and dates).
    /// Deduplicated across tutors and sorted ascending.
    pub async fn student_open_starts(
        &self,
        student: StudentId,
        day: NaiveDate,
        duration: SlotDuration,
    ) -> Result<Vec<DateTime<Utc>>, EngineError> {
        let tz = self.display_tz();
        require_not_past(day, now_utc(), tz)?;
        let window = day_window(day, tz)?;
        let reserved = self.reserved_spans(student).await;

        let mut starts = Vec::new();
        for shard in self.all_tutor_shards() {
            let guard = shard.read().await;
            for slot in guard.slots.iter().filter(|s| window.contains_instant(s.start)) {
                if is_reservable(slot, duration, &reserved) {
                    starts.push(slot.start);
                }
            }
        }
        starts.sort();
        starts.dedup();

        metrics::counter!(observability::AVAILABILITY_QUERIES_TOTAL).increment(1);
        Ok(starts)
    }

    /// Role dispatch over the two named availability operations.
    pub async fn resolve_open_starts(
        &self,
        actor: Actor,
        day: NaiveDate,
        duration: SlotDuration,
    ) -> Result<Vec<DateTime<Utc>>, EngineError> {
        match actor.role {
            Role::Tutor => self.tutor_open_starts(TutorId(actor.id), day, duration).await,
            Role::Student => {
                self.student_open_starts(StudentId(actor.id), day, duration)
                    .await
            }
        }
    }

    /// The single-instant student query: concrete open slots at exactly
    /// `start` with `duration` that the student may reserve. Shares
    /// `is_reservable` with the day variant, so the two views always agree.
    pub async fn reservable_slots_at(
        &self,
        student: StudentId,
        start: DateTime<Utc>,
        duration: SlotDuration,
    ) -> Vec<SlotInfo> {
        let reserved = self.reserved_spans(student).await;

        let mut matches = Vec::new();
        for shard in self.all_tutor_shards() {
            let guard = shard.read().await;
            if let Some(slot) = guard.slot_at(start)
                && is_reservable(slot, duration, &reserved) {
                    matches.push(SlotInfo {
                        id: slot.id,
                        tutor: slot.tutor,
                        start: slot.start,
                        duration: slot.duration,
                        booked: false,
                    });
                }
        }
        matches.sort_by_key(|s| s.id);
        matches
    }

    /// Spans of every slot the student currently holds a reservation on.
    pub(super) async fn reserved_spans(&self, student: StudentId) -> Vec<Span> {
        let held = self.student_held_slots(&student);
        let mut spans = Vec::with_capacity(held.len());
        for slot_id in held {
            let Some(tutor) = self.owner_of_slot(&slot_id) else {
                continue;
            };
            let Some(shard) = self.get_tutor(&tutor) else {
                continue;
            };
            let guard = shard.read().await;
            if let Some(slot) = guard.find_slot(&slot_id) {
                spans.push(slot.span());
            }
        }
        spans
    }

    pub(super) fn student_held_slots(&self, student: &StudentId) -> Vec<SlotId> {
        self.student_slots
            .get(student)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// Snapshot the shard handles so no DashMap guard is held across awaits.
    fn all_tutor_shards(&self) -> Vec<SharedTutorState> {
        self.tutors.iter().map(|e| e.value().clone()).collect()
    }
}
