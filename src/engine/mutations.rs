use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_no_overlap, now_utc, validate_start};
use super::{Engine, EngineError};

impl Engine {
    /// Publish a new slot on the tutor's calendar.
    ///
    /// The duplicate-start check and the overlap check both run under the
    /// tutor's write lock, so two concurrent creations for intersecting
    /// intervals serialize and the loser gets `Conflict`.
    pub async fn create_slot(
        &self,
        tutor: TutorId,
        start: DateTime<Utc>,
        duration: SlotDuration,
    ) -> Result<SlotId, EngineError> {
        validate_start(start, now_utc())?;

        let shard = self.tutor_state(tutor);
        let mut guard = shard.write().await;
        if guard.slots.len() >= MAX_SLOTS_PER_TUTOR {
            return Err(EngineError::LimitExceeded("too many slots for tutor"));
        }

        // Duplicate (tutor, start) is the uniqueness arbiter, checked before
        // the wider overlap scan so the error names the exact clash.
        if let Some(existing) = guard.slot_at(start) {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::Conflict(existing.id));
        }
        let span = Span::new(start, start + duration.as_duration());
        if let Err(e) = check_no_overlap(&guard, &span, None) {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let id = SlotId(Ulid::new());
        let event = Event::SlotCreated { id, tutor, start, duration };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(observability::SLOTS_CREATED_TOTAL).increment(1);
        Ok(id)
    }

    /// Remove an open slot. Only the owning tutor may delete, and a booked
    /// slot is protected: the slot and its reservation survive the attempt.
    pub async fn delete_slot(&self, tutor: TutorId, slot: SlotId) -> Result<(), EngineError> {
        let (owner, mut guard) = self.lock_slot_owner(&slot).await?;
        let existing = guard
            .find_slot(&slot)
            .ok_or(EngineError::NotFound(slot.0))?;
        if existing.tutor != tutor {
            return Err(EngineError::Forbidden);
        }
        // Re-checked inside the critical section: a reservation may have
        // landed between the caller's read and this lock.
        if existing.reservation.is_some() {
            return Err(EngineError::HasActiveBooking(slot));
        }

        let event = Event::SlotDeleted { id: slot, tutor: owner };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(observability::SLOTS_DELETED_TOTAL).increment(1);
        Ok(())
    }

    /// Reserve an open slot for a student. Exactly one of two racing calls
    /// wins; the other observes the reservation and gets `AlreadyBooked`.
    /// The slot's booked state flips in the same atomic unit that creates
    /// the reservation.
    pub async fn reserve_slot(
        &self,
        student: StudentId,
        slot: SlotId,
    ) -> Result<ReservationId, EngineError> {
        let (owner, mut guard) = self.lock_slot_owner(&slot).await?;
        {
            let existing = guard
                .find_slot(&slot)
                .ok_or(EngineError::NotFound(slot.0))?;
            if existing.reservation.is_some() {
                metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
                return Err(EngineError::AlreadyBooked(slot));
            }
        }
        if self
            .student_held_slots(&student)
            .len()
            >= MAX_RESERVATIONS_PER_STUDENT
        {
            return Err(EngineError::LimitExceeded("too many reservations for student"));
        }

        let id = ReservationId(Ulid::new());
        let event = Event::ReservationCreated {
            id,
            slot,
            tutor: owner,
            student,
            created_at: now_utc(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        Ok(id)
    }

    /// Cancel a reservation. Only the student holding it may cancel; the
    /// slot reverts to open in the same atomic unit that removes the
    /// reservation.
    pub async fn cancel_reservation(
        &self,
        student: StudentId,
        reservation: ReservationId,
    ) -> Result<SlotId, EngineError> {
        let slot = self
            .slot_of_reservation(&reservation)
            .ok_or(EngineError::NotFound(reservation.0))?;
        let (owner, mut guard) = self.lock_slot_owner(&slot).await?;
        // Re-resolve under the lock: the reservation may have been cancelled
        // (or the slot deleted) since the index lookup.
        match guard.find_slot(&slot).and_then(|s| s.reservation.as_ref()) {
            Some(held) if held.id == reservation => {
                if held.student != student {
                    return Err(EngineError::Forbidden);
                }
            }
            _ => return Err(EngineError::NotFound(reservation.0)),
        }

        let event = Event::ReservationCancelled { id: reservation, slot, tutor: owner };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(observability::RESERVATIONS_CANCELLED_TOTAL).increment(1);
        Ok(slot)
    }
}
