use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

// ── Identity ─────────────────────────────────────────────────────

/// Opaque tutor identity supplied by the auth collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TutorId(pub Ulid);

/// Opaque student identity supplied by the auth collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StudentId(pub Ulid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotId(pub Ulid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReservationId(pub Ulid);

impl std::fmt::Display for TutorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for StudentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for ReservationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Role tag attached to an actor by the auth collaborator. The engine trusts
/// this input and never re-derives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Tutor,
    Student,
}

/// An authenticated caller: opaque id plus role tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Ulid,
    pub role: Role,
}

// ── Time model ───────────────────────────────────────────────────

/// Legal slot lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotDuration {
    Min30,
    Min60,
}

impl SlotDuration {
    pub fn minutes(self) -> i64 {
        match self {
            SlotDuration::Min30 => 30,
            SlotDuration::Min60 => 60,
        }
    }

    pub fn as_duration(self) -> Duration {
        Duration::minutes(self.minutes())
    }

    pub fn from_minutes(minutes: i64) -> Option<Self> {
        match minutes {
            30 => Some(SlotDuration::Min30),
            60 => Some(SlotDuration::Min60),
            _ => None,
        }
    }
}

/// Half-open interval `[start, end)` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Span {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end
    }
}

// ── Slots and reservations ───────────────────────────────────────

/// A student's claim on exactly one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub id: ReservationId,
    pub student: StudentId,
    pub created_at: DateTime<Utc>,
}

/// A tutor-owned bookable interval. `booked` is not a field: it is derived
/// from `reservation`, so the flag can never drift from the relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub id: SlotId,
    pub tutor: TutorId,
    pub start: DateTime<Utc>,
    pub duration: SlotDuration,
    pub reservation: Option<Reservation>,
}

impl Slot {
    pub fn end(&self) -> DateTime<Utc> {
        self.start + self.duration.as_duration()
    }

    pub fn span(&self) -> Span {
        Span::new(self.start, self.end())
    }

    pub fn is_booked(&self) -> bool {
        self.reservation.is_some()
    }
}

/// All of one tutor's slots. The per-tutor lock around this struct is the
/// atomicity unit for every mutation touching the tutor's calendar.
#[derive(Debug, Clone)]
pub struct TutorState {
    pub id: TutorId,
    /// Sorted by `start`; starts are unique per tutor.
    pub slots: Vec<Slot>,
}

impl TutorState {
    pub fn new(id: TutorId) -> Self {
        Self { id, slots: Vec::new() }
    }

    /// Insert slot maintaining sort order by start.
    pub fn insert_slot(&mut self, slot: Slot) {
        let pos = self
            .slots
            .binary_search_by_key(&slot.start, |s| s.start)
            .unwrap_or_else(|e| e);
        self.slots.insert(pos, slot);
    }

    pub fn remove_slot(&mut self, id: SlotId) -> Option<Slot> {
        if let Some(pos) = self.slots.iter().position(|s| s.id == id) {
            Some(self.slots.remove(pos))
        } else {
            None
        }
    }

    pub fn find_slot(&self, id: &SlotId) -> Option<&Slot> {
        self.slots.iter().find(|s| s.id == *id)
    }

    pub fn find_slot_mut(&mut self, id: &SlotId) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|s| s.id == *id)
    }

    /// Exact-start lookup; starts are unique per tutor so at most one hit.
    pub fn slot_at(&self, start: DateTime<Utc>) -> Option<&Slot> {
        self.slots
            .binary_search_by_key(&start, |s| s.start)
            .ok()
            .map(|pos| &self.slots[pos])
    }

    /// Return only slots whose span overlaps the query window.
    /// Uses binary search to skip slots starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Slot> {
        // Everything at index >= right_bound starts at or after query.end → can't overlap.
        let right_bound = self.slots.partition_point(|s| s.start < query.end);
        self.slots[..right_bound]
            .iter()
            .filter(move |s| s.end() > query.start)
    }
}

// ── WAL record format ────────────────────────────────────────────

/// The event types — flat, no nesting. This is the WAL record format.
/// Every event carries its owning tutor so replay can route it to a shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SlotCreated {
        id: SlotId,
        tutor: TutorId,
        start: DateTime<Utc>,
        duration: SlotDuration,
    },
    SlotDeleted {
        id: SlotId,
        tutor: TutorId,
    },
    ReservationCreated {
        id: ReservationId,
        slot: SlotId,
        tutor: TutorId,
        student: StudentId,
        created_at: DateTime<Utc>,
    },
    ReservationCancelled {
        id: ReservationId,
        slot: SlotId,
        tutor: TutorId,
    },
}

impl Event {
    pub fn tutor(&self) -> TutorId {
        match self {
            Event::SlotCreated { tutor, .. }
            | Event::SlotDeleted { tutor, .. }
            | Event::ReservationCreated { tutor, .. }
            | Event::ReservationCancelled { tutor, .. } => *tutor,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub id: SlotId,
    pub tutor: TutorId,
    pub start: DateTime<Utc>,
    pub duration: SlotDuration,
    pub booked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationInfo {
    pub id: ReservationId,
    pub slot: SlotId,
    pub tutor: TutorId,
    pub start: DateTime<Utc>,
    pub duration: SlotDuration,
    pub created_at: DateTime<Utc>,
}
