use ulid::Ulid;

use crate::model::SlotId;

#[derive(Debug)]
pub enum EngineError {
    /// Bad start alignment or a start that is not in the future.
    InvalidInterval(&'static str),
    /// Requested day lies strictly before today.
    InvalidDate,
    /// Overlapping slot or duplicate `(tutor, start)`; carries the clashing slot.
    Conflict(SlotId),
    /// The slot already holds a reservation.
    AlreadyBooked(SlotId),
    /// The slot cannot be deleted while a reservation exists.
    HasActiveBooking(SlotId),
    /// Referenced slot or reservation does not exist.
    NotFound(Ulid),
    /// Actor is not the owning tutor / reserving student.
    Forbidden,
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidInterval(msg) => write!(f, "invalid interval: {msg}"),
            EngineError::InvalidDate => write!(f, "requested day is already past"),
            EngineError::Conflict(id) => write!(f, "conflict with slot: {id}"),
            EngineError::AlreadyBooked(id) => write!(f, "slot already booked: {id}"),
            EngineError::HasActiveBooking(id) => {
                write!(f, "cannot delete slot {id}: active booking exists")
            }
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::Forbidden => write!(f, "actor does not own the target"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
