mod availability;
mod conflict;
mod error;
mod grid;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;

pub use availability::{filter_creatable, is_reservable};
pub use error::EngineError;
pub use grid::day_grid;

use std::io;
use std::sync::Arc;

use chrono_tz::Tz;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};

use crate::config::Config;
use crate::model::*;
use crate::wal::Wal;

pub type SharedTutorState = Arc<RwLock<TutorState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

/// Booking engine: per-tutor calendar shards plus secondary indexes.
/// The shard's write lock is the atomicity unit of every mutation; the WAL
/// append is acknowledged (fsynced) inside the critical section before the
/// in-memory state changes.
pub struct Engine {
    tutors: DashMap<TutorId, SharedTutorState>,
    /// Reverse lookup: slot id → owning tutor.
    slot_owner: DashMap<SlotId, TutorId>,
    /// Reverse lookup: reservation id → slot.
    reservation_slot: DashMap<ReservationId, SlotId>,
    /// Slots currently reserved per student, for student-side overlap checks.
    student_slots: DashMap<StudentId, Vec<SlotId>>,
    wal_tx: mpsc::Sender<WalCommand>,
    display_tz: Tz,
}

impl Engine {
    /// Replay the WAL under `config.data_dir` and start the group-commit
    /// writer. Must run inside a tokio runtime.
    pub fn open(config: &Config) -> io::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let wal_path = config.wal_path();
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            tutors: DashMap::new(),
            slot_owner: DashMap::new(),
            reservation_slot: DashMap::new(),
            student_slots: DashMap::new(),
            wal_tx,
            display_tz: config.display_tz,
        };

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds instantly. Never use blocking_write here because this may
        // run inside an async context.
        for event in &events {
            let shard = engine.tutor_state(event.tutor());
            let mut guard = shard.try_write().expect("replay: uncontended write");
            engine.apply_to_tutor(&mut guard, event);
        }

        Ok(engine)
    }

    /// Get or lazily create the shard for a tutor.
    pub(super) fn tutor_state(&self, tutor: TutorId) -> SharedTutorState {
        self.tutors
            .entry(tutor)
            .or_insert_with(|| Arc::new(RwLock::new(TutorState::new(tutor))))
            .value()
            .clone()
    }

    pub fn get_tutor(&self, tutor: &TutorId) -> Option<SharedTutorState> {
        self.tutors.get(tutor).map(|e| e.value().clone())
    }

    pub fn owner_of_slot(&self, slot: &SlotId) -> Option<TutorId> {
        self.slot_owner.get(slot).map(|e| *e.value())
    }

    pub fn slot_of_reservation(&self, reservation: &ReservationId) -> Option<SlotId> {
        self.reservation_slot.get(reservation).map(|e| *e.value())
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append + in-memory apply in one call, under the caller's write lock.
    /// A failed append leaves the shard and indexes untouched.
    pub(super) async fn persist_and_apply(
        &self,
        ts: &mut TutorState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_to_tutor(ts, event);
        Ok(())
    }

    /// Apply an event to a shard (caller holds the lock) and keep the
    /// secondary indexes in step. The booked flag changes here and only
    /// here, in the same step as the reservation it mirrors.
    pub(super) fn apply_to_tutor(&self, ts: &mut TutorState, event: &Event) {
        match event {
            Event::SlotCreated {
                id,
                tutor,
                start,
                duration,
            } => {
                ts.insert_slot(Slot {
                    id: *id,
                    tutor: *tutor,
                    start: *start,
                    duration: *duration,
                    reservation: None,
                });
                self.slot_owner.insert(*id, *tutor);
            }
            Event::SlotDeleted { id, .. } => {
                ts.remove_slot(*id);
                self.slot_owner.remove(id);
            }
            Event::ReservationCreated {
                id,
                slot,
                student,
                created_at,
                ..
            } => {
                if let Some(s) = ts.find_slot_mut(slot) {
                    s.reservation = Some(Reservation {
                        id: *id,
                        student: *student,
                        created_at: *created_at,
                    });
                }
                self.reservation_slot.insert(*id, *slot);
                self.student_slots.entry(*student).or_default().push(*slot);
            }
            Event::ReservationCancelled { id, slot, .. } => {
                let mut student = None;
                if let Some(s) = ts.find_slot_mut(slot)
                    && let Some(res) = s.reservation.take() {
                        student = Some(res.student);
                    }
                self.reservation_slot.remove(id);
                if let Some(st) = student
                    && let Some(mut held) = self.student_slots.get_mut(&st) {
                        held.retain(|held_slot| held_slot != slot);
                    }
            }
        }
    }

    /// Lookup slot → owning tutor, get the shard, acquire its write lock.
    pub(super) async fn lock_slot_owner(
        &self,
        slot: &SlotId,
    ) -> Result<(TutorId, tokio::sync::OwnedRwLockWriteGuard<TutorState>), EngineError> {
        let tutor = self
            .owner_of_slot(slot)
            .ok_or(EngineError::NotFound(slot.0))?;
        let shard = self
            .get_tutor(&tutor)
            .ok_or(EngineError::NotFound(tutor.0))?;
        let guard = shard.write_owned().await;
        Ok((tutor, guard))
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state: one create per live slot, one reservation
    /// per booked slot.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let shards: Vec<SharedTutorState> =
            self.tutors.iter().map(|e| e.value().clone()).collect();

        let mut events = Vec::new();
        for shard in shards {
            let guard = shard.read().await;
            for slot in &guard.slots {
                events.push(Event::SlotCreated {
                    id: slot.id,
                    tutor: slot.tutor,
                    start: slot.start,
                    duration: slot.duration,
                });
                if let Some(res) = &slot.reservation {
                    events.push(Event::ReservationCreated {
                        id: res.id,
                        slot: slot.id,
                        tutor: slot.tutor,
                        student: res.student,
                        created_at: res.created_at,
                    });
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
