mod conflict;
mod error;
mod mutations;
mod queries;

pub use conflict::{find_conflict, local_now};
pub use error::{BulkFailure, EngineError};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::journal::Journal;
use crate::model::*;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit journal channel ─────────────────────────

pub(super) enum JournalCommand {
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

/// Background task that owns the journal and batches appends for group commit.
/// Blocks for the first append, drains whatever else is already queued, then
/// writes the batch with a single fsync and answers every sender.
async fn journal_writer_loop(mut journal: Journal, mut rx: mpsc::Receiver<JournalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            JournalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut journal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                JournalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        metrics::histogram!(crate::observability::JOURNAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut journal, &batch);
        metrics::histogram!(crate::observability::JOURNAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }

        if let Some(cmd) = deferred {
            handle_non_append(&mut journal, cmd);
        }
    }
}

fn flush_batch(journal: &mut Journal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = journal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after a failed append so half-buffered bytes never leak into the next batch.
    let flush_result = journal.flush_sync();
    match append_err {
        Some(e) => Err(e),
        None => flush_result,
    }
}

fn handle_non_append(journal: &mut Journal, cmd: JournalCommand) {
    match cmd {
        JournalCommand::Compact { events, response } => {
            let result = Journal::write_compact_file(journal.path(), &events)
                .and_then(|()| journal.swap_compact_file());
            let _ = response.send(result);
        }
        JournalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(journal.appends_since_compact());
        }
        JournalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Persistence side of the scheduler: rooms and their reservations, each room
/// behind its own lock. Every write re-checks its invariants while holding the
/// lock of every room it touches, so check-then-insert is atomic per room.
pub struct Engine {
    rooms: DashMap<Ulid, SharedRoomState>,
    journal_tx: mpsc::Sender<JournalCommand>,
    /// Reverse lookup: reservation id → room id
    reservation_room: DashMap<Ulid, Ulid>,
    /// Mutations hold this shared; compaction holds it exclusively so the
    /// snapshot never misses a record that is already journaled.
    compaction_gate: RwLock<()>,
}

/// Rooms an event touches.
fn event_rooms(event: &Event) -> Vec<Ulid> {
    match event {
        Event::RoomCreated { room } | Event::RoomUpdated { room } => vec![room.id],
        Event::RoomDeleted { id } => vec![*id],
        Event::ReservationCreated { reservation } => vec![reservation.room_id],
        Event::ReservationUpdated {
            previous_room,
            reservation,
        } => {
            if *previous_room == reservation.room_id {
                vec![*previous_room]
            } else {
                vec![*previous_room, reservation.room_id]
            }
        }
        Event::StatusChanged { room_id, .. } | Event::ReservationDeleted { room_id, .. } => vec![*room_id],
        Event::BatchStatusChanged { changes, .. } => {
            let mut rooms: Vec<Ulid> = changes.iter().map(|(_, room_id)| *room_id).collect();
            rooms.sort();
            rooms.dedup();
            rooms
        }
    }
}

/// Apply the part of `event` that concerns `rs` (caller holds the lock).
fn apply_to_room(rs: &mut RoomState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    let room_id = rs.room.id;
    match event {
        Event::RoomUpdated { room } => rs.room = room.clone(),
        Event::ReservationCreated { reservation } => {
            rs.insert_reservation(reservation.clone());
            index.insert(reservation.id, room_id);
        }
        Event::ReservationUpdated {
            previous_room,
            reservation,
        } => {
            if *previous_room == room_id {
                rs.remove_reservation(reservation.id);
            }
            if reservation.room_id == room_id {
                rs.remove_reservation(reservation.id);
                rs.insert_reservation(reservation.clone());
                index.insert(reservation.id, room_id);
            }
        }
        Event::StatusChanged { id, status, at, .. } => {
            if let Some(r) = rs.get_mut(*id) {
                r.status = *status;
                r.updated_at = *at;
            }
        }
        Event::BatchStatusChanged { changes, status, at } => {
            for (id, change_room) in changes {
                if *change_room != room_id {
                    continue;
                }
                if let Some(r) = rs.get_mut(*id) {
                    r.status = *status;
                    r.updated_at = *at;
                }
            }
        }
        Event::ReservationDeleted { id, .. } => {
            rs.remove_reservation(*id);
            index.remove(id);
        }
        // Room creation and deletion happen at the map level.
        Event::RoomCreated { .. } | Event::RoomDeleted { .. } => {}
    }
}

impl Engine {
    /// Open the journal at `journal_path`, rebuild state from it, and start the writer task.
    /// Must be called inside a tokio runtime.
    pub fn new(journal_path: PathBuf) -> io::Result<Self> {
        let (journal, events) = Journal::open(&journal_path)?;
        let (journal_tx, journal_rx) = mpsc::channel(4096);
        tokio::spawn(journal_writer_loop(journal, journal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            journal_tx,
            reservation_room: DashMap::new(),
            compaction_gate: RwLock::new(()),
        };

        // Sole owner of every Arc during replay, so try_write never contends.
        for event in &events {
            match event {
                Event::RoomCreated { room } => {
                    engine
                        .rooms
                        .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
                }
                Event::RoomDeleted { id } => {
                    engine.rooms.remove(id);
                }
                other => {
                    for room_id in event_rooms(other) {
                        let Some(rs) = engine.get_room_state(&room_id) else {
                            continue;
                        };
                        let mut guard = rs.try_write().expect("replay: uncontended write");
                        apply_to_room(&mut guard, other, &engine.reservation_room);
                    }
                }
            }
        }

        info!(
            path = %journal_path.display(),
            events = events.len(),
            rooms = engine.rooms.len(),
            reservations = engine.reservation_room.len(),
            "engine state restored"
        );
        Ok(engine)
    }

    /// Write an event through the group-commit writer and wait for fsync.
    async fn journal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Persistence("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Persistence("journal writer dropped response".into()))?
            .map_err(EngineError::from)
    }

    pub(super) fn get_room_state(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub(super) fn room_of(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_room.get(reservation_id).map(|e| *e.value())
    }

    /// Journal + apply in one call, for events confined to one room.
    pub(super) async fn persist_and_apply(&self, rs: &mut RoomState, event: &Event) -> Result<(), EngineError> {
        self.journal_append(event).await?;
        apply_to_room(rs, event, &self.reservation_room);
        Ok(())
    }

    /// Journal + apply across several locked rooms.
    pub(super) async fn persist_and_apply_all(
        &self,
        guards: &mut [OwnedRwLockWriteGuard<RoomState>],
        event: &Event,
    ) -> Result<(), EngineError> {
        self.journal_append(event).await?;
        for guard in guards.iter_mut() {
            apply_to_room(guard, event, &self.reservation_room);
        }
        Ok(())
    }

    /// Write-lock the room currently holding `reservation_id`.
    ///
    /// The reservation can move between the index lookup and the lock, so the
    /// lookup is repeated until the locked room actually holds it.
    pub(super) async fn lock_reservation_room(
        &self,
        reservation_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        loop {
            let room_id = self
                .room_of(reservation_id)
                .ok_or(EngineError::reservation_not_found(*reservation_id))?;
            let rs = self
                .get_room_state(&room_id)
                .ok_or(EngineError::room_not_found(room_id))?;
            let guard = rs.write_owned().await;
            if guard.get(*reservation_id).is_some() {
                return Ok(guard);
            }
            if self.room_of(reservation_id) == Some(room_id) {
                return Err(EngineError::reservation_not_found(*reservation_id));
            }
        }
    }

    /// Write-lock several rooms in id order. Unknown rooms are an error.
    pub(super) async fn lock_rooms(
        &self,
        room_ids: &[Ulid],
    ) -> Result<Vec<OwnedRwLockWriteGuard<RoomState>>, EngineError> {
        let mut ids = room_ids.to_vec();
        ids.sort();
        ids.dedup();
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            let rs = self.get_room_state(&id).ok_or(EngineError::room_not_found(id))?;
            let guard = rs.write_owned().await;
            // Deleted while we waited for the lock.
            if !self.rooms.contains_key(&id) {
                return Err(EngineError::room_not_found(id));
            }
            guards.push(guard);
        }
        Ok(guards)
    }
}
