use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::lifecycle::ReservationStatus;
use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, validate_reservation, validate_room};
use super::{BulkFailure, Engine, EngineError, JournalCommand};

fn ensure_active(room: &Room) -> Result<(), EngineError> {
    if room.active {
        Ok(())
    } else {
        Err(EngineError::validation(
            "ROOM_INACTIVE",
            format!("room {} ({}) is not accepting reservations", room.name, room.id),
        ))
    }
}

fn apply_patch(
    existing: &Reservation,
    patch: &ReservationPatch,
    today: NaiveDate,
) -> Result<Reservation, EngineError> {
    let mut r = existing.clone();
    if let Some(at) = patch.scheduled_at {
        r.scheduled_at = at;
    }
    if let Some(room_id) = patch.room_id {
        r.room_id = room_id;
    }
    let rescheduled = r.scheduled_at != existing.scheduled_at || r.room_id != existing.room_id;
    if rescheduled && r.date() < today {
        return Err(EngineError::PastDate(r.date()));
    }
    if let Some(status) = patch.status
        && status != existing.status
    {
        r.status = existing.status.transition(status)?;
    }
    if let Some(customer) = &patch.customer {
        r.customer = customer.clone();
    }
    if let Some(pet) = &patch.pet {
        r.pet = pet.clone();
    }
    if let Some(catalog) = &patch.catalog {
        r.catalog = catalog.clone();
    }
    if let Some(staff_id) = &patch.staff_id {
        r.catalog.staff_id = Some(staff_id.clone());
    }
    if let Some(memo) = &patch.memo {
        r.memo = Some(memo.clone());
    }
    validate_reservation(&r)?;
    r.updated_at = Utc::now();
    Ok(r)
}

impl Engine {
    pub async fn create_room(&self, room: Room) -> Result<Room, EngineError> {
        validate_room(&room)?;
        let _gate = self.compaction_gate.read().await;
        if self.rooms.len() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if self.rooms.contains_key(&room.id) {
            return Err(EngineError::AlreadyExists(room.id));
        }

        let event = Event::RoomCreated { room: room.clone() };
        self.journal_append(&event).await?;
        self.rooms
            .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
        info!(room_id = %room.id, name = %room.name, "room created");
        Ok(room)
    }

    pub async fn update_room(&self, room: Room) -> Result<Room, EngineError> {
        validate_room(&room)?;
        let _gate = self.compaction_gate.read().await;
        let mut guards = self.lock_rooms(&[room.id]).await?;
        let event = Event::RoomUpdated { room: room.clone() };
        self.persist_and_apply(&mut guards[0], &event).await?;
        info!(room_id = %room.id, active = room.active, "room updated");
        Ok(room)
    }

    pub async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.read().await;
        let guards = self.lock_rooms(&[id]).await?;
        if !guards[0].reservations.is_empty() {
            return Err(EngineError::HasReservations(id));
        }
        let event = Event::RoomDeleted { id };
        self.journal_append(&event).await?;
        // Removed while still locked: anyone queued on this lock sees the room gone.
        self.rooms.remove(&id);
        info!(room_id = %id, "room deleted");
        Ok(())
    }

    /// Store a new reservation. The overlap test is repeated under the room's
    /// write lock, so of two racing inserts for one window exactly one succeeds.
    pub async fn insert_reservation(&self, reservation: Reservation) -> Result<Reservation, EngineError> {
        validate_reservation(&reservation)?;
        if self.reservation_room.contains_key(&reservation.id) {
            return Err(EngineError::AlreadyExists(reservation.id));
        }
        let _gate = self.compaction_gate.read().await;
        let mut guards = self.lock_rooms(&[reservation.room_id]).await?;
        let guard = &mut guards[0];
        ensure_active(&guard.room)?;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many reservations on room"));
        }
        if reservation.blocks() {
            check_no_conflict(guard, &reservation.span(), None)?;
        }

        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
        };
        self.persist_and_apply(guard, &event).await?;
        info!(
            reservation_id = %reservation.id,
            room_id = %reservation.room_id,
            scheduled_at = %reservation.scheduled_at,
            "reservation created"
        );
        Ok(reservation)
    }

    /// Apply `patch` to the stored reservation under its room's write lock.
    ///
    /// Fields the patch leaves out keep the value held at commit time, and a
    /// patch status equal to the stored one is not a transition. Rescheduling
    /// (new start or new room) onto a date before `today` is refused. A room
    /// change locks both rooms in id order.
    pub async fn update_reservation(
        &self,
        id: Ulid,
        patch: ReservationPatch,
        today: NaiveDate,
    ) -> Result<Reservation, EngineError> {
        let _gate = self.compaction_gate.read().await;
        loop {
            let previous_room = self.room_of(&id).ok_or(EngineError::reservation_not_found(id))?;
            let target_room = patch.room_id.unwrap_or(previous_room);
            let mut guards = self.lock_rooms(&[previous_room, target_room]).await?;
            let Some(src) = guards.iter().position(|g| g.room.id == previous_room) else {
                return Err(EngineError::room_not_found(previous_room));
            };
            let Some(existing) = guards[src].get(id).cloned() else {
                if self.room_of(&id) == Some(previous_room) {
                    return Err(EngineError::reservation_not_found(id));
                }
                // Moved while we were waiting for the locks.
                continue;
            };
            let Some(dst) = guards.iter().position(|g| g.room.id == target_room) else {
                return Err(EngineError::room_not_found(target_room));
            };

            let updated = apply_patch(&existing, &patch, today)?;
            if updated.room_id != previous_room {
                ensure_active(&guards[dst].room)?;
            }
            if updated.blocks() {
                check_no_conflict(&guards[dst], &updated.span(), Some(id))?;
            }

            let event = Event::ReservationUpdated {
                previous_room,
                reservation: updated.clone(),
            };
            self.persist_and_apply_all(&mut guards, &event).await?;
            info!(
                reservation_id = %id,
                room_id = %updated.room_id,
                moved = updated.room_id != previous_room,
                "reservation updated"
            );
            return Ok(updated);
        }
    }

    pub async fn update_reservation_status(
        &self,
        id: Ulid,
        status: ReservationStatus,
    ) -> Result<Reservation, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let mut guard = self.lock_reservation_room(&id).await?;
        let current = guard
            .get(id)
            .map(|r| r.status)
            .ok_or(EngineError::reservation_not_found(id))?;
        current.transition(status)?;

        let event = Event::StatusChanged {
            id,
            room_id: guard.room.id,
            status,
            at: Utc::now(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(reservation_id = %id, from = %current, to = %status, "reservation status changed");
        guard.get(id).cloned().ok_or(EngineError::reservation_not_found(id))
    }

    /// Move every reservation in `ids` to `status`, or none of them.
    ///
    /// All involved rooms are locked (in id order) before validation, and the
    /// batch is written as one journal record.
    pub async fn bulk_update_status(
        &self,
        ids: &[Ulid],
        status: ReservationStatus,
    ) -> Result<Vec<Reservation>, EngineError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        if ids.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        let mut seen = HashSet::with_capacity(ids.len());
        if let Some(dup) = ids.iter().find(|id| !seen.insert(**id)) {
            return Err(EngineError::validation(
                "DUPLICATE_ID",
                format!("reservation {dup} appears more than once in the batch"),
            ));
        }

        let mut failures = Vec::new();
        let _gate = self.compaction_gate.read().await;
        let mut located: Vec<(Ulid, Ulid)> = Vec::with_capacity(ids.len());
        for id in ids {
            match self.room_of(id) {
                Some(room_id) => located.push((*id, room_id)),
                None => failures.push(BulkFailure {
                    id: *id,
                    code: "NOT_FOUND",
                    reason: format!("reservation not found: {id}"),
                }),
            }
        }

        let room_ids: Vec<Ulid> = located.iter().map(|(_, room_id)| *room_id).collect();
        let mut guards = self.lock_rooms(&room_ids).await?;
        let slot_of: HashMap<Ulid, usize> = guards.iter().enumerate().map(|(i, g)| (g.room.id, i)).collect();

        for (id, room_id) in &located {
            match guards[slot_of[room_id]].get(*id) {
                None => failures.push(BulkFailure {
                    id: *id,
                    code: "NOT_FOUND",
                    reason: format!("reservation not found: {id}"),
                }),
                Some(r) => {
                    if let Err(e) = r.status.transition(status) {
                        let err = EngineError::from(e);
                        failures.push(BulkFailure {
                            id: *id,
                            code: err.code(),
                            reason: err.to_string(),
                        });
                    }
                }
            }
        }
        if !failures.is_empty() {
            debug!(rejected = failures.len(), batch = ids.len(), "bulk status update rejected");
            return Err(EngineError::BulkRejected(failures));
        }

        let event = Event::BatchStatusChanged {
            changes: located.clone(),
            status,
            at: Utc::now(),
        };
        self.persist_and_apply_all(&mut guards, &event).await?;
        info!(count = located.len(), to = %status, "bulk status update applied");

        located
            .iter()
            .map(|(id, room_id)| {
                guards[slot_of[room_id]]
                    .get(*id)
                    .cloned()
                    .ok_or(EngineError::reservation_not_found(*id))
            })
            .collect()
    }

    /// Remove a reservation, returning the removed record.
    pub async fn delete_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let mut guard = self.lock_reservation_room(&id).await?;
        let removed = guard.get(id).cloned().ok_or(EngineError::reservation_not_found(id))?;
        let event = Event::ReservationDeleted {
            id,
            room_id: guard.room.id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(reservation_id = %id, room_id = %removed.room_id, "reservation deleted");
        Ok(removed)
    }

    /// Rewrite the journal with just the events needed to rebuild current state.
    pub async fn compact_journal(&self) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.write().await;
        let states: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::new();
        for rs in states {
            let guard = rs.read().await;
            events.push(Event::RoomCreated {
                room: guard.room.clone(),
            });
            events.extend(guard.reservations.iter().map(|r| Event::ReservationCreated {
                reservation: r.clone(),
            }));
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Persistence("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Persistence("journal writer dropped response".into()))?
            .map_err(EngineError::from)?;
        info!(events = count, "journal compacted");
        Ok(())
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .journal_tx
            .send(JournalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
