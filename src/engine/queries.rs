use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use futures::future::join_all;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

/// `[from 00:00, to + 1 day 00:00)` for an inclusive date range.
fn day_bounds(from: NaiveDate, to: NaiveDate) -> Result<(NaiveDateTime, NaiveDateTime), EngineError> {
    if to < from {
        return Err(EngineError::validation(
            "INVALID_RANGE",
            format!("range end {to} is before range start {from}"),
        ));
    }
    if (to - from).num_days() >= MAX_QUERY_DAYS {
        return Err(EngineError::LimitExceeded("query range too wide"));
    }
    let end = to
        .checked_add_signed(TimeDelta::days(1))
        .ok_or(EngineError::LimitExceeded("query range out of bounds"))?;
    Ok((from.and_time(chrono::NaiveTime::MIN), end.and_time(chrono::NaiveTime::MIN)))
}

impl Engine {
    pub async fn get_room(&self, id: Ulid) -> Result<Room, EngineError> {
        let rs = self.get_room_state(&id).ok_or(EngineError::room_not_found(id))?;
        let guard = rs.read().await;
        Ok(guard.room.clone())
    }

    /// Every room, ordered by name then id. Names may repeat; ids never do.
    pub async fn list_rooms(&self) -> Vec<Room> {
        let states: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut rooms = join_all(states.iter().map(|rs| async move { rs.read().await.room.clone() })).await;
        rooms.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        rooms
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        // The reservation may move between lookup and read; retry on a miss.
        loop {
            let room_id = self.room_of(&id).ok_or(EngineError::reservation_not_found(id))?;
            let rs = self
                .get_room_state(&room_id)
                .ok_or(EngineError::reservation_not_found(id))?;
            let guard = rs.read().await;
            if let Some(r) = guard.get(id) {
                return Ok(r.clone());
            }
            if self.room_of(&id) == Some(room_id) {
                return Err(EngineError::reservation_not_found(id));
            }
        }
    }

    /// Reservations on one room starting on any day in `[from, to]`, cancelled included.
    pub async fn list_room_reservations(
        &self,
        room_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Reservation>, EngineError> {
        let (start, end) = day_bounds(from, to)?;
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::room_not_found(room_id))?;
        let guard = rs.read().await;
        Ok(guard.starting_within(start, end).to_vec())
    }

    /// Reservations on every room starting on any day in `[from, to]`, by start then id.
    pub async fn list_reservations(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Reservation>, EngineError> {
        let (start, end) = day_bounds(from, to)?;
        let states: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for rs in states {
            let guard = rs.read().await;
            out.extend_from_slice(guard.starting_within(start, end));
        }
        out.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn reservation_count(&self) -> usize {
        self.reservation_room.len()
    }
}
