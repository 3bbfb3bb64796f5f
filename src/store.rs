//! Repository seam between the scheduler and whatever persists rooms and
//! reservations. Inserts and updates must enforce the no-overlap rule inside
//! their own transaction boundary; callers never rely on an earlier read.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::lifecycle::ReservationStatus;
use crate::model::{Reservation, ReservationPatch, Room};

#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn list_rooms(&self) -> Result<Vec<Room>, EngineError>;

    async fn get_room(&self, id: Ulid) -> Result<Room, EngineError>;

    /// Reservations on `room_id` starting on any day in `[from, to]`.
    async fn list_reservations_by_room_and_date_range(
        &self,
        room_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Reservation>, EngineError>;

    /// Reservations on every room starting on any day in `[from, to]`.
    async fn list_reservations_by_date_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Reservation>, EngineError>;

    async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError>;

    /// Fails with `Conflict` if the window overlaps a non-cancelled reservation.
    async fn insert_reservation(&self, reservation: Reservation) -> Result<Reservation, EngineError>;

    /// Applies `patch` to the stored record inside the same transaction as the
    /// overlap check, with the reservation itself excluded from the conflict set.
    /// Moving it onto a date before `today` fails with `PastDate`.
    async fn update_reservation(
        &self,
        id: Ulid,
        patch: ReservationPatch,
        today: NaiveDate,
    ) -> Result<Reservation, EngineError>;

    async fn update_reservation_status(
        &self,
        id: Ulid,
        status: ReservationStatus,
    ) -> Result<Reservation, EngineError>;

    /// All-or-nothing status change for a batch.
    async fn update_reservation_statuses(
        &self,
        ids: &[Ulid],
        status: ReservationStatus,
    ) -> Result<Vec<Reservation>, EngineError>;

    /// Returns the removed record.
    async fn delete_reservation(&self, id: Ulid) -> Result<Reservation, EngineError>;
}

#[async_trait]
impl ReservationStore for Engine {
    async fn list_rooms(&self) -> Result<Vec<Room>, EngineError> {
        Ok(Engine::list_rooms(self).await)
    }

    async fn get_room(&self, id: Ulid) -> Result<Room, EngineError> {
        Engine::get_room(self, id).await
    }

    async fn list_reservations_by_room_and_date_range(
        &self,
        room_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Reservation>, EngineError> {
        self.list_room_reservations(room_id, from, to).await
    }

    async fn list_reservations_by_date_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Reservation>, EngineError> {
        self.list_reservations(from, to).await
    }

    async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        Engine::get_reservation(self, id).await
    }

    async fn insert_reservation(&self, reservation: Reservation) -> Result<Reservation, EngineError> {
        Engine::insert_reservation(self, reservation).await
    }

    async fn update_reservation(
        &self,
        id: Ulid,
        patch: ReservationPatch,
        today: NaiveDate,
    ) -> Result<Reservation, EngineError> {
        Engine::update_reservation(self, id, patch, today).await
    }

    async fn update_reservation_status(
        &self,
        id: Ulid,
        status: ReservationStatus,
    ) -> Result<Reservation, EngineError> {
        Engine::update_reservation_status(self, id, status).await
    }

    async fn update_reservation_statuses(
        &self,
        ids: &[Ulid],
        status: ReservationStatus,
    ) -> Result<Vec<Reservation>, EngineError> {
        self.bulk_update_status(ids, status).await
    }

    async fn delete_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        Engine::delete_reservation(self, id).await
    }
}

#[async_trait]
impl<S: ReservationStore + ?Sized> ReservationStore for Arc<S> {
    async fn list_rooms(&self) -> Result<Vec<Room>, EngineError> {
        (**self).list_rooms().await
    }

    async fn get_room(&self, id: Ulid) -> Result<Room, EngineError> {
        (**self).get_room(id).await
    }

    async fn list_reservations_by_room_and_date_range(
        &self,
        room_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Reservation>, EngineError> {
        (**self)
            .list_reservations_by_room_and_date_range(room_id, from, to)
            .await
    }

    async fn list_reservations_by_date_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Reservation>, EngineError> {
        (**self).list_reservations_by_date_range(from, to).await
    }

    async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        (**self).get_reservation(id).await
    }

    async fn insert_reservation(&self, reservation: Reservation) -> Result<Reservation, EngineError> {
        (**self).insert_reservation(reservation).await
    }

    async fn update_reservation(
        &self,
        id: Ulid,
        patch: ReservationPatch,
        today: NaiveDate,
    ) -> Result<Reservation, EngineError> {
        (**self).update_reservation(id, patch, today).await
    }

    async fn update_reservation_status(
        &self,
        id: Ulid,
        status: ReservationStatus,
    ) -> Result<Reservation, EngineError> {
        (**self).update_reservation_status(id, status).await
    }

    async fn update_reservation_statuses(
        &self,
        ids: &[Ulid],
        status: ReservationStatus,
    ) -> Result<Vec<Reservation>, EngineError> {
        (**self).update_reservation_statuses(ids, status).await
    }

    async fn delete_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        (**self).delete_reservation(id).await
    }
}
