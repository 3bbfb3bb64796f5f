//! Caller-facing scheduling API.
//!
//! Reads go through the [`ReservationStore`]; writes are committed by the
//! store, which re-runs the overlap test under its own lock. Checks done here
//! are advisory and only fail fast. Successful writes invalidate the booking
//! cache months they touched.

use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::cache::{BookingCache, CachedMonth, MonthKey};
use crate::config::Config;
use crate::engine::{find_conflict, local_now, EngineError};
use crate::lifecycle::ReservationStatus;
use crate::limits::MAX_DURATION_MINUTES;
use crate::model::*;
pub use crate::model::ReservationPatch;
use crate::observability::{outcome_label, CONFLICTS_TOTAL, OPERATION_DURATION_SECONDS, RESERVATIONS_TOTAL};
use crate::slots::{generate_slots, SlotParams};
use crate::store::ReservationStore;

pub type Clock = fn() -> NaiveDateTime;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AvailableTimesRequest {
    pub date: Option<NaiveDate>,
    pub room_id: Option<Ulid>,
    pub selected_time: Option<NaiveTime>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailableTimes {
    pub operating_hours: OperatingHours,
    pub time_slots: Vec<TimeSlot>,
    pub selected_time: Option<NaiveTime>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AvailabilityRequest {
    pub room_id: Option<Ulid>,
    pub scheduled_at: Option<NaiveDateTime>,
    /// Defaults to the configured booking length.
    pub duration_minutes: Option<u32>,
    /// The reservation being edited, if any.
    pub exclude_reservation_id: Option<Ulid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Availability {
    pub is_available: bool,
    pub conflicting_reservation: Option<Reservation>,
}

/// Data for a new reservation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewReservation {
    pub room_id: Option<Ulid>,
    pub scheduled_at: Option<NaiveDateTime>,
    /// `pending` when absent.
    pub status: Option<ReservationStatus>,
    pub customer: CustomerSnapshot,
    pub pet: PetSnapshot,
    #[serde(default)]
    pub catalog: CatalogRefs,
    pub memo: Option<String>,
}

pub struct Scheduler<S: ReservationStore> {
    store: Arc<S>,
    cache: BookingCache,
    slot_minutes: u32,
    booking_minutes: u32,
    clock: Clock,
}

fn required<T>(value: Option<T>, code: &'static str, what: &str) -> Result<T, EngineError> {
    value.ok_or_else(|| EngineError::validation(code, format!("{what} is required")))
}

fn ensure_active(room: &Room) -> Result<(), EngineError> {
    if room.active {
        return Ok(());
    }
    Err(EngineError::validation(
        "ROOM_INACTIVE",
        format!("room {} is not accepting reservations", room.name),
    ))
}

fn day_before(date: NaiveDate) -> NaiveDate {
    date.pred_opt().unwrap_or(date)
}

impl<S: ReservationStore> Scheduler<S> {
    pub fn new(store: Arc<S>, config: &Config) -> Self {
        Self {
            store,
            cache: BookingCache::new(config.cache_ttl),
            slot_minutes: config.slot_minutes,
            booking_minutes: config.booking_minutes,
            clock: local_now,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn cache(&self) -> &BookingCache {
        &self.cache
    }

    fn today(&self) -> NaiveDate {
        (self.clock)().date()
    }

    fn reject_past(&self, date: NaiveDate) -> Result<(), EngineError> {
        if date < self.today() {
            return Err(EngineError::PastDate(date));
        }
        Ok(())
    }

    /// Slot map of one room for one day.
    pub async fn get_available_times(&self, req: AvailableTimesRequest) -> Result<AvailableTimes, EngineError> {
        let started = Instant::now();
        let date = required(req.date, "DATE_REQUIRED", "date")?;
        let room_id = required(req.room_id, "ROOM_REQUIRED", "room")?;
        self.reject_past(date)?;

        let room = self.store.get_room(room_id).await?;
        ensure_active(&room)?;
        let reservations = self
            .store
            .list_reservations_by_room_and_date_range(room_id, day_before(date), date)
            .await?;

        let params = SlotParams {
            granularity_minutes: self.slot_minutes,
            booking_minutes: self.booking_minutes,
            selected: req.selected_time,
            now: (self.clock)(),
        };
        let time_slots = generate_slots(&room, date, &reservations, &params);
        metrics::histogram!(OPERATION_DURATION_SECONDS, "op" => "available_times")
            .record(started.elapsed().as_secs_f64());
        debug!(%room_id, %date, slots = time_slots.len(), "slot map built");
        Ok(AvailableTimes {
            operating_hours: room.hours,
            time_slots,
            selected_time: req.selected_time,
        })
    }

    /// Advisory overlap check. The commit path repeats it under the store's lock.
    pub async fn check_availability(&self, req: AvailabilityRequest) -> Result<Availability, EngineError> {
        let started = Instant::now();
        let scheduled_at = required(req.scheduled_at, "DATE_REQUIRED", "scheduled time")?;
        let room_id = required(req.room_id, "ROOM_REQUIRED", "room")?;
        self.reject_past(scheduled_at.date())?;
        let duration = req.duration_minutes.unwrap_or(self.booking_minutes);
        if duration == 0 || duration > MAX_DURATION_MINUTES {
            return Err(EngineError::validation(
                "INVALID_DURATION",
                format!("duration must be between 1 and {MAX_DURATION_MINUTES} minutes"),
            ));
        }

        let ends_at = scheduled_at
            .checked_add_signed(TimeDelta::minutes(i64::from(duration)))
            .ok_or_else(|| EngineError::validation("INVALID_DURATION", "window runs past the supported calendar"))?;
        ensure_active(&self.store.get_room(room_id).await?)?;
        let window = Span::starting_at(scheduled_at, duration);
        let last_day = ends_at.date();
        let candidates = self
            .store
            .list_reservations_by_room_and_date_range(room_id, day_before(scheduled_at.date()), last_day)
            .await?;
        let conflict = find_conflict(&candidates, &window, req.exclude_reservation_id).cloned();
        if let Some(c) = &conflict {
            metrics::counter!(CONFLICTS_TOTAL, "stage" => "advisory").increment(1);
            debug!(%room_id, %scheduled_at, conflict = %c.id, "requested window is taken");
        }
        metrics::histogram!(OPERATION_DURATION_SECONDS, "op" => "check_availability")
            .record(started.elapsed().as_secs_f64());
        Ok(Availability {
            is_available: conflict.is_none(),
            conflicting_reservation: conflict,
        })
    }

    pub async fn create_reservation(&self, input: NewReservation) -> Result<Reservation, EngineError> {
        let started = Instant::now();
        let result = self.create_inner(input).await;
        self.record("create", started, &result);
        if let Ok(r) = &result {
            self.cache.invalidate_dates([r.date()]);
            info!(reservation_id = %r.id, room_id = %r.room_id, scheduled_at = %r.scheduled_at, "reservation booked");
        }
        result
    }

    async fn create_inner(&self, input: NewReservation) -> Result<Reservation, EngineError> {
        let scheduled_at = required(input.scheduled_at, "DATE_REQUIRED", "scheduled time")?;
        let room_id = required(input.room_id, "ROOM_REQUIRED", "room")?;
        self.reject_past(scheduled_at.date())?;

        let status = input.status.unwrap_or_default();
        if status != ReservationStatus::Pending && !ReservationStatus::Pending.can_transition_to(status) {
            return Err(EngineError::validation(
                "INVALID_STATUS",
                format!("a new reservation cannot start as {status}"),
            ));
        }

        let now = Utc::now();
        let reservation = Reservation {
            id: Ulid::new(),
            room_id,
            scheduled_at,
            duration_minutes: self.booking_minutes,
            status,
            customer: input.customer,
            pet: input.pet,
            catalog: input.catalog,
            memo: input.memo,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_reservation(reservation).await
    }

    /// Apply `patch` to a stored reservation. The store merges it into the
    /// record it holds under lock, so concurrent edits of other fields survive.
    pub async fn update_reservation(&self, id: Ulid, patch: ReservationPatch) -> Result<Reservation, EngineError> {
        let started = Instant::now();
        let result = self.update_inner(id, patch).await;
        self.record("update", started, &result);
        let (previous_date, updated) = result?;
        self.cache.invalidate_dates([previous_date, updated.date()]);
        Ok(updated)
    }

    async fn update_inner(&self, id: Ulid, patch: ReservationPatch) -> Result<(NaiveDate, Reservation), EngineError> {
        // Only picks the cached month to drop.
        let previous_date = self.store.get_reservation(id).await?.date();
        let updated = self.store.update_reservation(id, patch, self.today()).await?;
        Ok((previous_date, updated))
    }

    pub async fn update_status(&self, id: Ulid, status: ReservationStatus) -> Result<Reservation, EngineError> {
        let started = Instant::now();
        let result = self.store.update_reservation_status(id, status).await;
        self.record("status", started, &result);
        if let Ok(r) = &result {
            self.cache.invalidate_dates([r.date()]);
        }
        result
    }

    pub async fn delete_reservation(&self, id: Ulid) -> Result<(), EngineError> {
        let started = Instant::now();
        let result = self.store.delete_reservation(id).await;
        self.record("delete", started, &result);
        let removed = result?;
        self.cache.invalidate_dates([removed.date()]);
        Ok(())
    }

    /// All-or-nothing status change. On rejection nothing is written and the
    /// error lists every failing id.
    pub async fn bulk_update_status(
        &self,
        ids: &[Ulid],
        status: ReservationStatus,
    ) -> Result<Vec<Reservation>, EngineError> {
        let started = Instant::now();
        let result = self.store.update_reservation_statuses(ids, status).await;
        self.record("bulk_status", started, &result);
        match &result {
            Ok(updated) => self.cache.invalidate_dates(updated.iter().map(Reservation::date)),
            Err(EngineError::BulkRejected(failures)) => {
                warn!(rejected = failures.len(), batch = ids.len(), to = %status, "bulk status update rejected");
            }
            Err(_) => {}
        }
        result
    }

    /// Reservations of one calendar month, served from the booking cache.
    /// For display only; never used for conflict decisions.
    pub async fn month_reservations(&self, month: MonthKey) -> Result<Vec<Reservation>, EngineError> {
        self.cache.get(self.store.as_ref(), month).await
    }

    /// Whatever the cache holds for `month`, without fetching.
    pub fn cached_month(&self, month: MonthKey) -> Option<CachedMonth> {
        self.cache.peek(month)
    }

    fn record<T>(&self, op: &'static str, started: Instant, result: &Result<T, EngineError>) {
        metrics::counter!(RESERVATIONS_TOTAL, "op" => op, "outcome" => outcome_label(result)).increment(1);
        metrics::histogram!(OPERATION_DURATION_SECONDS, "op" => op).record(started.elapsed().as_secs_f64());
        if let Err(e) = result {
            debug!(op, code = e.code(), error = %e, "reservation write refused");
        }
    }
}
