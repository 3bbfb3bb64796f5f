use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::lifecycle::ReservationStatus;

/// Milliseconds of a naive wall-clock timestamp. All overlap math runs on this axis.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

pub fn to_ms(t: NaiveDateTime) -> Ms {
    t.and_utc().timestamp_millis()
}

pub fn minutes(n: u32) -> TimeDelta {
    TimeDelta::minutes(i64::from(n))
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Window of `duration_minutes` starting at `start`.
    pub fn starting_at(start: NaiveDateTime, duration_minutes: u32) -> Self {
        let start = to_ms(start);
        Self::new(start, start + i64::from(duration_minutes) * MINUTE_MS)
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Daily opening window of a room, wall-clock only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl OperatingHours {
    pub fn new(open: NaiveTime, close: NaiveTime) -> Self {
        Self { open, close }
    }

    pub fn is_valid(&self) -> bool {
        self.open < self.close
    }

    pub fn opens_at(&self, date: NaiveDate) -> NaiveDateTime {
        date.and_time(self.open)
    }

    pub fn closes_at(&self, date: NaiveDate) -> NaiveDateTime {
        date.and_time(self.close)
    }

    pub fn window(&self, date: NaiveDate) -> Span {
        Span::new(to_ms(self.opens_at(date)), to_ms(self.closes_at(date)))
    }
}

impl Default for OperatingHours {
    fn default() -> Self {
        Self {
            open: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            close: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub name: String,
    pub capacity: Option<u32>,
    pub hours: OperatingHours,
    pub active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerSnapshot {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PetSnapshot {
    pub name: String,
    pub species: Option<String>,
    pub breed: Option<String>,
    pub weight_kg: Option<f64>,
    pub death_date: Option<NaiveDate>,
    pub death_reason: Option<String>,
}

/// References into the catalog service. Opaque to this crate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRefs {
    pub package_id: Option<String>,
    pub premium_line_id: Option<String>,
    pub option_ids: Vec<String>,
    pub staff_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub room_id: Ulid,
    pub scheduled_at: NaiveDateTime,
    pub duration_minutes: u32,
    pub status: ReservationStatus,
    pub customer: CustomerSnapshot,
    pub pet: PetSnapshot,
    pub catalog: CatalogRefs,
    pub memo: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    /// `None` when the window runs past the end of the calendar.
    pub fn checked_ends_at(&self) -> Option<NaiveDateTime> {
        self.scheduled_at.checked_add_signed(minutes(self.duration_minutes))
    }

    pub fn ends_at(&self) -> NaiveDateTime {
        self.checked_ends_at().unwrap_or(NaiveDateTime::MAX)
    }

    pub fn span(&self) -> Span {
        Span::starting_at(self.scheduled_at, self.duration_minutes)
    }

    pub fn date(&self) -> NaiveDate {
        self.scheduled_at.date()
    }

    /// Cancelled reservations release their window.
    pub fn blocks(&self) -> bool {
        self.status != ReservationStatus::Cancelled
    }
}

/// Fields to change on an existing reservation. `None` keeps the stored value.
///
/// Applied by the store to the record it holds under lock, so fields left out
/// are never overwritten with an older copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservationPatch {
    pub room_id: Option<Ulid>,
    pub scheduled_at: Option<NaiveDateTime>,
    /// Compared with the stored status; equal means no transition.
    pub status: Option<ReservationStatus>,
    pub customer: Option<CustomerSnapshot>,
    pub pet: Option<PetSnapshot>,
    pub catalog: Option<CatalogRefs>,
    /// Reassigns staff without touching the other catalog references.
    pub staff_id: Option<String>,
    pub memo: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Available,
    Blocked,
}

/// One bookable unit of a room's day. Derived on every request, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub status: SlotStatus,
    pub is_selectable: bool,
    pub is_in_selected_block: bool,
    pub blocked_by: Option<Ulid>,
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// Every reservation on this room (cancelled included), sorted by `scheduled_at`.
    pub reservations: Vec<Reservation>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            reservations: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.scheduled_at <= reservation.scheduled_at);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn get(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// Reservations whose window overlaps the query, cancelled ones included.
    /// Uses binary search to skip reservations starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| to_ms(r.scheduled_at) < query.end);
        let query = *query;
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span().end > query.start)
    }

    /// Reservations whose start falls in `[from, to)`.
    pub fn starting_within(&self, from: NaiveDateTime, to: NaiveDateTime) -> &[Reservation] {
        let lo = self.reservations.partition_point(|r| r.scheduled_at < from);
        let hi = self.reservations.partition_point(|r| r.scheduled_at < to);
        &self.reservations[lo..hi.max(lo)]
    }
}

/// Journal record format. Flat; one record is one atomic state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        room: Room,
    },
    RoomUpdated {
        room: Room,
    },
    RoomDeleted {
        id: Ulid,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    /// Full replacement. `previous_room` differs from `reservation.room_id` on a move.
    ReservationUpdated {
        previous_room: Ulid,
        reservation: Reservation,
    },
    StatusChanged {
        id: Ulid,
        room_id: Ulid,
        status: ReservationStatus,
        at: DateTime<Utc>,
    },
    /// Bulk transition; `changes` holds `(reservation_id, room_id)` pairs.
    BatchStatusChanged {
        changes: Vec<(Ulid, Ulid)>,
        status: ReservationStatus,
        at: DateTime<Utc>,
    },
    ReservationDeleted {
        id: Ulid,
        room_id: Ulid,
    },
}
