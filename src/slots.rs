//! Slot generation for one room and one day.
//!
//! Slots tile the room's operating window at a fixed granularity. Each slot
//! carries whether a reservation covers it, whether a booking of the configured
//! length may start there, and whether it falls inside the caller's current
//! selection. Nothing here is cached; the map is rebuilt on every call.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::engine::find_conflict;
use crate::model::*;

#[derive(Debug, Clone, Copy)]
pub struct SlotParams {
    pub granularity_minutes: u32,
    /// Length of the booking a selectable slot must be able to hold.
    pub booking_minutes: u32,
    /// Start of the candidate booking currently chosen by the caller.
    pub selected: Option<NaiveTime>,
    pub now: NaiveDateTime,
}

/// Build the slot map for `room` on `date`.
///
/// `reservations` may contain records of other rooms or other days (e.g. the
/// previous evening); only those on `room` whose window touches a slot count.
pub fn generate_slots(room: &Room, date: NaiveDate, reservations: &[Reservation], params: &SlotParams) -> Vec<TimeSlot> {
    let step = params.granularity_minutes.max(1);
    let opens = room.hours.opens_at(date);
    let closes = room.hours.closes_at(date);
    let close_ms = to_ms(closes);
    let on_room: Vec<&Reservation> = reservations.iter().filter(|r| r.room_id == room.id).collect();
    let selected = params
        .selected
        .map(|t| Span::starting_at(date.and_time(t), params.booking_minutes));

    let mut slots = Vec::new();
    let mut start = opens;
    while start < closes {
        let end = (start + minutes(step)).min(closes);
        let window = Span::new(to_ms(start), to_ms(end));
        let blocker = find_conflict(on_room.iter().copied(), &window, None);

        let booking = Span::starting_at(start, params.booking_minutes);
        let fits = booking.end <= close_ms && find_conflict(on_room.iter().copied(), &booking, None).is_none();
        let is_selectable = blocker.is_none() && start > params.now && fits;

        slots.push(TimeSlot {
            start: start.time(),
            end: end.time(),
            status: if blocker.is_some() {
                SlotStatus::Blocked
            } else {
                SlotStatus::Available
            },
            is_selectable,
            is_in_selected_block: selected.is_some_and(|s| s.contains_instant(window.start)),
            blocked_by: blocker.map(|r| r.id),
        });
        start = end;
    }
    slots
}
