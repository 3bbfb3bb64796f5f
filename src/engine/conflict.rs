use chrono::NaiveDateTime;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// Earliest-starting blocking reservation whose window overlaps `window`.
///
/// Cancelled reservations and `exclude` (the reservation being edited) never
/// conflict. Equal starts fall back to id order so the answer is deterministic.
pub fn find_conflict<'a>(
    candidates: impl IntoIterator<Item = &'a Reservation>,
    window: &Span,
    exclude: Option<Ulid>,
) -> Option<&'a Reservation> {
    candidates
        .into_iter()
        .filter(|r| r.blocks() && Some(r.id) != exclude)
        .filter(|r| r.span().overlaps(window))
        .min_by_key(|r| (r.scheduled_at, r.id))
}

/// Commit-time overlap test, run while the room's write lock is held.
pub(crate) fn check_no_conflict(rs: &RoomState, window: &Span, exclude: Option<Ulid>) -> Result<(), EngineError> {
    match find_conflict(rs.overlapping(window), window, exclude) {
        Some(existing) => {
            metrics::counter!(crate::observability::CONFLICTS_TOTAL, "stage" => "commit").increment(1);
            Err(EngineError::Conflict {
                reservation_id: existing.id,
                scheduled_at: existing.scheduled_at,
            })
        }
        None => Ok(()),
    }
}

fn check_len(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

fn check_opt_len(value: &Option<String>, max: usize, what: &'static str) -> Result<(), EngineError> {
    value.as_deref().map_or(Ok(()), |v| check_len(v, max, what))
}

pub(crate) fn validate_room(room: &Room) -> Result<(), EngineError> {
    if room.name.trim().is_empty() {
        return Err(EngineError::validation("NAME_REQUIRED", "room name is required"));
    }
    check_len(&room.name, MAX_NAME_LEN, "room name too long")?;
    if !room.hours.is_valid() {
        return Err(EngineError::validation(
            "INVALID_HOURS",
            format!(
                "operating hours must open before they close ({} - {})",
                room.hours.open, room.hours.close
            ),
        ));
    }
    Ok(())
}

pub(crate) fn validate_reservation(r: &Reservation) -> Result<(), EngineError> {
    if r.duration_minutes == 0 || r.duration_minutes > MAX_DURATION_MINUTES {
        return Err(EngineError::validation(
            "INVALID_DURATION",
            format!("duration must be between 1 and {MAX_DURATION_MINUTES} minutes"),
        ));
    }
    if r.checked_ends_at().is_none() {
        return Err(EngineError::LimitExceeded("reservation ends past the supported calendar"));
    }
    check_len(&r.customer.name, MAX_SNAPSHOT_FIELD_LEN, "customer name too long")?;
    check_len(&r.customer.phone, MAX_SNAPSHOT_FIELD_LEN, "customer phone too long")?;
    check_opt_len(&r.customer.email, MAX_SNAPSHOT_FIELD_LEN, "customer email too long")?;
    check_opt_len(&r.customer.address, MAX_SNAPSHOT_FIELD_LEN, "customer address too long")?;
    check_len(&r.pet.name, MAX_SNAPSHOT_FIELD_LEN, "pet name too long")?;
    check_opt_len(&r.pet.species, MAX_SNAPSHOT_FIELD_LEN, "pet species too long")?;
    check_opt_len(&r.pet.breed, MAX_SNAPSHOT_FIELD_LEN, "pet breed too long")?;
    check_opt_len(&r.pet.death_reason, MAX_SNAPSHOT_FIELD_LEN, "death reason too long")?;
    check_opt_len(&r.memo, MAX_MEMO_LEN, "memo too long")?;
    if r.catalog.option_ids.len() > MAX_OPTION_IDS {
        return Err(EngineError::LimitExceeded("too many additional options"));
    }
    if let Some(w) = r.pet.weight_kg
        && !(w.is_finite() && w >= 0.0)
    {
        return Err(EngineError::validation("INVALID_WEIGHT", "pet weight must be a non-negative number"));
    }
    Ok(())
}
