use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use thiserror::Error;
use ulid::Ulid;

use crate::lifecycle::{InvalidTransition, ReservationStatus, UnknownStatus};

/// One rejected id of a bulk status update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkFailure {
    pub id: Ulid,
    pub code: &'static str,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{message}")]
    Validation { code: &'static str, message: String },
    #[error("cannot book {0}: date is in the past")]
    PastDate(NaiveDate),
    #[error("slot unavailable: overlaps reservation {reservation_id} at {scheduled_at}")]
    Conflict {
        reservation_id: Ulid,
        scheduled_at: NaiveDateTime,
    },
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Ulid },
    #[error("bulk update rejected: {} reservation(s) failed validation", .0.len())]
    BulkRejected(Vec<BulkFailure>),
    #[error("cannot delete room {0}: it still has reservations")]
    HasReservations(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl EngineError {
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        EngineError::Validation {
            code,
            message: message.into(),
        }
    }

    pub fn room_not_found(id: Ulid) -> Self {
        EngineError::NotFound { entity: "room", id }
    }

    pub fn reservation_not_found(id: Ulid) -> Self {
        EngineError::NotFound {
            entity: "reservation",
            id,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation { code, .. } => *code,
            EngineError::PastDate(_) => "PAST_DATE",
            EngineError::Conflict { .. } => "CONFLICT",
            EngineError::InvalidTransition { .. } => "INVALID_TRANSITION",
            EngineError::NotFound { .. } => "NOT_FOUND",
            EngineError::BulkRejected(_) => "BULK_REJECTED",
            EngineError::HasReservations(_) => "HAS_RESERVATIONS",
            EngineError::AlreadyExists(_) => "ALREADY_EXISTS",
            EngineError::LimitExceeded(_) => "LIMIT_EXCEEDED",
            EngineError::Persistence(_) => "PERSISTENCE_ERROR",
        }
    }
}

impl From<InvalidTransition> for EngineError {
    fn from(e: InvalidTransition) -> Self {
        EngineError::InvalidTransition { from: e.from, to: e.to }
    }
}

impl From<UnknownStatus> for EngineError {
    fn from(e: UnknownStatus) -> Self {
        EngineError::validation("INVALID_STATUS", e.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Persistence(e.to_string())
    }
}
