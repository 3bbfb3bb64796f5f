//! Reservation status machine.
//!
//! ```text
//! pending ──► confirmed ──► in_progress ──► completed
//!    │            │
//!    └────────────┴──► cancelled
//! ```
//!
//! `completed` and `cancelled` are terminal. Only `cancelled` releases the
//! reservation's time window.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    #[default]
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
}

impl ReservationStatus {
    pub const ALL: [ReservationStatus; 5] = [
        ReservationStatus::Pending,
        ReservationStatus::Confirmed,
        ReservationStatus::InProgress,
        ReservationStatus::Completed,
        ReservationStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::InProgress => "in_progress",
            ReservationStatus::Completed => "completed",
            ReservationStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ReservationStatus::Completed | ReservationStatus::Cancelled)
    }

    pub fn can_transition_to(self, to: ReservationStatus) -> bool {
        use ReservationStatus::*;
        match (self, to) {
            (Pending, Confirmed) | (Pending, Cancelled) => true,
            (Confirmed, InProgress) | (Confirmed, Cancelled) => true,
            (InProgress, Completed) => true,
            (Pending, _) | (Confirmed, _) | (InProgress, _) | (Completed, _) | (Cancelled, _) => false,
        }
    }

    pub fn allowed_targets(self) -> Vec<ReservationStatus> {
        Self::ALL
            .into_iter()
            .filter(|to| self.can_transition_to(*to))
            .collect()
    }

    /// Validate a transition, returning the target state on success.
    pub fn transition(self, to: ReservationStatus) -> Result<ReservationStatus, InvalidTransition> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(InvalidTransition { from: self, to })
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown reservation status: {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for ReservationStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == normalized)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid status transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ReservationStatus,
    pub to: ReservationStatus,
}

#[cfg(test)]
mod tests {
    use super::ReservationStatus::*;
    use super::*;

    #[test]
    fn allowed_transitions() {
        let allowed = [
            (Pending, Confirmed),
            (Pending, Cancelled),
            (Confirmed, InProgress),
            (Confirmed, Cancelled),
            (InProgress, Completed),
        ];
        for from in ReservationStatus::ALL {
            for to in ReservationStatus::ALL {
                let expected = allowed.contains(&(from, to));
                assert_eq!(from.can_transition_to(to), expected, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        assert!(Completed.allowed_targets().is_empty());
        assert!(Cancelled.allowed_targets().is_empty());
        assert!(Completed.is_terminal());
        assert!(!InProgress.is_terminal());
    }

    #[test]
    fn same_state_is_not_a_transition() {
        let err = Pending.transition(Pending).unwrap_err();
        assert_eq!(err, InvalidTransition { from: Pending, to: Pending });
    }

    #[test]
    fn transition_names_both_states() {
        assert_eq!(Pending.transition(Confirmed), Ok(Confirmed));
        let err = InProgress.transition(Cancelled).unwrap_err();
        assert_eq!(err.from, InProgress);
        assert_eq!(err.to, Cancelled);
    }

    #[test]
    fn parse_status_names() {
        assert_eq!("pending".parse::<ReservationStatus>(), Ok(Pending));
        assert_eq!("IN_PROGRESS".parse::<ReservationStatus>(), Ok(InProgress));
        assert_eq!("in-progress".parse::<ReservationStatus>(), Ok(InProgress));
        assert!("done".parse::<ReservationStatus>().is_err());
        for st in ReservationStatus::ALL {
            assert_eq!(st.to_string().parse::<ReservationStatus>(), Ok(st));
        }
    }

    #[test]
    fn errors_render_through_error_trait() {
        let errors: Vec<Box<dyn std::error::Error>> = vec![
            Box::new(Confirmed.transition(Pending).unwrap_err()),
            Box::new("done".parse::<ReservationStatus>().unwrap_err()),
        ];
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        assert_eq!(
            messages,
            vec![
                "invalid status transition: confirmed -> pending".to_string(),
                "unknown reservation status: \"done\"".to_string(),
            ]
        );
    }

    #[test]
    fn serde_uses_snake_case() {
        assert_eq!(serde_json::to_string(&InProgress).unwrap(), "\"in_progress\"");
    }
}
