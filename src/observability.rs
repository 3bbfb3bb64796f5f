use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use tracing_subscriber::EnvFilter;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: reservation writes. Labels: op, outcome.
pub const RESERVATIONS_TOTAL: &str = "vigil_reservations_total";

/// Counter: overlap conflicts detected. Labels: stage (advisory, commit).
pub const CONFLICTS_TOTAL: &str = "vigil_conflicts_total";

/// Histogram: scheduler operation latency in seconds. Labels: op.
pub const OPERATION_DURATION_SECONDS: &str = "vigil_operation_duration_seconds";

// ── Booking cache ───────────────────────────────────────────────

/// Counter: month lookups. Labels: result (hit, miss, stale).
pub const CACHE_REQUESTS_TOTAL: &str = "vigil_cache_requests_total";

/// Counter: failed month fetches (last-known-good data kept).
pub const CACHE_FETCH_ERRORS_TOTAL: &str = "vigil_cache_fetch_errors_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "vigil_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (events per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "vigil_journal_flush_batch_size";

/// Install the fmt subscriber on stderr. `RUST_LOG` wins over `default_filter`.
pub fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init_metrics(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Outcome label for `RESERVATIONS_TOTAL`.
pub fn outcome_label<T>(result: &Result<T, crate::engine::EngineError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => match e.code() {
            "CONFLICT" => "conflict",
            "PERSISTENCE_ERROR" => "error",
            _ => "rejected",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineError;
    use chrono::NaiveDate;
    use ulid::Ulid;

    #[test]
    fn outcome_labels() {
        let ok: Result<(), EngineError> = Ok(());
        assert_eq!(outcome_label(&ok), "ok");
        let scheduled_at = NaiveDate::from_ymd_opt(2030, 5, 2)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        let conflict: Result<(), _> = Err(EngineError::Conflict {
            reservation_id: Ulid::new(),
            scheduled_at,
        });
        assert_eq!(outcome_label(&conflict), "conflict");
        let past: Result<(), _> = Err(EngineError::PastDate(scheduled_at.date()));
        assert_eq!(outcome_label(&past), "rejected");
        let io: Result<(), _> = Err(EngineError::Persistence("disk full".into()));
        assert_eq!(outcome_label(&io), "error");
    }

    #[test]
    fn metrics_disabled_without_port() {
        assert!(init_metrics(None).is_ok());
    }
}
