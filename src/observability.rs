use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: reservations persisted. Labels: kind (single, recurring).
pub const RESERVATIONS_CREATED_TOTAL: &str = "labbook_reservations_created_total";

/// Counter: recurrence occurrences dropped at creation. Labels: reason.
pub const OCCURRENCES_SKIPPED_TOTAL: &str = "labbook_occurrences_skipped_total";

/// Counter: requests rejected for overlapping a blocking reservation. Labels: operation.
pub const CONFLICTS_TOTAL: &str = "labbook_conflicts_total";

/// Counter: reservation status transitions. Labels: to.
pub const TRANSITIONS_TOTAL: &str = "labbook_transitions_total";

/// Counter: edit proposals resolved. Labels: resolution.
pub const PROPOSALS_RESOLVED_TOTAL: &str = "labbook_proposals_resolved_total";

/// Gauge: labs loaded in the engine.
pub const LABS_ACTIVE: &str = "labbook_labs_active";

// ── Persistence ─────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "labbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "labbook_wal_flush_batch_size";

/// Counter: WAL compactions. Labels: status.
pub const WAL_COMPACTIONS_TOTAL: &str = "labbook_wal_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Install a `fmt` subscriber for hosts that have not set one up.
/// Returns false if a global subscriber already exists.
pub fn init_logging() -> bool {
    tracing_subscriber::fmt().try_init().is_ok()
}
