use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: slots created by tutors.
pub const SLOTS_CREATED_TOTAL: &str = "tutorgrid_slots_created_total";

/// Counter: slots deleted by tutors.
pub const SLOTS_DELETED_TOTAL: &str = "tutorgrid_slots_deleted_total";

/// Counter: reservations created by students.
pub const RESERVATIONS_CREATED_TOTAL: &str = "tutorgrid_reservations_created_total";

/// Counter: reservations cancelled by students.
pub const RESERVATIONS_CANCELLED_TOTAL: &str = "tutorgrid_reservations_cancelled_total";

/// Counter: rejected mutations (overlap, duplicate start, already booked).
pub const BOOKING_CONFLICTS_TOTAL: &str = "tutorgrid_booking_conflicts_total";

/// Counter: availability queries answered (both roles).
pub const AVAILABILITY_QUERIES_TOTAL: &str = "tutorgrid_availability_queries_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "tutorgrid_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "tutorgrid_wal_flush_batch_size";

/// Install the global tracing subscriber. Call once from the host process.
pub fn init_tracing() {
    tracing_subscriber::fmt::init();
}

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init_metrics(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
