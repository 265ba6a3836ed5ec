use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: reservations inserted as Pending.
pub const RESERVATIONS_CREATED_TOTAL: &str = "reserva_reservations_created_total";

/// Counter: confirm protocol commits.
pub const CONFIRMATIONS_TOTAL: &str = "reserva_confirmations_total";

/// Counter: confirms aborted by an already-committed winner.
pub const CONFIRM_CONFLICTS_TOTAL: &str = "reserva_confirm_conflicts_total";

/// Counter: open competitors cancelled by a winning confirm.
pub const AUTO_CANCELLATIONS_TOTAL: &str = "reserva_auto_cancellations_total";

/// Counter: slot computations served.
pub const SLOT_QUERIES_TOTAL: &str = "reserva_slot_queries_total";

// ── Background work ─────────────────────────────────────────────

/// Counter: reservations force-expired by the sweeper.
pub const EXPIRATIONS_TOTAL: &str = "reserva_expirations_total";

/// Counter: back-to-back predecessors auto-completed.
pub const DOMINO_COMPLETIONS_TOTAL: &str = "reserva_domino_completions_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "reserva_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "reserva_wal_flush_batch_size";

/// Install the Prometheus metrics exporter on the given port. No-op if
/// port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
