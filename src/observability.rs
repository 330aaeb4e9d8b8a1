use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "lectern_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "lectern_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "lectern_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "lectern_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "lectern_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "lectern_tenants_active";

/// Counter: startup/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "lectern_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "lectern_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "lectern_wal_flush_batch_size";

// ── Domain counters ─────────────────────────────────────────────

/// Counter: appointments booked.
pub const BOOKINGS_TOTAL: &str = "lectern_bookings_total";

/// Counter: bookings that proceeded with the idempotency store unreachable.
/// Distinct from duplicate rejections on purpose — this is the degraded path.
pub const CLAIMS_FAILOPEN_TOTAL: &str = "lectern_claims_failopen_total";

/// Counter: expired idempotency claims swept by the reaper.
pub const CLAIMS_REAPED_TOTAL: &str = "lectern_claims_reaped_total";

/// Counter: payment reminders emitted.
pub const REMINDERS_EMITTED_TOTAL: &str = "lectern_reminders_emitted_total";

/// Counter: payments settled against a ledger.
pub const PAYMENTS_SETTLED_TOTAL: &str = "lectern_payments_settled_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertTemplate { .. } => "insert_template",
        Command::UpdateTemplate { .. } => "update_template",
        Command::DeactivateTemplate { .. } => "deactivate_template",
        Command::Expand { .. } => "expand_template",
        Command::InsertSlot { .. } => "insert_slot",
        Command::DisableSlot { .. } => "disable_slot",
        Command::InsertAppointment { .. } => "insert_appointment",
        Command::CancelAppointment { .. } => "cancel_appointment",
        Command::UpdateAppointment { .. } => "update_appointment",
        Command::InsertSession { .. } => "insert_session",
        Command::InsertPayment { .. } => "insert_payment",
        Command::UpdatePayment { .. } => "update_payment",
        Command::SetPaymentInterval { .. } => "set_payment_interval",
        Command::SelectTemplates { .. } => "select_templates",
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectAppointments { .. } => "select_appointments",
        Command::SelectLedgers { .. } => "select_ledgers",
        Command::SelectSessions { .. } => "select_sessions",
        Command::SelectPayments { .. } => "select_payments",
        Command::Listen { .. } => "listen",
    }
}
