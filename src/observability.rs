use std::net::SocketAddr;

use crate::engine::EngineError;
use crate::model::Proposal;

// ── Request-driven metrics ──────────────────────────────────────

/// Counter: create/update/delete proposals. Labels: kind, outcome.
pub const PROPOSALS_TOTAL: &str = "medsched_proposals_total";

/// Histogram: suggestions returned per rejected proposal.
pub const SUGGESTIONS_RETURNED: &str = "medsched_suggestions_returned";

/// Counter: seed records by outcome. Labels: outcome.
pub const SEED_RECORDS_TOTAL: &str = "medsched_seed_records_total";

// ── Storage ─────────────────────────────────────────────────────

/// Counter: events appended to the booking log. Labels: kind.
pub const WAL_APPENDS_TOTAL: &str = "medsched_wal_appends_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "medsched_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "medsched_wal_flush_batch_size";

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

/// Short label for a proposal result.
pub fn outcome_label(result: &Result<Proposal, EngineError>) -> &'static str {
    match result {
        Ok(Proposal::Accepted(_)) => "accepted",
        Ok(Proposal::Rejected(_)) => "rejected",
        Err(e) => error_label(e),
    }
}

pub fn error_label(error: &EngineError) -> &'static str {
    match error {
        EngineError::NotFound(_) => "not_found",
        EngineError::InvalidInput(_) => "invalid",
        EngineError::Store(_) => "store_failure",
    }
}
