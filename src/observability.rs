use std::sync::OnceLock;

use tracing_subscriber::{fmt, EnvFilter};

// ── Lifecycle metrics ───────────────────────────────────────────

/// Counter: reservation requests persisted as pending.
pub const REQUESTS_CREATED_TOTAL: &str = "stayline_requests_created_total";

/// Counter: owner decisions. Labels: outcome (approved, rejected).
pub const DECISIONS_TOTAL: &str = "stayline_decisions_total";

/// Counter: creations refused because the dates were taken.
pub const AVAILABILITY_CONFLICTS_TOTAL: &str = "stayline_availability_conflicts_total";

/// Counter: approvals refused by the commit-time re-check. Labels: cause.
pub const BOOKING_CONFLICTS_TOTAL: &str = "stayline_booking_conflicts_total";

/// Counter: notifications the dispatcher failed to deliver.
pub const NOTIFICATION_FAILURES_TOTAL: &str = "stayline_notification_failures_total";

/// Counter: stale pending requests rejected by the sweeper.
pub const SWEPT_REQUESTS_TOTAL: &str = "stayline_swept_requests_total";

// ── WAL metrics ─────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "stayline_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "stayline_wal_flush_batch_size";

static LOGGING: OnceLock<()> = OnceLock::new();

/// Install the fmt subscriber, filtered by `RUST_LOG` (default `info`).
/// Safe to call more than once; only the first call installs anything.
pub fn init_logging() {
    LOGGING.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let installed = fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_line_number(true)
            .try_init()
            .is_ok();
        if installed {
            tracing::info!("logging initialized");
        }
    });
}

/// Metric label for a decision outcome.
pub fn decision_label(approved: bool) -> &'static str {
    if approved { "approved" } else { "rejected" }
}
