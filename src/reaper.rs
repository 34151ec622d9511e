use std::sync::Arc;
use std::time::Duration;

use futures::{stream, StreamExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::observability;

/// How often the compactor checks the WAL's append count.
const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Stale requests rejected concurrently per sweep.
const SWEEP_CONCURRENCY: usize = 8;

/// Reject every pending request whose check-in has passed, acting as the
/// property's current owner. Returns how many were rejected.
pub async fn sweep_once(engine: &Engine) -> usize {
    let stale = engine.collect_stale_requests(engine.today()).await;
    if stale.is_empty() {
        return 0;
    }

    let rejected = stream::iter(stale)
        .map(|(reservation_id, property_id)| async move {
            let owner = match engine.property_config(property_id).await {
                Ok(config) => config.owner_id,
                Err(e) => {
                    warn!(%reservation_id, %property_id, error = %e, "sweeper skip: no owner");
                    return false;
                }
            };
            match engine.reject(reservation_id, owner).await {
                Ok(_) => true,
                Err(e) => {
                    // May already have been decided since collection.
                    debug!(%reservation_id, error = %e, "sweeper skip");
                    false
                }
            }
        })
        .buffer_unordered(SWEEP_CONCURRENCY)
        .filter(|ok| std::future::ready(*ok))
        .count()
        .await;

    metrics::counter!(observability::SWEPT_REQUESTS_TOTAL).increment(rejected as u64);
    if rejected > 0 {
        info!(rejected, "swept stale reservation requests");
    }
    rejected
}

/// Background task that periodically rejects requests that can no longer be
/// approved.
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        sweep_once(&engine).await;
    }
}

/// Compact once the WAL has grown past `threshold` appends. Returns whether a
/// compaction ran.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!(appends, "compacted reservation log");
            true
        }
        Err(e) => {
            warn!(error = %e, "WAL compaction failed");
            false
        }
    }
}

pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_needed(&engine, threshold).await;
    }
}

/// Start the compactor, and the sweeper when `config.sweep_interval` is set.
pub fn spawn_background(engine: Arc<Engine>, config: &EngineConfig) -> Vec<JoinHandle<()>> {
    let mut handles = vec![tokio::spawn(run_compactor(engine.clone(), config.compact_threshold))];
    if let Some(every) = config.sweep_interval {
        handles.push(tokio::spawn(run_sweeper(engine, every)));
    }
    handles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::clock::FixedClock;
    use crate::engine::Collaborators;
    use crate::model::*;
    use chrono::NaiveDate;
    use ulid::Ulid;

    fn d(month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, month, day).unwrap()
    }

    struct Fixture {
        engine: Arc<Engine>,
        clock: Arc<FixedClock>,
        property_id: PropertyId,
        owner_id: UserId,
    }

    fn fixture(name: &str) -> Fixture {
        let dir = std::env::temp_dir().join(format!("stayline_test_reaper_{name}_{}", Ulid::new()));
        let config = EngineConfig::with_data_dir(dir);
        let property_id = Ulid::new();
        let owner_id = Ulid::new();
        let catalog = Arc::new(InMemoryCatalog::new());
        catalog
            .upsert(PropertyBookingConfig {
                property_id,
                owner_id,
                price_per_night: 100_000,
                currency: "UZS".into(),
                minimum_stay_nights: 1,
                discount_tiers: DiscountTiers::new(),
            })
            .unwrap();
        let clock = Arc::new(FixedClock::at_date(d(1, 1)));
        let engine = Engine::new(&config, Collaborators::new(catalog).with_clock(clock.clone())).unwrap();
        Fixture {
            engine: Arc::new(engine),
            clock,
            property_id,
            owner_id,
        }
    }

    async fn request(f: &Fixture, check_in: NaiveDate, check_out: NaiveDate) -> Reservation {
        f.engine
            .create_request(NewReservation {
                property_id: f.property_id,
                requester_id: Ulid::new(),
                check_in: Some(check_in),
                check_out: Some(check_out),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn sweeper_rejects_requests_past_check_in() {
        let f = fixture("stale");
        let early = request(&f, d(1, 5), d(1, 8)).await;
        let later = request(&f, d(2, 1), d(2, 3)).await;

        assert_eq!(sweep_once(&f.engine).await, 0);

        f.clock.set_date(d(1, 6));
        assert_eq!(sweep_once(&f.engine).await, 1);

        let early = f.engine.get_reservation(early.id).await.unwrap();
        assert_eq!(early.status, ReservationStatus::Rejected);
        let later = f.engine.get_reservation(later.id).await.unwrap();
        assert_eq!(later.status, ReservationStatus::Pending);

        // Nothing left to sweep.
        assert_eq!(sweep_once(&f.engine).await, 0);
    }

    #[tokio::test]
    async fn sweeper_leaves_decided_requests_alone() {
        let f = fixture("decided");
        let r = request(&f, d(1, 5), d(1, 8)).await;
        f.engine.approve(r.id, f.owner_id).await.unwrap();

        f.clock.set_date(d(1, 10));
        assert_eq!(sweep_once(&f.engine).await, 0);
        let r = f.engine.get_reservation(r.id).await.unwrap();
        assert_eq!(r.status, ReservationStatus::Approved);
    }

    #[tokio::test]
    async fn compact_if_needed_respects_threshold() {
        let f = fixture("compact");
        for day in 2..6 {
            request(&f, d(3, day), d(3, day + 1)).await;
        }
        assert!(!compact_if_needed(&f.engine, 100).await);
        assert!(compact_if_needed(&f.engine, 4).await);
        assert_eq!(f.engine.wal_appends_since_compact().await, 0);
        assert_eq!(f.engine.list_reservations(f.property_id, None).await.len(), 4);
    }
}
