use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use ulid::Ulid;

use stayline::catalog::InMemoryCatalog;
use stayline::clock::FixedClock;
use stayline::config::EngineConfig;
use stayline::engine::Unavailable;
use stayline::model::{Event, NewReservation, ReservationStatus, StayRange};
use stayline::{reaper, Collaborators, Engine, EngineError};

// ── Test infrastructure ──────────────────────────────────────

fn d(month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, month, day).unwrap()
}

fn catalog_json(property_id: Ulid, owner_id: Ulid) -> String {
    format!(
        r#"[{{
            "property_id": "{property_id}",
            "owner_id": "{owner_id}",
            "price_per_night": 250000,
            "currency": "UZS",
            "minimum_stay_nights": 2,
            "discount_tiers": {{ "3": 5, "7": 10, "30": 25 }}
        }}]"#
    )
}

struct Stack {
    engine: Arc<Engine>,
    config: EngineConfig,
    clock: Arc<FixedClock>,
    catalog: Arc<InMemoryCatalog>,
    property_id: Ulid,
    owner_id: Ulid,
}

fn start(name: &str) -> Stack {
    stayline::observability::init_logging();
    let dir = std::env::temp_dir().join(format!("stayline_int_test_{name}_{}", Ulid::new()));
    let mut config = EngineConfig::with_data_dir(dir);
    config.sweep_interval = Some(Duration::from_millis(20));

    let property_id = Ulid::new();
    let owner_id = Ulid::new();
    let catalog = Arc::new(InMemoryCatalog::from_json(&catalog_json(property_id, owner_id)).unwrap());
    let clock = Arc::new(FixedClock::at_date(d(6, 1)));
    let collaborators = Collaborators::new(catalog.clone()).with_clock(clock.clone());
    let engine = Arc::new(Engine::new(&config, collaborators).unwrap());
    Stack {
        engine,
        config,
        clock,
        catalog,
        property_id,
        owner_id,
    }
}

impl Stack {
    fn ask(&self, check_in: NaiveDate, check_out: NaiveDate) -> NewReservation {
        NewReservation {
            property_id: self.property_id,
            requester_id: Ulid::new(),
            check_in: Some(check_in),
            check_out: Some(check_out),
            message: Some("Arriving late, around 22:00".into()),
            ..Default::default()
        }
    }

    fn restart(&self) -> Engine {
        let collaborators = Collaborators::new(self.catalog.clone()).with_clock(self.clock.clone());
        Engine::new(&self.config, collaborators).unwrap()
    }
}

// ── Lifecycle ────────────────────────────────────────────────

#[tokio::test]
async fn full_booking_lifecycle() {
    let s = start("lifecycle");
    let mut events = s.engine.notify.subscribe(s.property_id);

    // A week picks the 7-night tier; gaps in the table fall through.
    let quote = s
        .engine
        .quote(s.property_id, &StayRange::new(d(6, 10), d(6, 17)))
        .await
        .unwrap();
    assert_eq!(quote.applied_percent, 10);
    assert_eq!(quote.total, 1_575_000);
    let quote = s
        .engine
        .quote(s.property_id, &StayRange::new(d(6, 10), d(6, 24)))
        .await
        .unwrap();
    assert_eq!(quote.applied_percent, 10);

    let first = s.engine.create_request(s.ask(d(6, 10), d(6, 17))).await.unwrap();
    let second = s.engine.create_request(s.ask(d(6, 15), d(6, 19))).await.unwrap();
    assert_eq!(second.applied_discount_percent, 5);

    let approved = s.engine.approve(first.id, s.owner_id).await.unwrap();
    assert_eq!(approved.status, ReservationStatus::Approved);
    assert!(approved.decided_at.is_some());

    match s.engine.approve(second.id, s.owner_id).await {
        Err(EngineError::BookingConflict { cause: Unavailable::Reserved { reservation_id, .. }, .. }) => {
            assert_eq!(reservation_id, first.id)
        }
        other => panic!("expected booking conflict, got {other:?}"),
    }
    s.engine.reject(second.id, s.owner_id).await.unwrap();

    // Check-out day opens for the next guest.
    let next = s.engine.create_request(s.ask(d(6, 17), d(6, 19))).await.unwrap();
    s.engine.approve(next.id, s.owner_id).await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(seen.len(), 6);
    assert!(matches!(seen[0], Event::ReservationRequested { .. }));
    assert!(matches!(seen[5], Event::ReservationApproved { id, .. } if id == next.id));

    let calendar = s.engine.snapshot(s.property_id).await;
    assert_eq!(calendar.approved().len(), 2);
}

#[tokio::test]
async fn state_survives_restart_and_compaction() {
    let s = start("restart");
    let r = s.engine.create_request(s.ask(d(7, 1), d(7, 4))).await.unwrap();
    s.engine.approve(r.id, s.owner_id).await.unwrap();
    s.engine
        .block_dates(s.property_id, s.owner_id, &[d(7, 10), d(7, 11)])
        .await
        .unwrap();
    s.engine.compact_wal().await.unwrap();
    let pending = s.engine.create_request(s.ask(d(8, 1), d(8, 3))).await.unwrap();

    let restarted = s.restart();
    assert_eq!(restarted.snapshot(s.property_id).await, s.engine.snapshot(s.property_id).await);
    assert_eq!(
        restarted.get_reservation(pending.id).await.unwrap().status,
        ReservationStatus::Pending
    );
    assert!(
        !restarted
            .is_available(s.property_id, &StayRange::new(d(7, 9), d(7, 12)))
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn background_sweeper_expires_stale_requests() {
    let s = start("sweeper");
    let stale = s.engine.create_request(s.ask(d(6, 3), d(6, 6))).await.unwrap();
    let handles = reaper::spawn_background(s.engine.clone(), &s.config);
    assert_eq!(handles.len(), 2);

    s.clock.set_date(d(6, 4));
    let mut status = ReservationStatus::Pending;
    for _ in 0..100 {
        status = s.engine.get_reservation(stale.id).await.unwrap().status;
        if status != ReservationStatus::Pending {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, ReservationStatus::Rejected);

    for handle in handles {
        handle.abort();
    }
}
