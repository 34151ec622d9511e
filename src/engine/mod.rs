mod availability;
mod error;
mod mutations;
mod pricing;
mod queries;
mod validation;

pub use availability::{check_stay, free_ranges, is_available, merge_overlapping, subtract_ranges, unavailable_dates};
pub use error::{EngineError, Unavailable, ValidationError, ValidationReason};
pub use pricing::{price, select_tier};

use std::io;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};

use crate::catalog::{validate_config, PropertyCatalog};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::model::*;
use crate::notify::{LogDispatcher, NotificationDispatcher, Notifier, NotifyHub};
use crate::wal::Wal;

pub type SharedPropertyState = Arc<RwLock<PropertyState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit:
/// take the first append, drain whatever else is already queued, fsync once,
/// answer everyone.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    // Flush first so the command sees every append queued before it.
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after an append error so half-written bytes don't leak into
    // the next batch.
    let flushed = wal.flush_sync();
    let result = result.and(flushed);

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// External services the engine calls into.
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn PropertyCatalog>,
    pub dispatcher: Arc<dyn NotificationDispatcher>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Catalog plus log-only notifications and the system clock.
    pub fn new(catalog: Arc<dyn PropertyCatalog>) -> Self {
        Self {
            catalog,
            dispatcher: Arc::new(LogDispatcher),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

pub struct Engine {
    pub(super) state: DashMap<PropertyId, SharedPropertyState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) notifier: Notifier,
    pub(super) catalog: Arc<dyn PropertyCatalog>,
    pub(super) clock: Arc<dyn Clock>,
    /// Reverse lookup: reservation id → property id.
    pub(super) reservation_to_property: DashMap<ReservationId, PropertyId>,
    /// Every mutation holds this shared before touching a property lock;
    /// compaction holds it exclusively so no append can slip past the rewrite.
    pub(super) write_gate: RwLock<()>,
    pub(super) approval_lock_timeout: Duration,
}

/// Apply an event to a property. The caller holds its write lock.
fn apply_to_property(ps: &mut PropertyState, event: &Event, index: &DashMap<ReservationId, PropertyId>) {
    match event {
        Event::ReservationRequested { reservation } => {
            index.insert(reservation.id, reservation.property_id);
            ps.reservations.insert(reservation.id, (**reservation).clone());
        }
        Event::ReservationApproved { id, decided_at, .. } => {
            if let Some(r) = ps.reservations.get_mut(id) {
                r.status = ReservationStatus::Approved;
                r.decided_at = Some(*decided_at);
                ps.calendar.insert_approved(ApprovedStay {
                    reservation_id: r.id,
                    stay: r.stay,
                });
            }
        }
        Event::ReservationRejected { id, decided_at, .. } => {
            if let Some(r) = ps.reservations.get_mut(id) {
                r.status = ReservationStatus::Rejected;
                r.decided_at = Some(*decided_at);
            }
        }
        Event::DatesBlocked { dates, .. } => {
            for date in dates {
                ps.calendar.block(*date);
            }
        }
        Event::DatesUnblocked { dates, .. } => {
            for date in dates {
                ps.calendar.unblock(*date);
            }
        }
    }
}

impl Engine {
    /// Replay the WAL under `config.data_dir` and start the writer task.
    /// Must be called inside a tokio runtime.
    pub fn new(config: &EngineConfig, collaborators: Collaborators) -> Result<Self, EngineError> {
        config.validate()?;
        let wal_path = config.wal_path();
        let events = Wal::replay(&wal_path).map_err(|e| EngineError::WalError(e.to_string()))?;
        let wal = Wal::open(&wal_path).map_err(|e| EngineError::WalError(e.to_string()))?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify: Arc::new(NotifyHub::new(config.event_channel_capacity)),
            notifier: Notifier::new(collaborators.dispatcher),
            catalog: collaborators.catalog,
            clock: collaborators.clock,
            reservation_to_property: DashMap::new(),
            write_gate: RwLock::new(()),
            approval_lock_timeout: config.approval_lock_timeout,
        };

        // We're the sole owner of these Arcs, so try_write never contends.
        // Never use blocking_write here: this runs inside an async context.
        for event in &events {
            let rs = engine.property_or_insert(event.property_id());
            let Ok(mut guard) = rs.try_write() else {
                return Err(EngineError::WalError("replay: property lock contended".into()));
            };
            apply_to_property(&mut guard, event, &engine.reservation_to_property);
        }
        tracing::info!(
            events = events.len(),
            properties = engine.state.len(),
            reservations = engine.reservation_to_property.len(),
            "reservation log replayed"
        );

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_property(&self, id: &PropertyId) -> Option<SharedPropertyState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub(super) fn property_or_insert(&self, id: PropertyId) -> SharedPropertyState {
        self.state
            .entry(id)
            .or_insert_with(|| Arc::new(RwLock::new(PropertyState::new(id))))
            .value()
            .clone()
    }

    pub fn property_for_reservation(&self, id: &ReservationId) -> Option<PropertyId> {
        self.reservation_to_property.get(id).map(|e| *e.value())
    }

    pub fn today(&self) -> chrono::NaiveDate {
        self.clock.today()
    }

    /// WAL-append + apply + broadcast. Caller holds the write gate and the
    /// property's write lock.
    pub(super) async fn persist_and_apply(&self, ps: &mut PropertyState, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_property(ps, event, &self.reservation_to_property);
        self.notify.send(ps.id, event);
        Ok(())
    }

    /// Lookup reservation → property state.
    pub(super) fn resolve_reservation(&self, id: &ReservationId) -> Result<(PropertyId, SharedPropertyState), EngineError> {
        let property_id = self
            .property_for_reservation(id)
            .ok_or(EngineError::ReservationNotFound(*id))?;
        let rs = self
            .get_property(&property_id)
            .ok_or(EngineError::PropertyNotFound(property_id))?;
        Ok((property_id, rs))
    }

    /// Catalog lookup. Configs are re-validated here since the catalog may be
    /// any implementation.
    pub(super) async fn booking_config(&self, property_id: PropertyId) -> Result<PropertyBookingConfig, EngineError> {
        let config = self
            .catalog
            .booking_config(property_id)
            .await?
            .ok_or(EngineError::PropertyNotFound(property_id))?;
        validate_config(&config)?;
        Ok(config)
    }

    /// Fetch the config and check `caller` owns the property.
    pub(super) async fn require_owner(&self, property_id: PropertyId, caller: UserId) -> Result<PropertyBookingConfig, EngineError> {
        let config = self.booking_config(property_id).await?;
        if config.owner_id != caller {
            return Err(EngineError::NotOwner { caller, property_id });
        }
        Ok(config)
    }
}
