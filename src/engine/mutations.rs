use chrono::NaiveDate;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::NotificationKind;
use crate::observability::{self, decision_label};

use super::availability::check_stay;
use super::error::Unavailable;
use super::pricing::price;
use super::validation::{validate_block_dates, validate_request};
use super::{Engine, EngineError, WalCommand};

fn ensure_pending(r: &Reservation, to: ReservationStatus) -> Result<(), EngineError> {
    if r.is_pending() {
        Ok(())
    } else {
        Err(EngineError::InvalidStateTransition {
            reservation_id: r.id,
            from: r.status,
            to,
        })
    }
}

/// The single night starting on `date`.
fn night_of(date: NaiveDate) -> Option<StayRange> {
    date.succ_opt().map(|next| StayRange::new(date, next))
}

impl Engine {
    /// Validate, check availability, price and persist a request as pending.
    ///
    /// Overlapping pending requests may coexist; only approval is exclusive.
    pub async fn create_request(&self, req: NewReservation) -> Result<Reservation, EngineError> {
        let config = self.booking_config(req.property_id).await?;
        let today = self.clock.today();
        let stay = validate_request(&req, &config, today)?;

        let _gate = self.write_gate.read().await;
        let rs = self.property_or_insert(req.property_id);
        let mut guard = rs.write().await;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_PROPERTY {
            return Err(EngineError::LimitExceeded("too many reservations on property"));
        }

        if let Err(cause) = check_stay(&guard.calendar, &stay, today) {
            metrics::counter!(observability::AVAILABILITY_CONFLICTS_TOTAL).increment(1);
            debug!(property_id = %req.property_id, %stay, %cause, "request refused");
            return Err(EngineError::AvailabilityConflict(cause));
        }

        let quote = price(&config, stay.nights())?;
        let contact_phone = if req.share_phone {
            req.contact_phone.map(|p| p.trim().to_string())
        } else {
            None
        };
        let reservation = Reservation {
            id: Ulid::new(),
            property_id: req.property_id,
            requester_id: req.requester_id,
            owner_id: config.owner_id,
            stay,
            nights: quote.nights,
            price_per_night: quote.price_per_night,
            currency: quote.currency,
            applied_discount_percent: quote.applied_percent,
            total_price: quote.total,
            savings: quote.savings,
            status: ReservationStatus::Pending,
            message: req.message,
            share_phone: req.share_phone,
            contact_phone,
            created_at: self.clock.now(),
            decided_at: None,
        };

        let event = Event::ReservationRequested {
            reservation: Box::new(reservation.clone()),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        drop(guard);

        metrics::counter!(observability::REQUESTS_CREATED_TOTAL).increment(1);
        info!(
            reservation_id = %reservation.id,
            property_id = %reservation.property_id,
            %stay,
            total = reservation.total_price,
            "reservation requested"
        );
        self.notifier.notify(config.owner_id, NotificationKind::Requested, &reservation);
        Ok(reservation)
    }

    /// Owner approval. The availability re-check and the status commit run
    /// under the property's write lock, so two overlapping approvals can never
    /// both land. Lock acquisition is bounded; past the bound this fails with
    /// `BookingConflict` instead of queueing.
    pub async fn approve(&self, reservation_id: ReservationId, caller: UserId) -> Result<Reservation, EngineError> {
        let (property_id, rs) = self.resolve_reservation(&reservation_id)?;
        self.require_owner(property_id, caller).await?;

        let acquire = async {
            let gate = self.write_gate.read().await;
            let guard = rs.write_owned().await;
            (gate, guard)
        };
        let (_gate, mut guard) = match tokio::time::timeout(self.approval_lock_timeout, acquire).await {
            Ok(locked) => locked,
            Err(_) => {
                metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL, "cause" => "contended").increment(1);
                warn!(%reservation_id, "approval timed out waiting for property lock");
                return Err(EngineError::BookingConflict {
                    reservation_id,
                    cause: Unavailable::Contended,
                });
            }
        };

        let current = guard
            .reservations
            .get(&reservation_id)
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;
        ensure_pending(current, ReservationStatus::Approved)?;
        let stay = current.stay;

        // Fresh state, read under the same lock as the commit below.
        if let Err(cause) = check_stay(&guard.calendar, &stay, self.clock.today()) {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL, "cause" => "unavailable").increment(1);
            info!(%reservation_id, %stay, %cause, "approval refused, request stays pending");
            return Err(EngineError::BookingConflict { reservation_id, cause });
        }

        let event = Event::ReservationApproved {
            id: reservation_id,
            property_id,
            decided_at: self.clock.now(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let approved = guard
            .reservations
            .get(&reservation_id)
            .cloned()
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;
        drop(guard);

        metrics::counter!(observability::DECISIONS_TOTAL, "outcome" => decision_label(true)).increment(1);
        info!(%reservation_id, %property_id, %stay, "reservation approved");
        self.notifier.notify(approved.requester_id, NotificationKind::Approved, &approved);
        Ok(approved)
    }

    /// Owner rejection. No availability check.
    pub async fn reject(&self, reservation_id: ReservationId, caller: UserId) -> Result<Reservation, EngineError> {
        let (property_id, rs) = self.resolve_reservation(&reservation_id)?;
        self.require_owner(property_id, caller).await?;

        let _gate = self.write_gate.read().await;
        let mut guard = rs.write().await;
        let current = guard
            .reservations
            .get(&reservation_id)
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;
        ensure_pending(current, ReservationStatus::Rejected)?;

        let event = Event::ReservationRejected {
            id: reservation_id,
            property_id,
            decided_at: self.clock.now(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let rejected = guard
            .reservations
            .get(&reservation_id)
            .cloned()
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;
        drop(guard);

        metrics::counter!(observability::DECISIONS_TOTAL, "outcome" => decision_label(false)).increment(1);
        info!(%reservation_id, %property_id, "reservation rejected");
        self.notifier.notify(rejected.requester_id, NotificationKind::Rejected, &rejected);
        Ok(rejected)
    }

    /// Owner removes dates from availability. Returns the dates that were
    /// newly blocked. A date inside an approved stay is refused.
    pub async fn block_dates(
        &self,
        property_id: PropertyId,
        caller: UserId,
        dates: &[NaiveDate],
    ) -> Result<Vec<NaiveDate>, EngineError> {
        if dates.len() > MAX_BLOCK_BATCH {
            return Err(EngineError::LimitExceeded("too many dates in one call"));
        }
        self.require_owner(property_id, caller).await?;
        validate_block_dates(dates, self.clock.today())?;

        let _gate = self.write_gate.read().await;
        let rs = self.property_or_insert(property_id);
        let mut guard = rs.write().await;

        for &date in dates {
            let Some(night) = night_of(date) else { continue };
            if let Some(hit) = guard.calendar.overlapping(&night).next() {
                return Err(EngineError::DateReserved {
                    date,
                    reservation_id: hit.reservation_id,
                });
            }
        }

        let mut fresh: Vec<NaiveDate> = dates
            .iter()
            .copied()
            .filter(|d| !guard.calendar.blocked().contains(d))
            .collect();
        fresh.sort();
        fresh.dedup();
        if fresh.is_empty() {
            return Ok(fresh);
        }

        let event = Event::DatesBlocked {
            property_id,
            dates: fresh.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(%property_id, count = fresh.len(), "dates blocked");
        Ok(fresh)
    }

    /// Owner re-opens dates. Dates that were not blocked are ignored; returns
    /// the dates actually unblocked.
    pub async fn unblock_dates(
        &self,
        property_id: PropertyId,
        caller: UserId,
        dates: &[NaiveDate],
    ) -> Result<Vec<NaiveDate>, EngineError> {
        if dates.len() > MAX_BLOCK_BATCH {
            return Err(EngineError::LimitExceeded("too many dates in one call"));
        }
        self.require_owner(property_id, caller).await?;

        let _gate = self.write_gate.read().await;
        let Some(rs) = self.get_property(&property_id) else {
            return Ok(Vec::new());
        };
        let mut guard = rs.write().await;

        let mut released: Vec<NaiveDate> = dates
            .iter()
            .copied()
            .filter(|d| guard.calendar.blocked().contains(d))
            .collect();
        released.sort();
        released.dedup();
        if released.is_empty() {
            return Ok(released);
        }

        let event = Event::DatesUnblocked {
            property_id,
            dates: released.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(%property_id, count = released.len(), "dates unblocked");
        Ok(released)
    }

    /// Rewrite the WAL with only the events needed to recreate current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.write_gate.write().await;

        let properties: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::new();
        for rs in properties {
            let guard = rs.read().await;
            let blocked: Vec<NaiveDate> = guard.calendar.blocked().iter().copied().collect();
            if !blocked.is_empty() {
                events.push(Event::DatesBlocked {
                    property_id: guard.id,
                    dates: blocked,
                });
            }

            let mut reservations: Vec<&Reservation> = guard.reservations.values().collect();
            reservations.sort_by_key(|r| (r.created_at, r.id));
            for r in reservations {
                let mut requested = r.clone();
                requested.status = ReservationStatus::Pending;
                requested.decided_at = None;
                events.push(Event::ReservationRequested {
                    reservation: Box::new(requested),
                });
                match (r.status, r.decided_at) {
                    (ReservationStatus::Approved, Some(decided_at)) => events.push(Event::ReservationApproved {
                        id: r.id,
                        property_id: r.property_id,
                        decided_at,
                    }),
                    (ReservationStatus::Rejected, Some(decided_at)) => events.push(Event::ReservationRejected {
                        id: r.id,
                        property_id: r.property_id,
                        decided_at,
                    }),
                    _ => {}
                }
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
