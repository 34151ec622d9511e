use std::collections::BTreeSet;

use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;

use super::availability::{check_stay, free_ranges, unavailable_dates};
use super::pricing::price;
use super::validation::validate_stay;
use super::{Engine, EngineError};

fn check_window(window: &StayRange) -> Result<(), EngineError> {
    validate_stay(window)?;
    if window.nights() as i64 > MAX_CALENDAR_WINDOW_DAYS {
        return Err(EngineError::LimitExceeded("calendar window too wide"));
    }
    Ok(())
}

impl Engine {
    /// The catalog's current configuration for a property.
    pub async fn property_config(&self, property_id: PropertyId) -> Result<PropertyBookingConfig, EngineError> {
        self.booking_config(property_id).await
    }

    /// Price a stay with the property's current configuration. No
    /// availability or minimum-stay check.
    pub async fn quote(&self, property_id: PropertyId, stay: &StayRange) -> Result<Quote, EngineError> {
        validate_stay(stay)?;
        let config = self.booking_config(property_id).await?;
        price(&config, stay.nights())
    }

    /// Availability of `stay` against the current snapshot, with the reason
    /// when it is taken.
    pub async fn check_availability(&self, property_id: PropertyId, stay: &StayRange) -> Result<(), EngineError> {
        validate_stay(stay)?;
        self.booking_config(property_id).await?;
        let today = self.clock.today();
        let Some(rs) = self.get_property(&property_id) else {
            return check_stay(&Calendar::new(), stay, today).map_err(EngineError::AvailabilityConflict);
        };
        let guard = rs.read().await;
        check_stay(&guard.calendar, stay, today).map_err(EngineError::AvailabilityConflict)
    }

    pub async fn is_available(&self, property_id: PropertyId, stay: &StayRange) -> Result<bool, EngineError> {
        match self.check_availability(property_id, stay).await {
            Ok(()) => Ok(true),
            Err(EngineError::AvailabilityConflict(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Approved stays and blocked dates, read under one lock.
    pub async fn snapshot(&self, property_id: PropertyId) -> Calendar {
        match self.get_property(&property_id) {
            Some(rs) => rs.read().await.calendar.clone(),
            None => Calendar::new(),
        }
    }

    pub async fn get_reservation(&self, reservation_id: ReservationId) -> Result<Reservation, EngineError> {
        let (_, rs) = self.resolve_reservation(&reservation_id)?;
        let guard = rs.read().await;
        guard
            .reservations
            .get(&reservation_id)
            .cloned()
            .ok_or(EngineError::ReservationNotFound(reservation_id))
    }

    /// Reservations on a property ordered by check-in, optionally filtered.
    pub async fn list_reservations(
        &self,
        property_id: PropertyId,
        status: Option<ReservationStatus>,
    ) -> Vec<Reservation> {
        let Some(rs) = self.get_property(&property_id) else {
            return Vec::new();
        };
        let guard = rs.read().await;
        let mut out: Vec<Reservation> = guard
            .reservations
            .values()
            .filter(|r| status.is_none_or(|s| r.status == s))
            .cloned()
            .collect();
        out.sort_by_key(|r| (r.stay.check_in, r.created_at, r.id));
        out
    }

    /// Every reservation a user has requested, across properties, newest first.
    pub async fn reservations_for_requester(&self, requester_id: UserId) -> Vec<Reservation> {
        let properties: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for rs in properties {
            let guard = rs.read().await;
            out.extend(
                guard
                    .reservations
                    .values()
                    .filter(|r| r.requester_id == requester_id)
                    .cloned(),
            );
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        out
    }

    pub async fn approved_stays(&self, property_id: PropertyId) -> Vec<ApprovedStay> {
        self.snapshot(property_id).await.approved().to_vec()
    }

    pub async fn blocked_dates(&self, property_id: PropertyId) -> Vec<NaiveDate> {
        match self.get_property(&property_id) {
            Some(rs) => rs.read().await.calendar.blocked().iter().copied().collect(),
            None => Vec::new(),
        }
    }

    /// Dates a calendar widget should disable inside `window`.
    pub async fn unavailable_dates(
        &self,
        property_id: PropertyId,
        window: &StayRange,
    ) -> Result<BTreeSet<NaiveDate>, EngineError> {
        check_window(window)?;
        self.booking_config(property_id).await?;
        let calendar = self.snapshot(property_id).await;
        Ok(unavailable_dates(&calendar, window, self.clock.today()))
    }

    /// Maximal bookable ranges inside `window` at least `min_nights` long.
    /// `None` uses the property's minimum stay.
    pub async fn free_ranges(
        &self,
        property_id: PropertyId,
        window: &StayRange,
        min_nights: Option<u32>,
    ) -> Result<Vec<StayRange>, EngineError> {
        check_window(window)?;
        let config = self.booking_config(property_id).await?;
        let calendar = self.snapshot(property_id).await;
        let min = min_nights.unwrap_or(config.minimum_stay_nights);
        Ok(free_ranges(&calendar, window, self.clock.today(), min))
    }

    /// Pending requests whose check-in is before `today`. They can never be
    /// approved, so the sweeper rejects them on the owner's behalf.
    pub async fn collect_stale_requests(&self, today: NaiveDate) -> Vec<(ReservationId, PropertyId)> {
        let properties: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut stale = Vec::new();
        for rs in properties {
            let guard = rs.read().await;
            for r in guard.reservations.values() {
                if r.is_pending() && r.stay.check_in < today {
                    stale.push((r.id, r.property_id));
                }
            }
        }
        stale
    }
}
