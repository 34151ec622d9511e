use chrono::NaiveDate;
use thiserror::Error;
use ulid::Ulid;

use crate::config::ConfigError;
use crate::model::{ReservationId, ReservationStatus, StayRange};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationReason {
    #[error("is required")]
    Missing,
    #[error("must be after check-in")]
    NotAfterCheckIn,
    #[error("is in the past")]
    InPast,
    #[error("is more than {max_days} days ahead")]
    TooFarAhead { max_days: i64 },
    #[error("{requested} nights is below the minimum stay of {minimum}")]
    BelowMinimumStay { minimum: u32, requested: u32 },
    #[error("{requested} nights exceeds the maximum stay of {max}")]
    AboveMaximumStay { max: u32, requested: u32 },
    #[error("owners cannot book their own property")]
    SelfBooking,
    #[error("is required when sharing a phone number")]
    PhoneRequired,
    #[error("exceeds {max} bytes")]
    TooLong { max: usize },
}

/// Field-level rejection of a request. `field` uses the API's camelCase names
/// so callers can attach the message to a form input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field} {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: ValidationReason,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: ValidationReason) -> Self {
        Self { field, reason }
    }
}

/// Why a stay cannot be taken.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Unavailable {
    #[error("check-in {check_in} is before today ({today})")]
    CheckInPassed { check_in: NaiveDate, today: NaiveDate },
    #[error("{0} is blocked by the owner")]
    Blocked(NaiveDate),
    #[error("overlaps approved reservation {reservation_id} {stay}")]
    Reserved {
        reservation_id: ReservationId,
        stay: StayRange,
    },
    /// Another writer held the property past the approval timeout.
    #[error("property busy with a concurrent decision")]
    Contended,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("dates unavailable: {0}")]
    AvailabilityConflict(Unavailable),

    #[error("cannot approve {reservation_id}: {cause}")]
    BookingConflict {
        reservation_id: ReservationId,
        cause: Unavailable,
    },

    #[error("reservation {reservation_id} is {from}, cannot become {to}")]
    InvalidStateTransition {
        reservation_id: ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
    },

    #[error("user {caller} does not own property {property_id}")]
    NotOwner { caller: Ulid, property_id: Ulid },

    #[error("property not found: {0}")]
    PropertyNotFound(Ulid),

    #[error("reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    #[error("invalid booking config: {0}")]
    InvalidConfig(&'static str),

    #[error("{date} is taken by approved reservation {reservation_id}")]
    DateReserved {
        date: NaiveDate,
        reservation_id: ReservationId,
    },

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("WAL error: {0}")]
    WalError(String),
}
