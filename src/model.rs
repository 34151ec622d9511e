use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub type PropertyId = Ulid;
pub type ReservationId = Ulid;
pub type UserId = Ulid;

/// Money in minor currency units (cents, kopecks, ...).
pub type Minor = i64;

/// Half-open night range `[check_in, check_out)`.
///
/// The check-out date is not occupied, so a stay ending on day D and another
/// starting on day D never overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawStayRange")]
pub struct StayRange {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

/// Unchecked wire shape; deserialization goes through `StayRange::try_new`.
#[derive(Deserialize)]
struct RawStayRange {
    check_in: NaiveDate,
    check_out: NaiveDate,
}

impl TryFrom<RawStayRange> for StayRange {
    type Error = &'static str;

    fn try_from(raw: RawStayRange) -> Result<Self, Self::Error> {
        StayRange::try_new(raw.check_in, raw.check_out).ok_or("check_out must be after check_in")
    }
}

impl StayRange {
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Self {
        debug_assert!(check_in < check_out, "StayRange check_in must be before check_out");
        Self { check_in, check_out }
    }

    /// Returns `None` unless `check_in < check_out`.
    pub fn try_new(check_in: NaiveDate, check_out: NaiveDate) -> Option<Self> {
        (check_in < check_out).then_some(Self { check_in, check_out })
    }

    pub fn nights(&self) -> u32 {
        (self.check_out - self.check_in).num_days().max(0) as u32
    }

    pub fn overlaps(&self, other: &StayRange) -> bool {
        self.check_in < other.check_out && other.check_in < self.check_out
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.check_in <= date && date < self.check_out
    }

    /// Every occupied night, check-in inclusive, check-out exclusive.
    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let end = self.check_out;
        self.check_in.iter_days().take_while(move |d| *d < end)
    }

    /// Per-date projection for calendar rendering. Never use this for conflict
    /// decisions; `overlaps` is the only source of truth there.
    pub fn expand(&self) -> BTreeSet<NaiveDate> {
        self.dates().collect()
    }
}

impl fmt::Display for StayRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.check_in, self.check_out)
    }
}

// ── Property configuration ──────────────────────────────────────

/// Minimum-nights thresholds a discount can be attached to.
pub const TIER_THRESHOLDS: [u32; 5] = [3, 5, 7, 14, 30];

/// Percent-off per minimum-nights threshold. Thresholds without an entry have
/// no discount configured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiscountTiers(BTreeMap<u32, u8>);

impl DiscountTiers {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with(mut self, threshold: u32, percent: u8) -> Self {
        self.0.insert(threshold, percent);
        self
    }

    pub fn set(&mut self, threshold: u32, percent: Option<u8>) {
        match percent {
            Some(p) => {
                self.0.insert(threshold, p);
            }
            None => {
                self.0.remove(&threshold);
            }
        }
    }

    pub fn get(&self, threshold: u32) -> Option<u8> {
        self.0.get(&threshold).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u8)> + '_ {
        self.0.iter().map(|(t, p)| (*t, *p))
    }
}

/// Booking terms of one property, owned by the property catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyBookingConfig {
    pub property_id: PropertyId,
    pub owner_id: UserId,
    pub price_per_night: Minor,
    pub currency: String,
    pub minimum_stay_nights: u32,
    #[serde(default)]
    pub discount_tiers: DiscountTiers,
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Approved => "approved",
            ReservationStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Raw request fields as submitted by a requester. Dates are optional so a
/// missing field surfaces as a validation error rather than a parse failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReservation {
    pub property_id: PropertyId,
    pub requester_id: UserId,
    pub check_in: Option<NaiveDate>,
    pub check_out: Option<NaiveDate>,
    pub message: Option<String>,
    #[serde(default)]
    pub share_phone: bool,
    pub contact_phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub property_id: PropertyId,
    pub requester_id: UserId,
    pub owner_id: UserId,
    pub stay: StayRange,
    pub nights: u32,
    pub price_per_night: Minor,
    pub currency: String,
    pub applied_discount_percent: u8,
    pub total_price: Minor,
    pub savings: Minor,
    pub status: ReservationStatus,
    pub message: Option<String>,
    pub share_phone: bool,
    pub contact_phone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl Reservation {
    pub fn is_pending(&self) -> bool {
        self.status == ReservationStatus::Pending
    }
}

/// Priced stay, as shown to a requester before submitting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub nights: u32,
    pub price_per_night: Minor,
    pub currency: String,
    pub applied_percent: u8,
    /// Display value, rounded half-up. `total` is not derived from it.
    pub per_night_after_discount: Minor,
    pub subtotal: Minor,
    pub total: Minor,
    pub savings: Minor,
}

// ── Per-property state ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovedStay {
    pub reservation_id: ReservationId,
    pub stay: StayRange,
}

/// Approved stays plus owner-blocked dates of one property. Cloning it under
/// the property lock gives a consistent availability snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Calendar {
    /// Pairwise non-overlapping, sorted by `stay.check_in`.
    approved: Vec<ApprovedStay>,
    blocked: BTreeSet<NaiveDate>,
}

impl Calendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn approved(&self) -> &[ApprovedStay] {
        &self.approved
    }

    pub fn blocked(&self) -> &BTreeSet<NaiveDate> {
        &self.blocked
    }

    /// Insert maintaining sort order by check-in.
    pub fn insert_approved(&mut self, stay: ApprovedStay) {
        let pos = self
            .approved
            .binary_search_by_key(&stay.stay.check_in, |a| a.stay.check_in)
            .unwrap_or_else(|e| e);
        self.approved.insert(pos, stay);
    }

    /// Returns true if the date was not already blocked.
    pub fn block(&mut self, date: NaiveDate) -> bool {
        self.blocked.insert(date)
    }

    /// Returns true if the date was blocked.
    pub fn unblock(&mut self, date: NaiveDate) -> bool {
        self.blocked.remove(&date)
    }

    /// Approved stays overlapping `query`. Binary search skips every stay
    /// starting at or after `query.check_out`.
    pub fn overlapping(&self, query: &StayRange) -> impl Iterator<Item = &ApprovedStay> {
        let right_bound = self
            .approved
            .partition_point(|a| a.stay.check_in < query.check_out);
        let query = *query;
        self.approved[..right_bound]
            .iter()
            .filter(move |a| a.stay.overlaps(&query))
    }

    /// Blocked dates falling inside `[check_in, check_out)`.
    /// Empty for an inverted query.
    pub fn blocked_within(&self, query: &StayRange) -> impl Iterator<Item = NaiveDate> + '_ {
        (query.check_in < query.check_out)
            .then(|| self.blocked.range(query.check_in..query.check_out))
            .into_iter()
            .flatten()
            .copied()
    }
}

#[derive(Debug, Clone)]
pub struct PropertyState {
    pub id: PropertyId,
    pub calendar: Calendar,
    pub reservations: HashMap<ReservationId, Reservation>,
}

impl PropertyState {
    pub fn new(id: PropertyId) -> Self {
        Self {
            id,
            calendar: Calendar::new(),
            reservations: HashMap::new(),
        }
    }
}

/// Flat event records; this is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationRequested {
        reservation: Box<Reservation>,
    },
    ReservationApproved {
        id: ReservationId,
        property_id: PropertyId,
        decided_at: DateTime<Utc>,
    },
    ReservationRejected {
        id: ReservationId,
        property_id: PropertyId,
        decided_at: DateTime<Utc>,
    },
    DatesBlocked {
        property_id: PropertyId,
        dates: Vec<NaiveDate>,
    },
    DatesUnblocked {
        property_id: PropertyId,
        dates: Vec<NaiveDate>,
    },
}

impl Event {
    pub fn property_id(&self) -> PropertyId {
        match self {
            Event::ReservationRequested { reservation } => reservation.property_id,
            Event::ReservationApproved { property_id, .. }
            | Event::ReservationRejected { property_id, .. }
            | Event::DatesBlocked { property_id, .. }
            | Event::DatesUnblocked { property_id, .. } => *property_id,
        }
    }
}
