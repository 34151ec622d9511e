use std::collections::BTreeSet;

use chrono::NaiveDate;

use crate::model::*;

use super::error::Unavailable;

// ── Availability Algorithm ────────────────────────────────────────

/// Decide whether `candidate` can be taken on `calendar` as of `today`.
///
/// Order: past check-in, then owner blocks, then approved stays. Blocks are
/// single nights, so a block on D conflicts with any stay whose nights include
/// D. Approved stays are compared with the half-open overlap predicate only;
/// identical, subset, superset and partial overlaps all fall out of it.
pub fn check_stay(calendar: &Calendar, candidate: &StayRange, today: NaiveDate) -> Result<(), Unavailable> {
    if candidate.check_in < today {
        return Err(Unavailable::CheckInPassed {
            check_in: candidate.check_in,
            today,
        });
    }
    if let Some(date) = calendar.blocked_within(candidate).next() {
        return Err(Unavailable::Blocked(date));
    }
    if let Some(hit) = calendar.overlapping(candidate).next() {
        return Err(Unavailable::Reserved {
            reservation_id: hit.reservation_id,
            stay: hit.stay,
        });
    }
    Ok(())
}

pub fn is_available(calendar: &Calendar, candidate: &StayRange, today: NaiveDate) -> bool {
    check_stay(calendar, candidate, today).is_ok()
}

/// Maximal bookable ranges inside `window`, starting no earlier than `today`.
/// Ranges shorter than `min_nights` are dropped.
pub fn free_ranges(calendar: &Calendar, window: &StayRange, today: NaiveDate, min_nights: u32) -> Vec<StayRange> {
    let start = window.check_in.max(today);
    let Some(base) = StayRange::try_new(start, window.check_out) else {
        return Vec::new();
    };

    let mut taken: Vec<StayRange> = calendar.overlapping(&base).map(|a| a.stay).collect();
    for date in calendar.blocked_within(&base) {
        if let Some(next) = date.succ_opt() {
            taken.push(StayRange::new(date, next));
        }
    }
    taken.sort_by_key(|s| s.check_in);
    let taken = merge_overlapping(&taken);

    subtract_ranges(&[base], &taken)
        .into_iter()
        .filter(|r| r.nights() >= min_nights.max(1))
        .collect()
}

/// Per-date disabled set for a calendar widget: past dates, blocked dates and
/// nights of approved stays within `window`. Display only.
pub fn unavailable_dates(calendar: &Calendar, window: &StayRange, today: NaiveDate) -> BTreeSet<NaiveDate> {
    let mut out: BTreeSet<NaiveDate> = window.dates().take_while(|d| *d < today).collect();
    out.extend(calendar.blocked_within(window));
    for approved in calendar.overlapping(window) {
        out.extend(approved.stay.dates().filter(|d| window.contains_date(*d)));
    }
    out
}

/// Merge sorted overlapping/adjacent ranges into disjoint ranges.
pub fn merge_overlapping(sorted: &[StayRange]) -> Vec<StayRange> {
    let mut merged: Vec<StayRange> = Vec::new();
    for &range in sorted {
        if let Some(last) = merged.last_mut()
            && range.check_in <= last.check_out {
                last.check_out = last.check_out.max(range.check_out);
                continue;
            }
        merged.push(range);
    }
    merged
}

/// Remove sorted, disjoint `to_remove` ranges from sorted, disjoint `base`.
pub fn subtract_ranges(base: &[StayRange], to_remove: &[StayRange]) -> Vec<StayRange> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.check_in;
        let current_end = b.check_out;

        while ri < to_remove.len() && to_remove[ri].check_out <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].check_in < current_end {
            let r = &to_remove[j];
            if r.check_in > current_start {
                result.push(StayRange::new(current_start, r.check_in));
            }
            current_start = current_start.max(r.check_out);
            j += 1;
        }

        if current_start < current_end {
            result.push(StayRange::new(current_start, current_end));
        }
    }

    result
}
