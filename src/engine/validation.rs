use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;

use super::error::{ValidationError, ValidationReason};

/// Static checks on a new request, run once at creation. Returns the stay the
/// request asks for.
pub(crate) fn validate_request(
    req: &NewReservation,
    config: &PropertyBookingConfig,
    today: NaiveDate,
) -> Result<StayRange, ValidationError> {
    use ValidationReason::*;

    let check_in = req
        .check_in
        .ok_or(ValidationError::new("checkIn", Missing))?;
    let check_out = req
        .check_out
        .ok_or(ValidationError::new("checkOut", Missing))?;
    let stay = StayRange::try_new(check_in, check_out)
        .ok_or(ValidationError::new("checkOut", NotAfterCheckIn))?;

    if check_in < today {
        return Err(ValidationError::new("checkIn", InPast));
    }
    if (check_in - today).num_days() > MAX_BOOKING_HORIZON_DAYS {
        return Err(ValidationError::new(
            "checkIn",
            TooFarAhead { max_days: MAX_BOOKING_HORIZON_DAYS },
        ));
    }

    let nights = stay.nights();
    if nights < config.minimum_stay_nights.max(1) {
        return Err(ValidationError::new(
            "nights",
            BelowMinimumStay {
                minimum: config.minimum_stay_nights,
                requested: nights,
            },
        ));
    }
    if nights > MAX_STAY_NIGHTS {
        return Err(ValidationError::new(
            "nights",
            AboveMaximumStay { max: MAX_STAY_NIGHTS, requested: nights },
        ));
    }

    if req.requester_id == config.owner_id {
        return Err(ValidationError::new("requesterId", SelfBooking));
    }

    if req.share_phone {
        match req.contact_phone.as_deref().map(str::trim) {
            Some(phone) if !phone.is_empty() => {
                if phone.len() > MAX_PHONE_LEN {
                    return Err(ValidationError::new("contactPhone", TooLong { max: MAX_PHONE_LEN }));
                }
            }
            _ => return Err(ValidationError::new("contactPhone", PhoneRequired)),
        }
    }

    if let Some(ref m) = req.message
        && m.len() > MAX_MESSAGE_LEN {
            return Err(ValidationError::new("message", TooLong { max: MAX_MESSAGE_LEN }));
        }

    Ok(stay)
}

/// A caller-supplied range (quote, availability probe, calendar window) must
/// cover at least one night.
pub(crate) fn validate_stay(stay: &StayRange) -> Result<(), ValidationError> {
    if stay.check_in >= stay.check_out {
        return Err(ValidationError::new("checkOut", ValidationReason::NotAfterCheckIn));
    }
    Ok(())
}

/// Owners may only block today or later.
pub(crate) fn validate_block_dates(dates: &[NaiveDate], today: NaiveDate) -> Result<(), ValidationError> {
    if dates.iter().any(|d| *d < today) {
        return Err(ValidationError::new("date", ValidationReason::InPast));
    }
    Ok(())
}
