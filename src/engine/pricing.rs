use crate::model::*;

use super::error::EngineError;

/// Highest-threshold tier the stay qualifies for, as `(threshold, percent)`.
///
/// Thresholds are tried from the longest down; a threshold with no configured
/// percent falls through to the next lower one. Tiers never stack.
pub fn select_tier(tiers: &DiscountTiers, nights: u32) -> Option<(u32, u8)> {
    TIER_THRESHOLDS
        .iter()
        .rev()
        .filter(|&&threshold| nights >= threshold)
        .find_map(|&threshold| tiers.get(threshold).map(|pct| (threshold, pct)))
}

/// Price a stay of `nights` under `config`.
///
/// The discount is applied to the exact subtotal and rounded once, half-up, to
/// the minor unit. `nights` must be at least 1; the validation layer rejects
/// anything shorter before pricing is reached. Amounts that do not fit in
/// `Minor` fail instead of wrapping.
pub fn price(config: &PropertyBookingConfig, nights: u32) -> Result<Quote, EngineError> {
    debug_assert!(nights >= 1, "pricing requires at least one night");
    let applied_percent = select_tier(&config.discount_tiers, nights)
        .map(|(_, pct)| pct)
        .unwrap_or(0);
    let keep = 100 - i128::from(applied_percent.min(100));

    let subtotal = i128::from(nights) * i128::from(config.price_per_night);
    let total = div_round_half_up(subtotal * keep, 100);
    let per_night_after_discount = div_round_half_up(i128::from(config.price_per_night) * keep, 100);

    Ok(Quote {
        nights,
        price_per_night: config.price_per_night,
        currency: config.currency.clone(),
        applied_percent,
        per_night_after_discount: to_minor(per_night_after_discount)?,
        subtotal: to_minor(subtotal)?,
        total: to_minor(total)?,
        savings: to_minor(subtotal - total)?,
    })
}

fn to_minor(amount: i128) -> Result<Minor, EngineError> {
    Minor::try_from(amount).map_err(|_| EngineError::LimitExceeded("price exceeds representable amount"))
}

/// `n / d` rounded half away from zero; `d` must be positive.
fn div_round_half_up(n: i128, d: i128) -> i128 {
    if n >= 0 {
        (n + d / 2) / d
    } else {
        -((-n + d / 2) / d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::{MAX_PRICE_PER_NIGHT, MAX_STAY_NIGHTS};
    use proptest::prelude::*;
    use ulid::Ulid;

    fn config(price_per_night: Minor, tiers: DiscountTiers) -> PropertyBookingConfig {
        PropertyBookingConfig {
            property_id: Ulid::new(),
            owner_id: Ulid::new(),
            price_per_night,
            currency: "UZS".into(),
            minimum_stay_nights: 1,
            discount_tiers: tiers,
        }
    }

    #[test]
    fn weekly_discount_example() {
        let q = price(&config(100_000, DiscountTiers::new().with(7, 10)), 7).unwrap();
        assert_eq!(q.applied_percent, 10);
        assert_eq!(q.per_night_after_discount, 90_000);
        assert_eq!(q.subtotal, 700_000);
        assert_eq!(q.total, 630_000);
        assert_eq!(q.savings, 70_000);
    }

    #[test]
    fn below_every_threshold_is_full_price() {
        let q = price(&config(100_000, DiscountTiers::new().with(3, 5)), 2).unwrap();
        assert_eq!(q.applied_percent, 0);
        assert_eq!(q.total, 200_000);
        assert_eq!(q.savings, 0);
    }

    #[test]
    fn highest_qualifying_tier_wins() {
        let tiers = DiscountTiers::new().with(3, 5).with(7, 10).with(30, 25);
        assert_eq!(select_tier(&tiers, 3), Some((3, 5)));
        assert_eq!(select_tier(&tiers, 6), Some((3, 5)));
        assert_eq!(select_tier(&tiers, 29), Some((7, 10)));
        assert_eq!(select_tier(&tiers, 45), Some((30, 25)));
    }

    #[test]
    fn gap_falls_through_to_lower_tier() {
        // No 14-night tier configured.
        let tiers = DiscountTiers::new().with(7, 10).with(30, 20);
        assert_eq!(select_tier(&tiers, 20), Some((7, 10)));
    }

    #[test]
    fn no_tiers_means_no_discount() {
        assert_eq!(select_tier(&DiscountTiers::new(), 100), None);
    }

    #[test]
    fn rounds_once_on_total_half_up() {
        // 3 nights of 333 at 5% off: 999 * 0.95 = 949.05 -> 949.
        let q = price(&config(333, DiscountTiers::new().with(3, 5)), 3).unwrap();
        assert_eq!(q.total, 949);
        assert_eq!(q.savings, 50);
        // Per-night display rounds independently: 316.35 -> 316.
        assert_eq!(q.per_night_after_discount, 316);

        // 3 nights of 10 at 5% off: 28.5 -> 29.
        let q = price(&config(10, DiscountTiers::new().with(3, 5)), 3).unwrap();
        assert_eq!(q.total, 29);
    }

    #[test]
    fn full_discount_is_free() {
        let q = price(&config(50_000, DiscountTiers::new().with(30, 100)), 30).unwrap();
        assert_eq!(q.total, 0);
        assert_eq!(q.savings, 1_500_000);
    }

    #[test]
    fn capped_rate_prices_a_maximum_stay() {
        let q = price(&config(MAX_PRICE_PER_NIGHT, DiscountTiers::new()), MAX_STAY_NIGHTS).unwrap();
        assert!(q.total > 0);
        assert_eq!(q.total, q.subtotal);
    }

    #[test]
    fn unrepresentable_total_is_an_error() {
        let err = price(&config(i64::MAX / 2, DiscountTiers::new()), 3).unwrap_err();
        assert!(matches!(err, EngineError::LimitExceeded(_)));
    }

    proptest! {
        #[test]
        fn effective_rate_non_increasing(
            price_per_night in 1i64..1_000_000,
            p3 in prop::option::of(0u8..=20),
            p7 in prop::option::of(20u8..=40),
            p30 in prop::option::of(40u8..=60),
            nights in 1u32..60,
        ) {
            let mut tiers = DiscountTiers::new();
            tiers.set(3, p3);
            tiers.set(7, p7);
            tiers.set(30, p30);
            let cfg = config(price_per_night, tiers);
            let a = price(&cfg, nights).unwrap();
            let b = price(&cfg, nights + 1).unwrap();
            prop_assert!(b.applied_percent >= a.applied_percent);
            prop_assert!(b.total >= a.total || b.applied_percent > a.applied_percent);
            prop_assert_eq!(a.subtotal - a.total, a.savings);
        }
    }
}
