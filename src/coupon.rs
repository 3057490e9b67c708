use crate::types::{Coupon, DiscountType, ALL_PLANS};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

impl Coupon {
    pub fn is_applicable(&self, plan_id: &str, now: DateTime<Utc>) -> bool {
        self.is_active
            && (self.applicable_plan == ALL_PLANS || self.applicable_plan == plan_id)
            && self.expires_at.map_or(true, |expires_at| expires_at > now)
    }

    /// Discounted price, never negative and never above `price`.
    pub fn apply(&self, price: f64) -> f64 {
        let discounted = match self.discount_type {
            DiscountType::Fixed => price - self.discount_value.max(0.0),
            DiscountType::Percentage => {
                price * (1.0 - self.discount_value.clamp(0.0, 100.0) / 100.0)
            }
        };
        round_cents(discounted.max(0.0))
    }
}

pub fn applicable_coupons<'a>(
    coupons: &'a [Coupon],
    plan_id: &str,
    now: DateTime<Utc>,
) -> Vec<&'a Coupon> {
    coupons
        .iter()
        .filter(|coupon| coupon.is_applicable(plan_id, now))
        .collect()
}

pub fn find_coupon<'a>(
    coupons: &'a [Coupon],
    code: &str,
    plan_id: &str,
    now: DateTime<Utc>,
) -> Option<&'a Coupon> {
    let code = code.trim();
    applicable_coupons(coupons, plan_id, now)
        .into_iter()
        .find(|coupon| coupon.code.trim().eq_ignore_ascii_case(code))
}

pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct AddOn {
    #[validate(length(min = 1))]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[validate(range(min = 0.0))]
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedCoupon {
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub base_price: f64,
    pub discount: f64,
    pub discounted_price: f64,
    pub add_ons_total: f64,
    pub final_price: f64,
    pub coupon: Option<AppliedCoupon>,
}

/// Unknown, inactive or expired coupon codes leave the price unchanged.
pub fn quote_price(
    base_price: f64,
    plan_id: &str,
    coupon_code: Option<&str>,
    add_ons: &[AddOn],
    coupons: &[Coupon],
    now: DateTime<Utc>,
) -> PriceQuote {
    let base_price = round_cents(base_price.max(0.0));
    let coupon = coupon_code
        .filter(|code| !code.trim().is_empty())
        .and_then(|code| {
            let found = find_coupon(coupons, code, plan_id, now);
            if found.is_none() {
                info!(code, plan_id, "Coupon not applicable, no discount");
            }
            found
        });

    let discounted_price = coupon.map_or(base_price, |coupon| coupon.apply(base_price));
    let add_ons_total = round_cents(add_ons.iter().map(|add_on| add_on.price.max(0.0)).sum());

    PriceQuote {
        base_price,
        discount: round_cents(base_price - discounted_price),
        discounted_price,
        add_ons_total,
        final_price: round_cents(discounted_price + add_ons_total),
        coupon: coupon.map(|coupon| AppliedCoupon {
            code: coupon.code.clone(),
            discount_type: coupon.discount_type,
            discount_value: coupon.discount_value,
        }),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutils::coupon;
    use chrono::Duration;

    #[test_case::test_case(DiscountType::Percentage, 20.0, 100.0, 80.0)]
    #[test_case::test_case(DiscountType::Percentage, 150.0, 100.0, 0.0 ; "percentage above 100")]
    #[test_case::test_case(DiscountType::Percentage, -10.0, 100.0, 100.0 ; "negative percentage")]
    #[test_case::test_case(DiscountType::Fixed, 30.0, 100.0, 70.0)]
    #[test_case::test_case(DiscountType::Fixed, 300.0, 100.0, 0.0 ; "fixed floors at zero")]
    #[test_case::test_case(DiscountType::Percentage, 33.0, 49.99, 33.49 ; "rounded to cents")]
    fn test_apply(discount_type: DiscountType, value: f64, price: f64, expected: f64) {
        let coupon = coupon("SAVE", ALL_PLANS, discount_type, value);
        assert_eq!(coupon.apply(price), expected);
    }

    #[test]
    fn test_discount_never_negative_and_percentage_never_increases() {
        for value in [0.0, 1.0, 12.5, 50.0, 99.0, 100.0, 250.0] {
            for price in [0.0, 0.01, 9.99, 100.0, 1999.0] {
                let percentage = coupon("P", ALL_PLANS, DiscountType::Percentage, value);
                let fixed = coupon("F", ALL_PLANS, DiscountType::Fixed, value);
                assert!(percentage.apply(price) >= 0.0);
                assert!(percentage.apply(price) <= price);
                assert!(fixed.apply(price) >= 0.0);
            }
        }
    }

    #[test]
    fn test_applicability() {
        let now = Utc::now();
        let mut scoped = coupon("PRO10", "pro", DiscountType::Percentage, 10.0);
        assert!(scoped.is_applicable("pro", now));
        assert!(!scoped.is_applicable("basic", now));

        scoped.expires_at = Some(now - Duration::hours(1));
        assert!(!scoped.is_applicable("pro", now));

        let mut inactive = coupon("ALL10", ALL_PLANS, DiscountType::Percentage, 10.0);
        assert!(inactive.is_applicable("basic", now));
        inactive.is_active = false;
        assert!(!inactive.is_applicable("basic", now));
    }

    #[test]
    fn test_find_coupon_ignores_case() {
        let coupons = vec![coupon("WELCOME", ALL_PLANS, DiscountType::Fixed, 5.0)];
        let now = Utc::now();
        assert!(find_coupon(&coupons, " welcome ", "basic", now).is_some());
        assert!(find_coupon(&coupons, "WELCOME2", "basic", now).is_none());
    }

    #[test]
    fn test_quote_with_coupon_and_add_ons() {
        let coupons = vec![coupon("HALF", "pro", DiscountType::Percentage, 50.0)];
        let add_ons = vec![AddOn {
            id: "recording".into(),
            name: "Session recording".into(),
            price: 15.0,
        }];

        let quote = quote_price(200.0, "pro", Some("half"), &add_ons, &coupons, Utc::now());
        assert_eq!(quote.discount, 100.0);
        assert_eq!(quote.discounted_price, 100.0);
        assert_eq!(quote.add_ons_total, 15.0);
        assert_eq!(quote.final_price, 115.0);
        assert_eq!(quote.coupon.unwrap().code, "HALF");
    }

    #[test_case::test_case(Some("NOPE") ; "unknown code")]
    #[test_case::test_case(Some("HALF") ; "other plan")]
    #[test_case::test_case(Some("") ; "empty code")]
    #[test_case::test_case(None ; "no code")]
    fn test_quote_without_discount(code: Option<&str>) {
        let coupons = vec![coupon("HALF", "pro", DiscountType::Percentage, 50.0)];
        let quote = quote_price(200.0, "basic", code, &[], &coupons, Utc::now());
        assert_eq!(quote.final_price, 200.0);
        assert_eq!(quote.discount, 0.0);
        assert!(quote.coupon.is_none());
    }
}
