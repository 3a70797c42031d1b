//! Price and currency math for catalog resources.
//!
//! Nothing here rounds. Screens round with [`round_for_display`] when they
//! render a value.

use serde::Serialize;

/// Default number of BeCoins one US dollar buys.
pub const DEFAULT_BECOINS_PER_USD: f64 = 1.0;

/// The pricing of a resource after its discount is applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceBreakdown {
    pub original_price: f64,
    /// Discount percentage, 0 to 100.
    pub discount: f64,
    pub has_discount: bool,
    pub final_price: f64,
    pub savings: f64,
}

impl PriceBreakdown {
    /// Totals for buying `quantity` units. Every money field is multiplied.
    pub fn times(&self, quantity: u32) -> PriceBreakdown {
        let q = f64::from(quantity);
        PriceBreakdown {
            original_price: self.original_price * q,
            discount: self.discount,
            has_discount: self.has_discount,
            final_price: self.final_price * q,
            savings: self.savings * q,
        }
    }
}

/// Applies a percentage discount to a list price.
///
/// Inputs are not validated: non-finite values fall back to 0, matching how
/// malformed backend numbers are coerced everywhere else.
pub fn calculate_resource_price(price: f64, discount_percent: f64) -> PriceBreakdown {
    let original_price = finite_or_zero(price);
    let discount = finite_or_zero(discount_percent);
    let final_price = original_price * (1.0 - discount / 100.0);

    PriceBreakdown {
        original_price,
        discount,
        has_discount: discount > 0.0,
        final_price,
        savings: original_price - final_price,
    }
}

/// Total for `quantity` units of a resource.
pub fn calculate_purchase_total(price: f64, discount_percent: f64, quantity: u32) -> PriceBreakdown {
    calculate_resource_price(price, discount_percent).times(quantity)
}

pub fn usd_to_becoins(usd: f64, becoins_per_usd: f64) -> f64 {
    finite_or_zero(usd) * becoins_per_usd
}

pub fn becoins_to_usd(becoins: f64, becoins_per_usd: f64) -> f64 {
    if becoins_per_usd == 0.0 {
        return 0.0;
    }
    finite_or_zero(becoins) / becoins_per_usd
}

/// Rounds to two decimals for display.
pub fn round_for_display(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Whether a BeCoins balance covers a total.
pub fn can_afford(balance: f64, total: f64) -> bool {
    balance + f64::EPSILON >= total
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discount_applies() {
        let price = calculate_resource_price(100.0, 20.0);
        assert_eq!(price.final_price, 80.0);
        assert_eq!(price.savings, 20.0);
        assert!(price.has_discount);
    }

    #[test]
    fn zero_discount() {
        let price = calculate_resource_price(100.0, 0.0);
        assert_eq!(price.final_price, 100.0);
        assert_eq!(price.savings, 0.0);
        assert!(!price.has_discount);
    }

    #[test]
    fn purchase_total_multiplies_every_field() {
        let total = calculate_purchase_total(50.0, 10.0, 3);
        assert_eq!(total.original_price, 150.0);
        assert_eq!(total.final_price, 135.0);
        assert_eq!(total.savings, 15.0);
        assert_eq!(total.discount, 10.0);
    }

    #[test]
    fn no_rounding_is_applied() {
        let price = calculate_resource_price(9.99, 33.0);
        assert!((price.final_price - 6.6933).abs() < 1e-9);
        assert_eq!(round_for_display(price.final_price), 6.69);
    }

    #[test]
    fn non_finite_input_falls_back_to_zero() {
        let price = calculate_resource_price(f64::NAN, 10.0);
        assert_eq!(price.final_price, 0.0);
        assert_eq!(price.original_price, 0.0);
    }

    #[test]
    fn currency_conversion() {
        assert_eq!(usd_to_becoins(12.5, 2.0), 25.0);
        assert_eq!(becoins_to_usd(25.0, 2.0), 12.5);
        assert_eq!(becoins_to_usd(25.0, 0.0), 0.0);
    }

    #[test]
    fn affordability() {
        assert!(can_afford(80.0, 80.0));
        assert!(!can_afford(79.99, 80.0));
    }
}
