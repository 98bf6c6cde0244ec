//! Pricing strategies. The Strategy seam is a trait object injected into the
//! box office, so a theater can swap pricing without touching booking logic.

use crate::cash::Money;

use super::seats::SeatClass;

pub trait SeatPricing: Send + Sync {
    fn price(&self, class: SeatClass) -> Money;
}

/// Every seat the same price.
pub struct FlatPricing(pub Money);

impl SeatPricing for FlatPricing {
    fn price(&self, _class: SeatClass) -> Money {
        self.0
    }
}

/// Per-class table: regular base price, premium and recliner marked up.
pub struct ClassPricing {
    pub regular: Money,
    pub premium: Money,
    pub recliner: Money,
}

impl ClassPricing {
    /// Common theater arrangement: premium is 1.5x, recliner 2x the base.
    pub fn from_base(base: Money) -> Self {
        Self {
            regular: base,
            premium: Money::from_cents(base.as_cents() * 3 / 2),
            recliner: base * 2,
        }
    }
}

impl SeatPricing for ClassPricing {
    fn price(&self, class: SeatClass) -> Money {
        match class {
            SeatClass::Regular => self.regular,
            SeatClass::Premium => self.premium,
            SeatClass::Recliner => self.recliner,
        }
    }
}
