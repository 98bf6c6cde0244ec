//! Money and physical cash handling, shared by the ATM and vending machine
//! problems. Amounts are integer cents; never floats.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// An amount of money in cents. Negative values are representable because
/// refund deltas need them, but prices and payments reject them at the edges.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Whole dollars, no cents part.
    pub const fn from_dollars(dollars: i64) -> Self {
        Money(dollars * 100)
    }

    pub const fn as_cents(&self) -> i64 {
        self.0
    }

    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }
}

impl std::ops::Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl std::ops::Mul<i64> for Money {
    type Output = Money;
    fn mul(self, rhs: i64) -> Money {
        Money(self.0 * rhs)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        write!(f, "{}${}.{:02}", sign, abs / 100, abs % 100)
    }
}

/// The US denomination set, bills and coins.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Denomination {
    Penny,
    Nickel,
    Dime,
    Quarter,
    One,
    Five,
    Ten,
    Twenty,
    Fifty,
    Hundred,
}

impl Denomination {
    /// Largest first, the order greedy change-making walks.
    pub const DESCENDING: [Denomination; 10] = [
        Denomination::Hundred,
        Denomination::Fifty,
        Denomination::Twenty,
        Denomination::Ten,
        Denomination::Five,
        Denomination::One,
        Denomination::Quarter,
        Denomination::Dime,
        Denomination::Nickel,
        Denomination::Penny,
    ];

    pub const fn value(&self) -> Money {
        Money::from_cents(match self {
            Denomination::Penny => 1,
            Denomination::Nickel => 5,
            Denomination::Dime => 10,
            Denomination::Quarter => 25,
            Denomination::One => 100,
            Denomination::Five => 500,
            Denomination::Ten => 1_000,
            Denomination::Twenty => 2_000,
            Denomination::Fifty => 5_000,
            Denomination::Hundred => 10_000,
        })
    }

    pub const fn is_bill(&self) -> bool {
        self.value().as_cents() >= 100
    }

    pub const fn label(&self) -> &'static str {
        match self {
            Denomination::Penny => "penny",
            Denomination::Nickel => "nickel",
            Denomination::Dime => "dime",
            Denomination::Quarter => "quarter",
            Denomination::One => "$1 bill",
            Denomination::Five => "$5 bill",
            Denomination::Ten => "$10 bill",
            Denomination::Twenty => "$20 bill",
            Denomination::Fifty => "$50 bill",
            Denomination::Hundred => "$100 bill",
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ChangeError {
    // Invalid input.
    #[error("change amount cannot be negative")]
    NegativeAmount,

    // Business rule: the drawer simply cannot realize the amount.
    #[error("cannot make exact change for {amount}, short by {short_by}")]
    CannotMakeExact { amount: Money, short_by: Money },
}

/// Change handed back to a customer: which denominations, how many of each.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Change {
    units: Vec<(Denomination, u32)>,
}

impl Change {
    pub fn units(&self) -> &[(Denomination, u32)] {
        &self.units
    }

    pub fn total(&self) -> Money {
        self.units
            .iter()
            .map(|(d, n)| d.value() * *n as i64)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn piece_count(&self) -> u32 {
        self.units.iter().map(|(_, n)| n).sum()
    }
}

/// A drawer of physical cash: per-denomination counts.
#[derive(Debug, Clone, Default)]
pub struct CashInventory {
    counts: BTreeMap<Denomination, u32>,
}

impl CashInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_float(float: &[(Denomination, u32)]) -> Self {
        let mut inv = Self::new();
        for (denom, n) in float {
            inv.deposit(*denom, *n);
        }
        inv
    }

    pub fn deposit(&mut self, denom: Denomination, n: u32) {
        *self.counts.entry(denom).or_insert(0) += n;
    }

    /// Accept individual pieces paid in by a customer.
    pub fn absorb(&mut self, pieces: &[Denomination]) {
        for denom in pieces {
            self.deposit(*denom, 1);
        }
    }

    pub fn count(&self, denom: Denomination) -> u32 {
        self.counts.get(&denom).copied().unwrap_or(0)
    }

    pub fn total(&self) -> Money {
        self.counts
            .iter()
            .map(|(d, n)| d.value() * *n as i64)
            .sum()
    }

    /// Greedy change-making, bounded by what the drawer actually holds.
    ///
    /// Walks denominations largest-first and takes as many of each as the
    /// drawer has. All-or-nothing: on failure the drawer is untouched and the
    /// caller refunds the customer. Greedy is optimal for the canonical US
    /// set but can miss a feasible combination when the drawer is skewed
    /// (e.g. 30 cents wanted, drawer holds one quarter and three dimes:
    /// greedy spends the quarter and dead-ends, though three dimes would
    /// have worked). That miss is reported as `CannotMakeExact`.
    pub fn make_change(&mut self, amount: Money) -> Result<Change, ChangeError> {
        if amount.is_negative() {
            return Err(ChangeError::NegativeAmount);
        }
        if amount.is_zero() {
            return Ok(Change::default());
        }

        let mut remaining = amount.as_cents();
        let mut units = Vec::new();

        for denom in Denomination::DESCENDING {
            if remaining == 0 {
                break;
            }
            let unit = denom.value().as_cents();
            let wanted = (remaining / unit) as u32;
            let take = wanted.min(self.count(denom));
            if take > 0 {
                units.push((denom, take));
                remaining -= unit * take as i64;
            }
        }

        if remaining != 0 {
            return Err(ChangeError::CannotMakeExact {
                amount,
                short_by: Money::from_cents(remaining),
            });
        }

        // Commit only once the whole amount is covered.
        for (denom, take) in &units {
            if let Some(slot) = self.counts.get_mut(denom) {
                *slot -= take;
            }
        }

        Ok(Change { units })
    }
}
