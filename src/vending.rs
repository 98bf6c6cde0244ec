//! Vending machine: the State-pattern interview classic, with the money
//! conservation rules the whiteboard version hand-waves.
//!
//! The machine is `Idle` or `Collecting`; dispensing completes synchronously
//! inside `select`, so there is no separate Dispensing state to get stuck in.
//! Inserted coins only join the machine's float after a successful vend; on
//! cancel or failure the customer gets back exactly the pieces they put in.

use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{info, warn};

use crate::cash::{CashInventory, Change, Denomination, Money};

pub type SlotCode = String;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum VendingError {
    // Invalid input.
    #[error("no slot {0}")]
    UnknownSlot(SlotCode),
    #[error("no payment in progress")]
    NoPaymentInProgress,

    // Business rules.
    #[error("slot {0} is out of stock")]
    OutOfStock(SlotCode),
    #[error("insufficient payment: price {price}, inserted {inserted}")]
    InsufficientPayment { price: Money, inserted: Money },
    #[error("cannot make change, payment refunded")]
    CannotMakeChange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub item: String,
    pub price: Money,
    pub qty: u32,
}

#[derive(Debug, PartialEq, Eq)]
enum VendingState {
    Idle,
    Collecting { inserted: Vec<Denomination> },
}

/// A successful vend: the item plus change owed.
#[derive(Debug, PartialEq, Eq)]
pub struct Vend {
    pub item: String,
    pub change: Change,
}

pub struct VendingMachine {
    slots: BTreeMap<SlotCode, Slot>,
    float: CashInventory,
    state: VendingState,
    coin_return: Vec<Denomination>,
}

impl VendingMachine {
    pub fn new() -> Self {
        Self {
            slots: BTreeMap::new(),
            float: CashInventory::new(),
            state: VendingState::Idle,
            coin_return: Vec::new(),
        }
    }

    // Operator operations.

    pub fn stock(&mut self, code: impl Into<SlotCode>, item: impl Into<String>, price: Money, qty: u32) {
        self.slots.insert(
            code.into(),
            Slot {
                item: item.into(),
                price,
                qty,
            },
        );
    }

    pub fn restock(&mut self, code: &str, qty: u32) -> Result<(), VendingError> {
        let slot = self
            .slots
            .get_mut(code)
            .ok_or_else(|| VendingError::UnknownSlot(code.to_string()))?;
        slot.qty += qty;
        Ok(())
    }

    /// Load change-making float into the machine.
    pub fn load_float(&mut self, denom: Denomination, n: u32) {
        self.float.deposit(denom, n);
    }

    pub fn float_total(&self) -> Money {
        self.float.total()
    }

    pub fn slot(&self, code: &str) -> Option<&Slot> {
        self.slots.get(code)
    }

    // Customer operations.

    /// Insert a coin or bill. Idle → Collecting on the first piece.
    pub fn insert(&mut self, piece: Denomination) {
        match &mut self.state {
            VendingState::Idle => {
                self.state = VendingState::Collecting {
                    inserted: vec![piece],
                };
            }
            VendingState::Collecting { inserted } => inserted.push(piece),
        }
    }

    pub fn inserted_total(&self) -> Money {
        match &self.state {
            VendingState::Idle => Money::ZERO,
            VendingState::Collecting { inserted } => {
                inserted.iter().map(|d| d.value()).sum()
            }
        }
    }

    /// Buy from a slot. Checks price, stock, and change-making before
    /// anything is committed; any failure returns the machine to exactly the
    /// state it was in (payment still collecting, or refunded for
    /// `CannotMakeChange`).
    pub fn select(&mut self, code: &str) -> Result<Vend, VendingError> {
        let inserted_total = match &self.state {
            VendingState::Idle => return Err(VendingError::NoPaymentInProgress),
            VendingState::Collecting { inserted } => {
                inserted.iter().map(|d| d.value()).sum::<Money>()
            }
        };

        let slot = self
            .slots
            .get(code)
            .ok_or_else(|| VendingError::UnknownSlot(code.to_string()))?;
        if slot.qty == 0 {
            return Err(VendingError::OutOfStock(code.to_string()));
        }
        if inserted_total < slot.price {
            return Err(VendingError::InsufficientPayment {
                price: slot.price,
                inserted: inserted_total,
            });
        }

        // Change must come out of float + the customer's own payment, the
        // way a real machine's coin path works. Trial on a copy so a failed
        // attempt never touches the real float.
        let owed = inserted_total - slot.price;
        let inserted = match std::mem::replace(&mut self.state, VendingState::Idle) {
            VendingState::Collecting { inserted } => inserted,
            VendingState::Idle => unreachable!("checked above"),
        };

        let mut trial = self.float.clone();
        trial.absorb(&inserted);
        let change = match trial.make_change(owed) {
            Ok(change) => change,
            Err(_) => {
                // Eject the exact pieces to the coin return, back to Idle.
                warn!(slot = code, owed = %owed, "cannot make change, refunding");
                self.coin_return.extend(inserted);
                return Err(VendingError::CannotMakeChange);
            }
        };

        self.float = trial;
        let slot = self.slots.get_mut(code).ok_or_else(|| {
            VendingError::UnknownSlot(code.to_string())
        })?;
        slot.qty -= 1;
        info!(slot = code, item = %slot.item, change = %change.total(), "vended");
        Ok(Vend {
            item: slot.item.clone(),
            change,
        })
    }

    /// Abort the purchase: the customer gets back exactly what they put in.
    pub fn cancel(&mut self) -> Vec<Denomination> {
        match std::mem::replace(&mut self.state, VendingState::Idle) {
            VendingState::Idle => Vec::new(),
            VendingState::Collecting { inserted } => inserted,
        }
    }

    /// Empty the coin-return tray (filled by a failed change attempt).
    pub fn take_refund(&mut self) -> Vec<Denomination> {
        std::mem::take(&mut self.coin_return)
    }
}

impl Default for VendingMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> VendingMachine {
        let mut m = VendingMachine::new();
        m.stock("A1", "Cola", Money::from_cents(150), 5);
        m.stock("A2", "Chips", Money::from_cents(125), 1);
        m.stock("B1", "Gum", Money::from_cents(75), 0);
        m.load_float(Denomination::Quarter, 10);
        m.load_float(Denomination::Dime, 10);
        m.load_float(Denomination::Nickel, 10);
        m
    }

    #[test]
    fn exact_payment_vends_with_no_change() {
        let mut m = machine();
        m.insert(Denomination::One);
        m.insert(Denomination::Quarter);
        m.insert(Denomination::Quarter);

        let vend = m.select("A1").unwrap();
        assert_eq!(vend.item, "Cola");
        assert!(vend.change.is_empty());
        assert_eq!(m.slot("A1").unwrap().qty, 4);
        assert_eq!(m.inserted_total(), Money::ZERO);
    }

    #[test]
    fn overpayment_returns_change_and_conserves_money() {
        let mut m = machine();
        let float_before = m.float_total();

        m.insert(Denomination::One);
        m.insert(Denomination::One);
        let vend = m.select("A1").unwrap();

        // inserted = price + change
        assert_eq!(vend.change.total(), Money::from_cents(50));
        // The machine kept exactly the price.
        assert_eq!(m.float_total(), float_before + Money::from_cents(150));
    }

    #[test]
    fn insufficient_payment_keeps_collecting() {
        let mut m = machine();
        m.insert(Denomination::One);

        let err = m.select("A1").unwrap_err();
        assert_eq!(
            err,
            VendingError::InsufficientPayment {
                price: Money::from_cents(150),
                inserted: Money::from_cents(100),
            }
        );

        // Top up and try again.
        m.insert(Denomination::Quarter);
        m.insert(Denomination::Quarter);
        assert!(m.select("A1").is_ok());
    }

    #[test]
    fn cancel_refunds_the_exact_pieces() {
        let mut m = machine();
        m.insert(Denomination::One);
        m.insert(Denomination::Dime);

        let refund = m.cancel();
        assert_eq!(refund, vec![Denomination::One, Denomination::Dime]);
        assert_eq!(m.inserted_total(), Money::ZERO);
        // Cancel with nothing in progress refunds nothing.
        assert!(m.cancel().is_empty());
    }

    #[test]
    fn out_of_stock_and_unknown_slot() {
        let mut m = machine();
        m.insert(Denomination::One);
        assert_eq!(
            m.select("B1").unwrap_err(),
            VendingError::OutOfStock("B1".into())
        );
        assert_eq!(
            m.select("Z9").unwrap_err(),
            VendingError::UnknownSlot("Z9".into())
        );
        // Payment is still in the machine after both failures.
        assert_eq!(m.inserted_total(), Money::from_dollars(1));
    }

    #[test]
    fn select_with_no_payment_is_invalid_input() {
        let mut m = machine();
        assert_eq!(
            m.select("A1").unwrap_err(),
            VendingError::NoPaymentInProgress
        );
        assert_eq!(m.slot("A1").unwrap().qty, 5);
    }

    #[test]
    fn cannot_make_change_refunds_and_leaves_stock() {
        let mut m = VendingMachine::new();
        m.stock("A1", "Cola", Money::from_cents(150), 5);
        // No float at all: change for a $2 payment is impossible. The
        // customer's own bills cannot break themselves.
        let float_before = m.float_total();

        m.insert(Denomination::One);
        m.insert(Denomination::One);
        let err = m.select("A1").unwrap_err();
        assert_eq!(err, VendingError::CannotMakeChange);

        assert_eq!(m.slot("A1").unwrap().qty, 5);
        assert_eq!(m.float_total(), float_before);
        assert_eq!(m.inserted_total(), Money::ZERO);
        // The exact pieces are waiting in the coin return.
        assert_eq!(m.take_refund(), vec![Denomination::One, Denomination::One]);
    }

    #[test]
    fn change_can_use_the_customers_own_coins() {
        let mut m = VendingMachine::new();
        m.stock("A1", "Cola", Money::from_cents(150), 1);
        // Empty float, but the customer pays in quarters: 7 quarters =
        // $1.75, change 25c comes from one of their own quarters.
        for _ in 0..7 {
            m.insert(Denomination::Quarter);
        }
        let vend = m.select("A1").unwrap();
        assert_eq!(vend.change.total(), Money::from_cents(25));
        assert_eq!(m.float_total(), Money::from_cents(150));
    }

    #[test]
    fn restock_operator_op() {
        let mut m = machine();
        m.restock("B1", 3).unwrap();
        assert_eq!(m.slot("B1").unwrap().qty, 3);
        assert!(m.restock("Z9", 1).is_err());
    }
}
