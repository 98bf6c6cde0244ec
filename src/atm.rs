//! ATM: accounts behind per-account locks, a PIN session state machine, and
//! a cash vault that dispenses real bills.
//!
//! Locking doctrine matches [`reserve`](crate::reserve): the bank keeps one
//! mutex per account, not one bank-wide lock, so parallel withdrawals on
//! different accounts never contend. The vault is a single mutex because
//! there is physically one cash drawer. Lock order is always account then
//! vault. Unlike the usual interview sketch, a withdrawal here only debits
//! the balance once the vault has proven it can realize the amount in bills.

use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{info, warn};

use crate::cash::{CashInventory, Change, ChangeError, Denomination, Money};

pub type AccountId = String;

const PIN_ATTEMPTS: u8 = 3;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AtmError {
    // Invalid input.
    #[error("no account {0}")]
    UnknownAccount(AccountId),
    #[error("session is not authenticated")]
    NotAuthenticated,
    #[error("amount must be a positive whole-dollar value")]
    InvalidAmount,

    // Business rules.
    #[error("wrong PIN, {attempts_left} attempt(s) left")]
    WrongPin { attempts_left: u8 },
    #[error("card retained after too many wrong PINs")]
    CardRetained,
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("daily withdrawal limit exceeded, {remaining} remaining today")]
    DailyLimitExceeded { remaining: Money },
    #[error("vault cannot dispense that amount: {0}")]
    CannotDispense(#[from] ChangeError),
    #[error("account is frozen")]
    AccountFrozen,
    #[error("internal state poisoned by a panicked thread")]
    StatePoisoned,
}

#[derive(Debug)]
pub struct Account {
    pub balance: Money,
    pin: u16,
    pub frozen: bool,
    withdrawn_today: Money,
}

impl Account {
    pub fn new(balance: Money, pin: u16) -> Self {
        Self {
            balance,
            pin,
            frozen: false,
            withdrawn_today: Money::ZERO,
        }
    }
}

/// Account registry with one lock per account.
#[derive(Default)]
pub struct Bank {
    accounts: DashMap<AccountId, Mutex<Account>>,
}

impl Bank {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open_account(&self, id: impl Into<AccountId>, balance: Money, pin: u16) {
        self.accounts
            .insert(id.into(), Mutex::new(Account::new(balance, pin)));
    }

    pub fn freeze(&self, id: &str) -> Result<(), AtmError> {
        self.with_account(id, |account| {
            account.frozen = true;
            Ok(())
        })
    }

    /// Reset every account's daily withdrawal tally. Called at the day
    /// boundary by whoever owns the clock; the module itself never reads
    /// wall time.
    pub fn start_new_day(&self) {
        for entry in self.accounts.iter() {
            if let Ok(mut account) = entry.value().lock() {
                account.withdrawn_today = Money::ZERO;
            }
        }
    }

    fn with_account<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Account) -> Result<T, AtmError>,
    ) -> Result<T, AtmError> {
        let entry = self
            .accounts
            .get(id)
            .ok_or_else(|| AtmError::UnknownAccount(id.to_string()))?;
        let mut account = entry.lock().map_err(|_| AtmError::StatePoisoned)?;
        f(&mut account)
    }

    fn contains(&self, id: &str) -> bool {
        self.accounts.contains_key(id)
    }
}

/// PIN session, consuming transitions. A session is minted by
/// [`Atm::insert_card`] and dies at `Ejected` or `CardRetained`.
#[derive(Debug, PartialEq, Eq)]
pub enum AtmSession {
    CardInserted {
        account: AccountId,
        attempts_left: u8,
    },
    Authenticated {
        account: AccountId,
    },
    Ejected,
    CardRetained,
}

impl AtmSession {
    pub fn state_name(&self) -> &'static str {
        match self {
            AtmSession::CardInserted { .. } => "CardInserted",
            AtmSession::Authenticated { .. } => "Authenticated",
            AtmSession::Ejected => "Ejected",
            AtmSession::CardRetained => "CardRetained",
        }
    }

    /// Terminal transition: hand the card back.
    pub fn eject(self) -> AtmSession {
        match self {
            AtmSession::CardRetained => AtmSession::CardRetained,
            _ => AtmSession::Ejected,
        }
    }

    fn account(&self) -> Result<&AccountId, AtmError> {
        match self {
            AtmSession::Authenticated { account } => Ok(account),
            AtmSession::CardRetained => Err(AtmError::CardRetained),
            _ => Err(AtmError::NotAuthenticated),
        }
    }
}

pub struct Atm {
    bank: Arc<Bank>,
    vault: Mutex<CashInventory>,
    daily_limit: Money,
}

impl Atm {
    pub fn new(bank: Arc<Bank>, float: &[(Denomination, u32)], daily_limit: Money) -> Self {
        Self {
            bank,
            vault: Mutex::new(CashInventory::with_float(float)),
            daily_limit,
        }
    }

    /// Begin a session. The card must belong to a known account.
    pub fn insert_card(&self, account_id: &str) -> Result<AtmSession, AtmError> {
        if !self.bank.contains(account_id) {
            return Err(AtmError::UnknownAccount(account_id.to_string()));
        }
        Ok(AtmSession::CardInserted {
            account: account_id.to_string(),
            attempts_left: PIN_ATTEMPTS,
        })
    }

    /// Try a PIN. Three wrong answers retain the card. The returned session
    /// is the new state; the `Result` is this attempt's outcome.
    pub fn enter_pin(&self, session: AtmSession, pin: u16) -> (AtmSession, Result<(), AtmError>) {
        match session {
            AtmSession::CardInserted {
                account,
                attempts_left,
            } => {
                let correct = match self
                    .bank
                    .with_account(&account, |acct| Ok(acct.pin == pin))
                {
                    Ok(correct) => correct,
                    Err(err) => {
                        return (
                            AtmSession::CardInserted {
                                account,
                                attempts_left,
                            },
                            Err(err),
                        )
                    }
                };

                if correct {
                    (AtmSession::Authenticated { account }, Ok(()))
                } else if attempts_left <= 1 {
                    warn!(account = %account, "card retained after final wrong PIN");
                    (AtmSession::CardRetained, Err(AtmError::CardRetained))
                } else {
                    let attempts_left = attempts_left - 1;
                    (
                        AtmSession::CardInserted {
                            account,
                            attempts_left,
                        },
                        Err(AtmError::WrongPin { attempts_left }),
                    )
                }
            }
            AtmSession::CardRetained => (AtmSession::CardRetained, Err(AtmError::CardRetained)),
            other => (other, Err(AtmError::NotAuthenticated)),
        }
    }

    /// Withdraw in whole bills. The balance is debited only after the vault
    /// has set the bills aside; a vault that cannot realize the amount
    /// leaves both balance and vault untouched.
    pub fn withdraw(&self, session: &AtmSession, amount: Money) -> Result<Change, AtmError> {
        let account_id = session.account()?.clone();
        if amount <= Money::ZERO || amount.as_cents() % 100 != 0 {
            return Err(AtmError::InvalidAmount);
        }

        let daily_limit = self.daily_limit;
        // Account lock first, vault second; every path takes them in this
        // order.
        self.bank.with_account(&account_id, |account| {
            if account.frozen {
                return Err(AtmError::AccountFrozen);
            }
            if account.balance < amount {
                return Err(AtmError::InsufficientFunds);
            }
            let remaining = daily_limit - account.withdrawn_today;
            if amount > remaining {
                return Err(AtmError::DailyLimitExceeded { remaining });
            }

            let mut vault = self.vault.lock().map_err(|_| AtmError::StatePoisoned)?;
            let change = vault.make_change(amount)?;

            account.balance = account.balance - amount;
            account.withdrawn_today = account.withdrawn_today + amount;
            info!(account = %account_id, amount = %amount, "cash dispensed");
            Ok(change)
        })
    }

    pub fn deposit(&self, session: &AtmSession, amount: Money) -> Result<Money, AtmError> {
        let account_id = session.account()?.clone();
        if amount <= Money::ZERO {
            return Err(AtmError::InvalidAmount);
        }
        self.bank.with_account(&account_id, |account| {
            if account.frozen {
                return Err(AtmError::AccountFrozen);
            }
            account.balance = account.balance + amount;
            info!(account = %account_id, amount = %amount, "deposit accepted");
            Ok(account.balance)
        })
    }

    pub fn balance(&self, session: &AtmSession) -> Result<Money, AtmError> {
        let account_id = session.account()?.clone();
        self.bank.with_account(&account_id, |account| Ok(account.balance))
    }

    pub fn vault_total(&self) -> Result<Money, AtmError> {
        let vault = self.vault.lock().map_err(|_| AtmError::StatePoisoned)?;
        Ok(vault.total())
    }
}
