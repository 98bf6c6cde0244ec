//! Library: catalog, loans, pickup holds, and overdue fines.
//!
//! Every operation that involves time takes a `chrono::NaiveDate` argument;
//! the module never reads a wall clock, so due dates and fine math are fully
//! deterministic in tests. A copy is always in exactly one status, and a
//! returned copy goes to the earliest hold-queue waiter before it ever goes
//! back on the shelf.

use chrono::NaiveDate;
use std::collections::{HashMap, VecDeque};
use thiserror::Error;
use tracing::info;

use crate::cash::Money;
use crate::ids::{self, IdKind};

pub type Isbn = String;
pub type MemberId = u64;
pub type CopyId = u64;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LibraryError {
    // Invalid input.
    #[error("no title with ISBN {0}")]
    UnknownIsbn(Isbn),
    #[error("no member {0}")]
    UnknownMember(MemberId),
    #[error("no copy {0}")]
    UnknownCopy(CopyId),

    // Business rules.
    #[error("no copies of {0} available (place a hold)")]
    NoCopiesAvailable(Isbn),
    #[error("loan limit of {limit} reached")]
    LoanLimitReached { limit: usize },
    #[error("member already has this title on loan")]
    AlreadyOnLoanToMember,
    #[error("copy {0} is not on loan")]
    NotOnLoan(CopyId),
    #[error("no copy of {0} is held for pickup by this member")]
    NoHeldCopy(Isbn),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyStatus {
    OnShelf,
    Loaned { member: MemberId, due: NaiveDate },
    HeldForPickup { member: MemberId },
}

#[derive(Debug, Clone)]
struct Copy {
    isbn: Isbn,
    status: CopyStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Title {
    pub isbn: Isbn,
    pub name: String,
    pub author: String,
    pub copies: Vec<CopyId>,
}

#[derive(Debug, Clone)]
pub struct Member {
    pub id: MemberId,
    pub name: String,
    loans: Vec<CopyId>,
    fines: Money,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loan {
    pub id: u64,
    pub member: MemberId,
    pub copy: CopyId,
    pub isbn: Isbn,
    pub due: NaiveDate,
}

/// What happened to a returned copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnOutcome {
    Reshelved { fine: Money },
    HeldForPickup { member: MemberId, fine: Money },
}

impl ReturnOutcome {
    pub fn fine(&self) -> Money {
        match self {
            ReturnOutcome::Reshelved { fine } | ReturnOutcome::HeldForPickup { fine, .. } => *fine,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoanPolicy {
    pub loan_days: i64,
    pub daily_fine: Money,
    pub max_loans: usize,
}

impl Default for LoanPolicy {
    fn default() -> Self {
        Self {
            loan_days: 14,
            daily_fine: Money::from_cents(25),
            max_loans: 5,
        }
    }
}

pub struct Library {
    titles: HashMap<Isbn, Title>,
    copies: HashMap<CopyId, Copy>,
    members: HashMap<MemberId, Member>,
    holds: HashMap<Isbn, VecDeque<MemberId>>,
    policy: LoanPolicy,
    next_copy: CopyId,
}

impl Library {
    pub fn new(policy: LoanPolicy) -> Self {
        Self {
            titles: HashMap::new(),
            copies: HashMap::new(),
            members: HashMap::new(),
            holds: HashMap::new(),
            policy,
            next_copy: 1,
        }
    }

    pub fn add_title(
        &mut self,
        isbn: impl Into<Isbn>,
        name: impl Into<String>,
        author: impl Into<String>,
        copy_count: u32,
    ) -> &Title {
        let isbn = isbn.into();
        let mut copy_ids = Vec::with_capacity(copy_count as usize);
        for _ in 0..copy_count {
            let id = self.next_copy;
            self.next_copy += 1;
            self.copies.insert(
                id,
                Copy {
                    isbn: isbn.clone(),
                    status: CopyStatus::OnShelf,
                },
            );
            copy_ids.push(id);
        }
        self.titles
            .entry(isbn.clone())
            .and_modify(|title| title.copies.extend(&copy_ids))
            .or_insert(Title {
                isbn,
                name: name.into(),
                author: author.into(),
                copies: copy_ids,
            })
    }

    pub fn register_member(&mut self, name: impl Into<String>) -> MemberId {
        let id = ids::next(IdKind::Member);
        self.members.insert(
            id,
            Member {
                id,
                name: name.into(),
                loans: Vec::new(),
                fines: Money::ZERO,
            },
        );
        id
    }

    /// Loan an on-shelf copy to a member. Copies parked for someone's pickup
    /// are not loanable off the shelf.
    pub fn check_out(
        &mut self,
        member_id: MemberId,
        isbn: &str,
        on: NaiveDate,
    ) -> Result<Loan, LibraryError> {
        let title = self
            .titles
            .get(isbn)
            .ok_or_else(|| LibraryError::UnknownIsbn(isbn.to_string()))?;
        self.check_loan_eligibility(member_id, isbn)?;

        let copy_id = title
            .copies
            .iter()
            .copied()
            .find(|id| {
                matches!(
                    self.copies.get(id).map(|c| &c.status),
                    Some(CopyStatus::OnShelf)
                )
            })
            .ok_or_else(|| LibraryError::NoCopiesAvailable(isbn.to_string()))?;

        self.loan_copy(copy_id, member_id, on)
    }

    /// Shared gate for anything that creates a loan: limit and one-copy-per-
    /// title apply to shelf checkouts and hold pickups alike.
    fn check_loan_eligibility(&self, member_id: MemberId, isbn: &str) -> Result<(), LibraryError> {
        let member = self
            .members
            .get(&member_id)
            .ok_or(LibraryError::UnknownMember(member_id))?;

        if member.loans.len() >= self.policy.max_loans {
            return Err(LibraryError::LoanLimitReached {
                limit: self.policy.max_loans,
            });
        }
        let already = member.loans.iter().any(|copy_id| {
            self.copies
                .get(copy_id)
                .map(|c| c.isbn == isbn)
                .unwrap_or(false)
        });
        if already {
            return Err(LibraryError::AlreadyOnLoanToMember);
        }
        Ok(())
    }

    fn loan_copy(
        &mut self,
        copy_id: CopyId,
        member_id: MemberId,
        on: NaiveDate,
    ) -> Result<Loan, LibraryError> {
        let due = on + chrono::Duration::days(self.policy.loan_days);
        let copy = self
            .copies
            .get_mut(&copy_id)
            .ok_or(LibraryError::UnknownCopy(copy_id))?;
        copy.status = CopyStatus::Loaned {
            member: member_id,
            due,
        };
        let isbn = copy.isbn.clone();
        if let Some(member) = self.members.get_mut(&member_id) {
            member.loans.push(copy_id);
        }
        info!(member = member_id, copy = copy_id, %due, "checked out");
        Ok(Loan {
            id: ids::next(IdKind::Loan),
            member: member_id,
            copy: copy_id,
            isbn,
            due,
        })
    }

    /// Return a copy. Accrues the overdue fine against the borrower, then
    /// routes the copy: earliest hold-queue waiter first, shelf otherwise.
    pub fn check_in(&mut self, copy_id: CopyId, on: NaiveDate) -> Result<ReturnOutcome, LibraryError> {
        let copy = self
            .copies
            .get(&copy_id)
            .ok_or(LibraryError::UnknownCopy(copy_id))?;
        let (borrower, due) = match copy.status {
            CopyStatus::Loaned { member, due } => (member, due),
            _ => return Err(LibraryError::NotOnLoan(copy_id)),
        };
        let isbn = copy.isbn.clone();

        let days_late = (on - due).num_days().max(0);
        let fine = self.policy.daily_fine * days_late;
        if let Some(member) = self.members.get_mut(&borrower) {
            member.loans.retain(|id| *id != copy_id);
            member.fines = member.fines + fine;
        }

        let next_waiter = self
            .holds
            .get_mut(&isbn)
            .and_then(|queue| queue.pop_front());

        let copy = self
            .copies
            .get_mut(&copy_id)
            .ok_or(LibraryError::UnknownCopy(copy_id))?;
        let outcome = match next_waiter {
            Some(waiter) => {
                copy.status = CopyStatus::HeldForPickup { member: waiter };
                ReturnOutcome::HeldForPickup {
                    member: waiter,
                    fine,
                }
            }
            None => {
                copy.status = CopyStatus::OnShelf;
                ReturnOutcome::Reshelved { fine }
            }
        };
        info!(copy = copy_id, fine = %fine, "checked in");
        Ok(outcome)
    }

    /// Queue for the next returned copy of a title. FIFO.
    pub fn place_hold(&mut self, member_id: MemberId, isbn: &str) -> Result<(), LibraryError> {
        if !self.titles.contains_key(isbn) {
            return Err(LibraryError::UnknownIsbn(isbn.to_string()));
        }
        if !self.members.contains_key(&member_id) {
            return Err(LibraryError::UnknownMember(member_id));
        }
        self.holds
            .entry(isbn.to_string())
            .or_default()
            .push_back(member_id);
        Ok(())
    }

    /// Pick up a copy that `check_in` parked for this member. Subject to the
    /// same loan limit and duplicate-title rules as a shelf checkout; the
    /// copy stays parked until the member is eligible.
    pub fn collect_hold(
        &mut self,
        member_id: MemberId,
        isbn: &str,
        on: NaiveDate,
    ) -> Result<Loan, LibraryError> {
        self.check_loan_eligibility(member_id, isbn)?;
        let title = self
            .titles
            .get(isbn)
            .ok_or_else(|| LibraryError::UnknownIsbn(isbn.to_string()))?;
        let copy_id = title
            .copies
            .iter()
            .copied()
            .find(|id| {
                matches!(
                    self.copies.get(id).map(|c| &c.status),
                    Some(CopyStatus::HeldForPickup { member }) if *member == member_id
                )
            })
            .ok_or_else(|| LibraryError::NoHeldCopy(isbn.to_string()))?;
        self.loan_copy(copy_id, member_id, on)
    }

    /// Case-insensitive substring match over title names and authors.
    pub fn search(&self, query: &str) -> Vec<&Title> {
        let needle = query.to_lowercase();
        let mut hits: Vec<&Title> = self
            .titles
            .values()
            .filter(|t| {
                t.name.to_lowercase().contains(&needle)
                    || t.author.to_lowercase().contains(&needle)
            })
            .collect();
        hits.sort_by(|a, b| a.isbn.cmp(&b.isbn));
        hits
    }

    pub fn fines(&self, member_id: MemberId) -> Result<Money, LibraryError> {
        self.members
            .get(&member_id)
            .map(|m| m.fines)
            .ok_or(LibraryError::UnknownMember(member_id))
    }

    pub fn pay_fine(&mut self, member_id: MemberId, amount: Money) -> Result<Money, LibraryError> {
        let member = self
            .members
            .get_mut(&member_id)
            .ok_or(LibraryError::UnknownMember(member_id))?;
        member.fines = (member.fines - amount).max(Money::ZERO);
        Ok(member.fines)
    }

    pub fn copy_status(&self, copy_id: CopyId) -> Option<&CopyStatus> {
        self.copies.get(&copy_id).map(|c| &c.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn library() -> (Library, MemberId, MemberId) {
        let mut lib = Library::new(LoanPolicy::default());
        lib.add_title("978-0", "The Rust Programming Language", "Klabnik & Nichols", 2);
        lib.add_title("978-1", "Designing Data-Intensive Applications", "Kleppmann", 1);
        let alice = lib.register_member("Alice");
        let bob = lib.register_member("Bob");
        (lib, alice, bob)
    }

    #[test]
    fn checkout_sets_due_date() {
        let (mut lib, alice, _) = library();
        let loan = lib.check_out(alice, "978-0", day(1)).unwrap();
        assert_eq!(loan.due, day(15));
        assert_eq!(
            lib.copy_status(loan.copy),
            Some(&CopyStatus::Loaned {
                member: alice,
                due: day(15)
            })
        );
    }

    #[test]
    fn no_fine_on_or_before_due_date() {
        let (mut lib, alice, _) = library();
        let loan = lib.check_out(alice, "978-0", day(1)).unwrap();
        let outcome = lib.check_in(loan.copy, day(15)).unwrap();
        assert_eq!(outcome, ReturnOutcome::Reshelved { fine: Money::ZERO });
        assert_eq!(lib.fines(alice).unwrap(), Money::ZERO);
    }

    #[test]
    fn fine_grows_linearly_after_due() {
        let (mut lib, alice, _) = library();
        let loan = lib.check_out(alice, "978-0", day(1)).unwrap();
        // Due day 15, returned day 19: 4 days at 25c.
        let outcome = lib.check_in(loan.copy, day(19)).unwrap();
        assert_eq!(outcome.fine(), Money::from_cents(100));
        assert_eq!(lib.fines(alice).unwrap(), Money::from_cents(100));

        let remaining = lib.pay_fine(alice, Money::from_cents(60)).unwrap();
        assert_eq!(remaining, Money::from_cents(40));
        // Overpaying never goes negative.
        let remaining = lib.pay_fine(alice, Money::from_dollars(5)).unwrap();
        assert_eq!(remaining, Money::ZERO);
    }

    #[test]
    fn member_cannot_borrow_same_title_twice() {
        let (mut lib, alice, _) = library();
        lib.check_out(alice, "978-0", day(1)).unwrap();
        assert_eq!(
            lib.check_out(alice, "978-0", day(1)).unwrap_err(),
            LibraryError::AlreadyOnLoanToMember
        );
    }

    #[test]
    fn loan_limit_enforced() {
        let mut lib = Library::new(LoanPolicy {
            max_loans: 1,
            ..LoanPolicy::default()
        });
        lib.add_title("978-0", "Book A", "A", 1);
        lib.add_title("978-1", "Book B", "B", 1);
        let alice = lib.register_member("Alice");

        lib.check_out(alice, "978-0", day(1)).unwrap();
        assert_eq!(
            lib.check_out(alice, "978-1", day(1)).unwrap_err(),
            LibraryError::LoanLimitReached { limit: 1 }
        );
    }

    #[test]
    fn exhausted_copies_then_hold_queue_fifo() {
        let (mut lib, alice, bob) = library();
        let carol = lib.register_member("Carol");

        // Single copy of 978-1 goes to alice.
        let loan = lib.check_out(alice, "978-1", day(1)).unwrap();
        assert_eq!(
            lib.check_out(bob, "978-1", day(1)).unwrap_err(),
            LibraryError::NoCopiesAvailable("978-1".into())
        );

        // Bob then Carol queue up.
        lib.place_hold(bob, "978-1").unwrap();
        lib.place_hold(carol, "978-1").unwrap();

        // The returned copy is parked for Bob, never reshelved.
        let outcome = lib.check_in(loan.copy, day(10)).unwrap();
        assert_eq!(
            outcome,
            ReturnOutcome::HeldForPickup {
                member: bob,
                fine: Money::ZERO
            }
        );

        // Carol cannot jump the queue, and the copy is not on the shelf.
        assert_eq!(
            lib.collect_hold(carol, "978-1", day(11)).unwrap_err(),
            LibraryError::NoHeldCopy("978-1".into())
        );
        assert_eq!(
            lib.check_out(carol, "978-1", day(11)).unwrap_err(),
            LibraryError::NoCopiesAvailable("978-1".into())
        );

        // Bob collects; when he returns it, Carol is next.
        let loan = lib.collect_hold(bob, "978-1", day(11)).unwrap();
        let outcome = lib.check_in(loan.copy, day(12)).unwrap();
        assert_eq!(
            outcome,
            ReturnOutcome::HeldForPickup {
                member: carol,
                fine: Money::ZERO
            }
        );
    }

    #[test]
    fn collect_hold_respects_loan_limit() {
        let mut lib = Library::new(LoanPolicy {
            max_loans: 1,
            ..LoanPolicy::default()
        });
        lib.add_title("978-0", "Book A", "A", 1);
        lib.add_title("978-1", "Book B", "B", 1);
        let alice = lib.register_member("Alice");
        let bob = lib.register_member("Bob");

        lib.check_out(alice, "978-0", day(1)).unwrap();
        let bobs = lib.check_out(bob, "978-1", day(1)).unwrap();
        lib.place_hold(alice, "978-1").unwrap();
        lib.check_in(bobs.copy, day(2)).unwrap();

        // The copy is parked for Alice, but she is at her limit.
        assert_eq!(
            lib.collect_hold(alice, "978-1", day(3)).unwrap_err(),
            LibraryError::LoanLimitReached { limit: 1 }
        );
        assert_eq!(
            lib.copy_status(bobs.copy),
            Some(&CopyStatus::HeldForPickup { member: alice })
        );

        // Returning frees a slot; the parked copy is still hers.
        let alices = lib
            .members
            .get(&alice)
            .and_then(|m| m.loans.first().copied())
            .unwrap();
        lib.check_in(alices, day(3)).unwrap();
        lib.collect_hold(alice, "978-1", day(3)).unwrap();
    }

    #[test]
    fn collect_hold_rejects_duplicate_title() {
        let (mut lib, alice, bob) = library();

        // Alice and Bob each loan one of the two 978-0 copies.
        lib.check_out(alice, "978-0", day(1)).unwrap();
        let bobs = lib.check_out(bob, "978-0", day(1)).unwrap();

        lib.place_hold(alice, "978-0").unwrap();
        lib.check_in(bobs.copy, day(2)).unwrap();

        assert_eq!(
            lib.collect_hold(alice, "978-0", day(3)).unwrap_err(),
            LibraryError::AlreadyOnLoanToMember
        );
    }

    #[test]
    fn check_in_requires_a_loan() {
        let (mut lib, _, _) = library();
        assert_eq!(
            lib.check_in(1, day(1)).unwrap_err(),
            LibraryError::NotOnLoan(1)
        );
        assert_eq!(
            lib.check_in(999, day(1)).unwrap_err(),
            LibraryError::UnknownCopy(999)
        );
    }

    #[test]
    fn search_matches_name_and_author() {
        let (lib, _, _) = library();
        assert_eq!(lib.search("rust").len(), 1);
        assert_eq!(lib.search("kleppmann").len(), 1);
        assert_eq!(lib.search("data").len(), 1);
        assert!(lib.search("cooking").is_empty());
    }

    #[test]
    fn unknown_ids_are_invalid_input() {
        let (mut lib, alice, _) = library();
        assert_eq!(
            lib.check_out(alice, "nope", day(1)).unwrap_err(),
            LibraryError::UnknownIsbn("nope".into())
        );
        assert_eq!(
            lib.check_out(12345, "978-0", day(1)).unwrap_err(),
            LibraryError::UnknownMember(12345)
        );
        assert_eq!(
            lib.place_hold(12345, "978-0").unwrap_err(),
            LibraryError::UnknownMember(12345)
        );
    }
}
