//! Process-wide id generation. The interview "Singleton" rendered the Rust
//! way: one lazily-initialized generator with atomic counters, no mutable
//! global state.

use std::sync::atomic::{AtomicU64, Ordering};

/// The entity families that draw sequential ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Hold,
    Ticket,
    Trip,
    Driver,
    Job,
    Loan,
    Member,
}

struct IdGen {
    hold: AtomicU64,
    ticket: AtomicU64,
    trip: AtomicU64,
    driver: AtomicU64,
    job: AtomicU64,
    loan: AtomicU64,
    member: AtomicU64,
}

impl IdGen {
    const fn new() -> Self {
        Self {
            hold: AtomicU64::new(1),
            ticket: AtomicU64::new(1),
            trip: AtomicU64::new(1),
            driver: AtomicU64::new(1),
            job: AtomicU64::new(1),
            loan: AtomicU64::new(1),
            member: AtomicU64::new(1),
        }
    }

    fn counter(&self, kind: IdKind) -> &AtomicU64 {
        match kind {
            IdKind::Hold => &self.hold,
            IdKind::Ticket => &self.ticket,
            IdKind::Trip => &self.trip,
            IdKind::Driver => &self.driver,
            IdKind::Job => &self.job,
            IdKind::Loan => &self.loan,
            IdKind::Member => &self.member,
        }
    }
}

lazy_static::lazy_static! {
    static ref GENERATOR: IdGen = IdGen::new();
}

/// Next sequential id for the given kind. Unique within the process,
/// monotonically increasing per kind, safe to call from any thread.
pub fn next(kind: IdKind) -> u64 {
    GENERATOR.counter(kind).fetch_add(1, Ordering::Relaxed)
}

/// Externally visible reference code (booking confirmations and the like).
pub fn reference_code() -> String {
    uuid::Uuid::new_v4().to_string()
}
