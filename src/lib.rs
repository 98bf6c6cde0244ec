//! Interview low-level-design problems, implemented properly.
//!
//! Each classic LLD exercise lives in its own module and stays independent of
//! the others; what they share are the small support modules below. Where the
//! interview version of a problem hand-waves ("use per-seat locks", "greedy
//! change"), the module here actually implements and tests the claim.
//!
//! Support modules:
//! - [`cash`]: money in cents, denominations, greedy inventory-bounded change
//! - [`events`]: Observer: typed publisher plus a JSON-lines audit log
//! - [`ids`]: process-wide sequential ids and uuid reference codes
//! - [`reserve`]: per-resource holds with TTL, the shared locking engine
//! - [`config`]: TOML configuration with validation
//! - [`logging`]: tracing bootstrap
//!
//! Problems:
//! - [`booking`]: movie ticket booking on top of [`reserve`]
//! - [`atm`]: accounts, PIN sessions, cash dispensing
//! - [`vending`]: vending machine state machine
//! - [`parking`]: parking lot with fee strategies
//! - [`library`]: catalog, loans, holds, fines
//! - [`rideshare`]: driver matching and trip lifecycle
//! - [`scheduler`]: priority job scheduler with a worker pool

pub mod atm;
pub mod booking;
pub mod cash;
pub mod config;
pub mod events;
pub mod ids;
pub mod library;
pub mod logging;
pub mod parking;
pub mod reserve;
pub mod rideshare;
pub mod scheduler;
pub mod vending;
