//! Per-resource holds with a time-to-live.
//!
//! This is the locking engine the booking-style problems share. The interview
//! answer is "one lock object per seat, not one global lock, and give each
//! hold a TTL"; here that is a [`DashMap`] keyed by resource, so contention on
//! seat C7 never blocks a customer looking at seat K12 (the map's internal
//! shards play the role of the per-seat mutexes). A production system would
//! push the same shape into `SELECT ... FOR UPDATE`; in process, this is the
//! whole implementation.
//!
//! `try_hold` is all-or-nothing: either every requested key is granted or
//! none is, so two customers racing for overlapping seat blocks can never
//! deadlock or each walk away with half a block.

mod sweeper;

pub use sweeper::Sweeper;

use dashmap::DashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

use crate::ids::{self, IdKind};

pub type HoldId = u64;
pub type OwnerId = String;

/// What one resource is doing right now. Exactly one variant at a time,
/// enforced by the map entry's lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceState {
    Free,
    Held {
        hold: HoldId,
        owner: OwnerId,
        expires_at: Instant,
    },
    Committed {
        owner: OwnerId,
    },
}

/// Receipt for a granted hold. Confirming or releasing requires the receipt;
/// the keys inside are sorted and deduplicated.
#[derive(Debug, Clone)]
pub struct Hold<K> {
    pub id: HoldId,
    pub owner: OwnerId,
    pub keys: Vec<K>,
    pub expires_at: Instant,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum HoldError<K: Debug> {
    // Invalid input.
    #[error("resource {0:?} is not part of this map")]
    UnknownResource(K),
    #[error("a hold request must name at least one resource")]
    NothingRequested,

    // Business rules.
    #[error("resource {key:?} is unavailable (taken by {by})")]
    Unavailable { key: K, by: OwnerId },
    #[error("hold not found")]
    HoldNotFound,
    #[error("hold belongs to a different owner")]
    NotHoldOwner,
    #[error("hold has expired")]
    HoldExpired,
}

/// Sharded map of resource states with TTL'd holds.
pub struct HoldMap<K> {
    states: DashMap<K, ResourceState>,
}

impl<K> HoldMap<K>
where
    K: Eq + Hash + Ord + Clone + Debug,
{
    /// Register the resource universe up front. Keys outside this set are
    /// invalid input forever after.
    pub fn with_resources<I: IntoIterator<Item = K>>(keys: I) -> Arc<Self> {
        let states = DashMap::new();
        for key in keys {
            states.insert(key, ResourceState::Free);
        }
        Arc::new(Self { states })
    }

    pub fn contains(&self, key: &K) -> bool {
        self.states.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Claim every key or none of them.
    ///
    /// Keys are deduplicated and claimed in sorted order; on the first
    /// unavailable key everything already claimed under this hold id is
    /// rolled back. Sorted claiming keeps two contenders over overlapping
    /// sets from live-locking each other. A hold whose previous owner's TTL
    /// has lapsed is stolen even if the sweeper has not run yet.
    pub fn try_hold(
        &self,
        owner: &str,
        keys: &[K],
        ttl: Duration,
    ) -> Result<Hold<K>, HoldError<K>> {
        self.try_hold_at(owner, keys, ttl, Instant::now())
    }

    /// `try_hold` with an explicit clock, for deterministic tests.
    pub fn try_hold_at(
        &self,
        owner: &str,
        keys: &[K],
        ttl: Duration,
        now: Instant,
    ) -> Result<Hold<K>, HoldError<K>> {
        if keys.is_empty() {
            return Err(HoldError::NothingRequested);
        }

        let mut wanted: Vec<K> = keys.to_vec();
        wanted.sort();
        wanted.dedup();

        for key in &wanted {
            if !self.states.contains_key(key) {
                return Err(HoldError::UnknownResource(key.clone()));
            }
        }

        let hold_id = ids::next(IdKind::Hold);
        let expires_at = now + ttl;
        let mut claimed: Vec<K> = Vec::with_capacity(wanted.len());

        for key in &wanted {
            // One entry lock at a time; never nested.
            let mut entry = match self.states.get_mut(key) {
                Some(entry) => entry,
                None => {
                    for k in &claimed {
                        self.rollback(k, hold_id);
                    }
                    return Err(HoldError::UnknownResource(key.clone()));
                }
            };

            let takeable = match &*entry {
                ResourceState::Free => true,
                ResourceState::Held { expires_at, .. } => *expires_at <= now,
                ResourceState::Committed { .. } => false,
            };

            if takeable {
                *entry = ResourceState::Held {
                    hold: hold_id,
                    owner: owner.to_string(),
                    expires_at,
                };
                claimed.push(key.clone());
            } else {
                let by = match &*entry {
                    ResourceState::Held { owner, .. }
                    | ResourceState::Committed { owner } => owner.clone(),
                    ResourceState::Free => unreachable!("free entries are takeable"),
                };
                drop(entry);
                for k in &claimed {
                    self.rollback(k, hold_id);
                }
                return Err(HoldError::Unavailable {
                    key: key.clone(),
                    by,
                });
            }
        }

        debug!(hold = hold_id, owner, keys = claimed.len(), "hold granted");
        Ok(Hold {
            id: hold_id,
            owner: owner.to_string(),
            keys: claimed,
            expires_at,
        })
    }

    fn rollback(&self, key: &K, hold_id: HoldId) {
        if let Some(mut entry) = self.states.get_mut(key) {
            if matches!(&*entry, ResourceState::Held { hold, .. } if *hold == hold_id) {
                *entry = ResourceState::Free;
            }
        }
    }

    /// Transition every key of an intact, unexpired hold to `Committed`.
    ///
    /// All or nothing, like `try_hold`: if any key has been stolen or freed
    /// in the meantime, nothing stays committed. Expiry is re-checked here:
    /// an expired hold cannot be confirmed even if the sweeper has not freed
    /// its entries yet.
    pub fn confirm(&self, hold: &Hold<K>) -> Result<(), HoldError<K>> {
        self.confirm_at(hold, Instant::now())
    }

    pub fn confirm_at(&self, hold: &Hold<K>, now: Instant) -> Result<(), HoldError<K>> {
        if hold.expires_at <= now {
            return Err(HoldError::HoldExpired);
        }

        // Check and commit each key under the same entry lock, so a steal of
        // a lapsed key cannot slip in between a check pass and a commit pass.
        // On the first key no longer carrying this hold, everything committed
        // by this call goes back to `Held` and the whole confirm fails.
        let mut committed: Vec<K> = Vec::with_capacity(hold.keys.len());
        for key in &hold.keys {
            let mut entry = match self.states.get_mut(key) {
                Some(entry) => entry,
                None => {
                    self.uncommit(hold, &committed);
                    return Err(HoldError::UnknownResource(key.clone()));
                }
            };
            let failure = match &*entry {
                ResourceState::Held { hold: h, owner, .. } if *h == hold.id => {
                    if *owner == hold.owner {
                        None
                    } else {
                        Some(HoldError::NotHoldOwner)
                    }
                }
                // Freed by a release or a sweep.
                ResourceState::Free => Some(HoldError::HoldNotFound),
                // Stolen after the TTL lapsed, possibly committed since.
                _ => Some(HoldError::HoldExpired),
            };
            match failure {
                None => {
                    *entry = ResourceState::Committed {
                        owner: hold.owner.clone(),
                    };
                    committed.push(key.clone());
                }
                Some(err) => {
                    drop(entry);
                    self.uncommit(hold, &committed);
                    return Err(err);
                }
            }
        }

        debug!(hold = hold.id, owner = %hold.owner, "hold committed");
        Ok(())
    }

    /// Undo a partial confirm: entries this call just committed go back to
    /// `Held` under the original hold. Committed entries are never stolen,
    /// so these are still ours to restore.
    fn uncommit(&self, hold: &Hold<K>, keys: &[K]) {
        for key in keys {
            if let Some(mut entry) = self.states.get_mut(key) {
                if matches!(&*entry, ResourceState::Committed { owner } if *owner == hold.owner) {
                    *entry = ResourceState::Held {
                        hold: hold.id,
                        owner: hold.owner.clone(),
                        expires_at: hold.expires_at,
                    };
                }
            }
        }
    }

    /// Free the keys of a hold. Idempotent: entries already expired, stolen
    /// or freed are skipped.
    pub fn release(&self, hold: &Hold<K>) {
        for key in &hold.keys {
            self.rollback(key, hold.id);
        }
        debug!(hold = hold.id, "hold released");
    }

    /// Cancellation path: return committed keys of this owner to `Free`.
    pub fn release_committed(&self, owner: &str, keys: &[K]) {
        for key in keys {
            if let Some(mut entry) = self.states.get_mut(key) {
                if matches!(&*entry, ResourceState::Committed { owner: o } if o == owner) {
                    *entry = ResourceState::Free;
                }
            }
        }
    }

    /// Free every hold whose TTL has lapsed. Returns what was expired so the
    /// caller can emit events for each. The sweeper calls this with
    /// `Instant::now()`; tests call it with fabricated instants.
    pub fn expire_due(&self, now: Instant) -> Vec<(K, HoldId)> {
        let mut expired = Vec::new();
        for mut entry in self.states.iter_mut() {
            if let ResourceState::Held {
                hold, expires_at, ..
            } = &*entry
            {
                if *expires_at <= now {
                    expired.push((entry.key().clone(), *hold));
                    *entry.value_mut() = ResourceState::Free;
                }
            }
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "expired due holds");
        }
        expired
    }

    /// `(free, held, committed)` counts at this observation point.
    pub fn snapshot_counts(&self) -> (usize, usize, usize) {
        let mut free = 0;
        let mut held = 0;
        let mut committed = 0;
        for entry in self.states.iter() {
            match &*entry {
                ResourceState::Free => free += 1,
                ResourceState::Held { .. } => held += 1,
                ResourceState::Committed { .. } => committed += 1,
            }
        }
        (free, held, committed)
    }

    pub fn state_of(&self, key: &K) -> Option<ResourceState> {
        self.states.get(key).map(|entry| entry.value().clone())
    }
}
