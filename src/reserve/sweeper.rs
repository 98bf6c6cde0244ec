//! Background expiry of lapsed holds.
//!
//! A hold that lapses is already unconfirmable and stealable without the
//! sweeper (callers re-check TTLs); the sweeper just returns lapsed entries
//! to `Free` so availability counts stay honest between requests.

use crossbeam::channel::{bounded, Sender};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::info;

use super::{HoldId, HoldMap};

enum SweepMessage {
    Shutdown,
}

/// Owns the sweep thread; dropping it shuts the thread down and joins it.
pub struct Sweeper {
    tx: Sender<SweepMessage>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Spawn a thread that expires due holds every `interval`. Each sweep's
    /// expirations are handed to `on_expired` (the caller emits its own
    /// domain events from there).
    pub fn start<K, F>(map: Arc<HoldMap<K>>, interval: Duration, on_expired: F) -> Self
    where
        K: Eq + Hash + Ord + Clone + Debug + Send + Sync + 'static,
        F: Fn(&[(K, HoldId)]) + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        let handle = thread::spawn(move || loop {
            // recv_timeout doubles as the sweep interval timer.
            match rx.recv_timeout(interval) {
                Ok(SweepMessage::Shutdown) => break,
                Err(crossbeam::channel::RecvTimeoutError::Timeout) => {
                    let expired = map.expire_due(Instant::now());
                    if !expired.is_empty() {
                        info!(count = expired.len(), "sweeper expired holds");
                        on_expired(&expired);
                    }
                }
                Err(crossbeam::channel::RecvTimeoutError::Disconnected) => break,
            }
        });

        Self {
            tx,
            handle: Some(handle),
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        let _ = self.tx.send(SweepMessage::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
