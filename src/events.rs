//! Minimal Observer support: a publisher of typed events and an audit-log
//! subscriber that keeps a JSON-lines trail of everything it saw.

use serde::Serialize;
use std::sync::{Arc, Mutex, RwLock};

type Listener<E> = Box<dyn Fn(&E) + Send + Sync>;

/// Fan-out of events to registered listeners. Listeners are trusted
/// in-process observers; emit order follows registration order.
pub struct Publisher<E> {
    listeners: RwLock<Vec<Listener<E>>>,
}

impl<E> Publisher<E> {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let mut guard = match self.listeners.write() {
            Ok(guard) => guard,
            // A panicked listener can poison the lock; the list itself is
            // still valid, so recover rather than wedge every publisher.
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push(Box::new(listener));
    }

    pub fn emit(&self, event: &E) {
        let guard = match self.listeners.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for listener in guard.iter() {
            listener(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        match self.listeners.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

impl<E> Default for Publisher<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Collects serialized events as JSON lines. Subscribe it to a publisher and
/// read the trail back in tests or post-mortems.
#[derive(Default)]
pub struct AuditLog {
    lines: Mutex<Vec<String>>,
}

impl AuditLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record<E: Serialize>(&self, event: &E) {
        match serde_json::to_string(event) {
            Ok(line) => {
                let mut guard = match self.lines.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                guard.push(line);
            }
            Err(err) => tracing::warn!(%err, "dropping unserializable audit event"),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        match self.lines.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Serialize)]
    enum Ping {
        Hello { n: u32 },
    }

    #[test]
    fn every_listener_sees_every_event() {
        let publisher: Publisher<u32> = Publisher::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&first);
        publisher.subscribe(move |n| {
            c.fetch_add(*n as usize, Ordering::SeqCst);
        });
        let c = Arc::clone(&second);
        publisher.subscribe(move |n| {
            c.fetch_add(*n as usize, Ordering::SeqCst);
        });

        publisher.emit(&3);
        publisher.emit(&4);

        assert_eq!(first.load(Ordering::SeqCst), 7);
        assert_eq!(second.load(Ordering::SeqCst), 7);
        assert_eq!(publisher.listener_count(), 2);
    }

    #[test]
    fn audit_log_keeps_json_lines() {
        let publisher: Publisher<Ping> = Publisher::new();
        let audit = AuditLog::new();

        let sink = Arc::clone(&audit);
        publisher.subscribe(move |e| sink.record(e));

        publisher.emit(&Ping::Hello { n: 1 });
        publisher.emit(&Ping::Hello { n: 2 });

        let lines = audit.lines();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(parsed["Hello"]["n"], 1);
    }
}
