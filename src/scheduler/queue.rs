//! Delay/priority queue: a binary heap ordered by due time, with Condvar
//! timed waits so the dispatcher sleeps exactly until the next job is due.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex};
use std::time::Instant;

use super::{Job, Priority};

#[derive(Debug)]
pub(crate) struct Entry {
    pub run_at: Instant,
    pub priority: Priority,
    // Job id doubles as the FIFO tiebreak: ids are drawn in submission
    // order.
    pub seq: u64,
    pub job: Job,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl Ord for Entry {
    // Earliest due time first; among equal due times higher priority, then
    // submission order. The heap holds `Reverse<Entry>` so popping yields
    // the minimum under this ordering.
    fn cmp(&self, other: &Self) -> Ordering {
        self.run_at
            .cmp(&other.run_at)
            .then_with(|| other.priority.cmp(&self.priority))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Inner {
    heap: BinaryHeap<Reverse<Entry>>,
    closed: bool,
}

pub(crate) struct JobQueue {
    inner: Mutex<Inner>,
    due: Condvar,
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                closed: false,
            }),
            due: Condvar::new(),
        }
    }

    pub fn push(&self, job: Job) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        inner.heap.push(Reverse(Entry {
            run_at: job.run_at,
            priority: job.priority,
            seq: job.id,
            job,
        }));
        drop(inner);
        self.due.notify_all();
    }

    /// Everything due by `now`, highest priority first (submission order
    /// breaking ties). Non-blocking; the synchronous `run_pending` path.
    pub fn drain_due(&self, now: Instant) -> Vec<Job> {
        let mut inner = self.lock();
        let mut due = Vec::new();
        while matches!(inner.heap.peek(), Some(Reverse(e)) if e.run_at <= now) {
            if let Some(Reverse(entry)) = inner.heap.pop() {
                due.push(entry);
            }
        }
        drop(inner);

        due.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        due.into_iter().map(|e| e.job).collect()
    }

    /// Block until a job is due, then hand out the highest-priority job
    /// among everything currently due (the heap alone orders by due time,
    /// so ties across distinct due times are settled here). Returns `None`
    /// once the queue is closed; pending entries are abandoned at that
    /// point (the scheduler drains first when its policy asks for that).
    pub fn next_due(&self) -> Option<Job> {
        let mut inner = self.lock();
        loop {
            if inner.closed {
                return None;
            }
            let now = Instant::now();
            let next_run = inner.heap.peek().map(|Reverse(e)| e.run_at);
            let wait_for = match next_run {
                Some(run_at) if run_at <= now => {
                    let mut due = Vec::new();
                    while matches!(inner.heap.peek(), Some(Reverse(e)) if e.run_at <= now) {
                        if let Some(Reverse(entry)) = inner.heap.pop() {
                            due.push(entry);
                        }
                    }
                    due.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
                    let mut due = due.into_iter();
                    let chosen = due.next();
                    for entry in due {
                        inner.heap.push(Reverse(entry));
                    }
                    return chosen.map(|e| e.job);
                }
                Some(run_at) => Some(run_at - now),
                None => None,
            };
            inner = match wait_for {
                Some(timeout) => {
                    self.due
                        .wait_timeout(inner, timeout)
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .0
                }
                None => self
                    .due
                    .wait(inner)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
            };
        }
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    /// Is anything due at `now`?
    pub fn has_due(&self, now: Instant) -> bool {
        matches!(self.lock().heap.peek(), Some(Reverse(e)) if e.run_at <= now)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn close(&self) {
        self.lock().closed = true;
        self.due.notify_all();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn job(name: &str, priority: Priority, run_at: Instant) -> Job {
        Job::new(name, priority, || Ok(())).scheduled_at(run_at)
    }

    #[test]
    fn drain_due_orders_by_priority_then_submission() {
        let queue = JobQueue::new();
        let now = Instant::now();
        queue.push(job("low", Priority::Low, now));
        queue.push(job("critical", Priority::Critical, now));
        queue.push(job("normal-1", Priority::Normal, now));
        queue.push(job("normal-2", Priority::Normal, now));
        queue.push(job("future", Priority::Critical, now + Duration::from_secs(60)));

        let names: Vec<String> = queue
            .drain_due(now)
            .into_iter()
            .map(|j| j.name)
            .collect();
        assert_eq!(names, vec!["critical", "normal-1", "normal-2", "low"]);
        // The future job stays queued.
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn nothing_due_before_run_at() {
        let queue = JobQueue::new();
        let now = Instant::now();
        queue.push(job("later", Priority::High, now + Duration::from_secs(5)));
        assert!(queue.drain_due(now).is_empty());
        assert_eq!(queue.drain_due(now + Duration::from_secs(5)).len(), 1);
    }

    #[test]
    fn next_due_wakes_for_new_work() {
        let queue = Arc::new(JobQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.next_due().map(|j| j.name))
        };

        std::thread::sleep(Duration::from_millis(20));
        queue.push(job("ping", Priority::Normal, Instant::now()));
        assert_eq!(waiter.join().unwrap().as_deref(), Some("ping"));
    }

    #[test]
    fn close_unblocks_waiters() {
        let queue = Arc::new(JobQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.next_due().is_none())
        };
        std::thread::sleep(Duration::from_millis(20));
        queue.close();
        assert!(waiter.join().unwrap());
        // Pushes after close are dropped.
        queue.push(job("late", Priority::Normal, Instant::now()));
        assert!(queue.is_empty());
    }
}
