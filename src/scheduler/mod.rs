//! Priority job scheduler with delayed execution, retries, recurring jobs
//! and a fixed worker pool.
//!
//! Two execution modes share the same queue and status bookkeeping:
//! `run_pending(now)` drains and runs due jobs synchronously with an
//! explicit clock (deterministic, what most tests use), and `start()` spins
//! up a dispatcher plus worker threads for the real thing. Failed jobs are
//! requeued with exponential backoff and jitter until `max_retries`;
//! recurring jobs are requeued at `run_at + every` after each success.

mod pool;
mod queue;

use dashmap::DashMap;
use rand::Rng;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

use crate::ids::{self, IdKind};
use pool::WorkerPool;
use queue::JobQueue;

pub type JobId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Succeeded { runs: u32 },
    Retrying { attempt: u32 },
    Failed { attempts: u32, last_error: String },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ScheduleError {
    // Invalid input.
    #[error("worker count must be at least 1")]
    ZeroWorkers,
    #[error("no job {0}")]
    UnknownJob(JobId),

    // Business rule.
    #[error("scheduler is shutting down")]
    ShuttingDown,
}

type Work = Arc<dyn Fn() -> Result<(), String> + Send + Sync>;

/// A unit of work with a due time. Build one with [`Job::new`] and the
/// `with_*` methods, then hand it to a [`Scheduler`].
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub priority: Priority,
    pub(crate) run_at: Instant,
    pub(crate) every: Option<Duration>,
    pub(crate) max_retries: u32,
    attempt: u32,
    runs: u32,
    work: Work,
}

impl Job {
    pub fn new<F>(name: impl Into<String>, priority: Priority, work: F) -> Self
    where
        F: Fn() -> Result<(), String> + Send + Sync + 'static,
    {
        Self {
            id: ids::next(IdKind::Job),
            name: name.into(),
            priority,
            run_at: Instant::now(),
            every: None,
            max_retries: 0,
            attempt: 0,
            runs: 0,
            work: Arc::new(work),
        }
    }

    pub fn with_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub(crate) fn scheduled_at(mut self, run_at: Instant) -> Self {
        self.run_at = run_at;
        self
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("every", &self.every)
            .field("max_retries", &self.max_retries)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub workers: usize,
    pub backoff_base: Duration,
    /// On shutdown, wait for due and running jobs to finish before joining
    /// the workers. Future-scheduled and recurring entries are abandoned
    /// either way.
    pub drain_on_shutdown: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            backoff_base: Duration::from_millis(100),
            drain_on_shutdown: true,
        }
    }
}

struct Runtime {
    dispatcher: JoinHandle<()>,
    pool: WorkerPool,
}

pub struct Scheduler {
    queue: Arc<JobQueue>,
    statuses: Arc<DashMap<JobId, JobState>>,
    in_flight: Arc<AtomicUsize>,
    config: SchedulerConfig,
    accepting: AtomicBool,
    runtime: Mutex<Option<Runtime>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            queue: Arc::new(JobQueue::new()),
            statuses: Arc::new(DashMap::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            config,
            accepting: AtomicBool::new(true),
            runtime: Mutex::new(None),
        }
    }

    /// Submit for immediate execution (as soon as a worker is free).
    pub fn submit(&self, job: Job) -> Result<JobId, ScheduleError> {
        self.enqueue(job.scheduled_at(Instant::now()))
    }

    /// Submit to run after `delay`.
    pub fn submit_in(&self, job: Job, delay: Duration) -> Result<JobId, ScheduleError> {
        self.enqueue(job.scheduled_at(Instant::now() + delay))
    }

    /// Submit a recurring job: requeued at `run_at + every` after each
    /// successful run.
    pub fn submit_every(&self, mut job: Job, every: Duration) -> Result<JobId, ScheduleError> {
        job.every = Some(every);
        self.enqueue(job.scheduled_at(Instant::now()))
    }

    fn enqueue(&self, job: Job) -> Result<JobId, ScheduleError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(ScheduleError::ShuttingDown);
        }
        let id = job.id;
        self.statuses.insert(id, JobState::Pending);
        self.queue.push(job);
        Ok(id)
    }

    pub fn status(&self, id: JobId) -> Result<JobState, ScheduleError> {
        self.statuses
            .get(&id)
            .map(|s| s.value().clone())
            .ok_or(ScheduleError::UnknownJob(id))
    }

    /// Drain and run everything due by `now` on the calling thread, highest
    /// priority first. Returns how many jobs ran. Retries requeue relative
    /// to `now`, so tests advance a fabricated clock instead of sleeping.
    pub fn run_pending(&self, now: Instant) -> usize {
        let due = self.queue.drain_due(now);
        let count = due.len();
        for job in due {
            execute(
                job,
                now,
                &self.queue,
                &self.statuses,
                self.config.backoff_base,
            );
        }
        count
    }

    /// Spin up the dispatcher and worker threads.
    pub fn start(&self) -> Result<(), ScheduleError> {
        if self.config.workers == 0 {
            return Err(ScheduleError::ZeroWorkers);
        }
        let mut runtime = self.lock_runtime();
        if runtime.is_some() {
            return Ok(());
        }

        let queue = Arc::clone(&self.queue);
        let statuses = Arc::clone(&self.statuses);
        let in_flight = Arc::clone(&self.in_flight);
        let backoff_base = self.config.backoff_base;
        let pool = WorkerPool::start(self.config.workers, move |job| {
            execute(job, Instant::now(), &queue, &statuses, backoff_base);
            in_flight.fetch_sub(1, Ordering::SeqCst);
        });

        let dispatcher_tx = pool.sender();
        let queue = Arc::clone(&self.queue);
        let in_flight = Arc::clone(&self.in_flight);
        let dispatcher = thread::Builder::new()
            .name("job-dispatcher".into())
            .spawn(move || {
                while let Some(job) = queue.next_due() {
                    in_flight.fetch_add(1, Ordering::SeqCst);
                    if dispatcher_tx.send(pool::PoolMessage::Run(job)).is_err() {
                        break;
                    }
                }
            })
            .unwrap_or_else(|e| panic!("failed to spawn dispatcher thread: {e}"));

        info!(workers = self.config.workers, "scheduler started");
        *runtime = Some(Runtime { dispatcher, pool });
        Ok(())
    }

    /// Stop accepting jobs, optionally drain, and join every thread.
    pub fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        let runtime = self.lock_runtime().take();
        let Some(runtime) = runtime else {
            self.queue.close();
            return;
        };

        if self.config.drain_on_shutdown {
            // Wait for everything already due plus whatever is in a
            // worker's hands, including retries they schedule.
            loop {
                let busy = self.in_flight.load(Ordering::SeqCst) > 0
                    || self.queue.has_due(Instant::now());
                if !busy {
                    break;
                }
                thread::sleep(Duration::from_millis(5));
            }
        }

        self.queue.close();
        let _ = runtime.dispatcher.join();
        runtime.pool.shutdown();
        info!("scheduler stopped");
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    fn lock_runtime(&self) -> std::sync::MutexGuard<'_, Option<Runtime>> {
        self.runtime
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(1u32 << (attempt - 1).min(16));
    let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis().max(1) as u64 / 2);
    exp + Duration::from_millis(jitter_ms)
}

/// Run one job and settle its aftermath: success, recurrence, retry with
/// backoff, or terminal failure.
fn execute(
    mut job: Job,
    now: Instant,
    queue: &JobQueue,
    statuses: &DashMap<JobId, JobState>,
    backoff_base: Duration,
) {
    statuses.insert(job.id, JobState::Running);
    let result = (job.work)();

    match result {
        Ok(()) => {
            job.runs += 1;
            job.attempt = 0;
            statuses.insert(job.id, JobState::Succeeded { runs: job.runs });
            if let Some(every) = job.every {
                job.run_at = now + every;
                queue.push(job);
            }
        }
        Err(err) => {
            job.attempt += 1;
            if job.attempt <= job.max_retries {
                let delay = backoff_delay(backoff_base, job.attempt);
                warn!(
                    job = job.id,
                    name = %job.name,
                    attempt = job.attempt,
                    delay_ms = delay.as_millis() as u64,
                    "job failed, retrying"
                );
                statuses.insert(job.id, JobState::Retrying { attempt: job.attempt });
                job.run_at = now + delay;
                queue.push(job);
            } else {
                warn!(job = job.id, name = %job.name, error = %err, "job failed permanently");
                statuses.insert(
                    job.id,
                    JobState::Failed {
                        attempts: job.attempt,
                        last_error: err,
                    },
                );
            }
        }
    }
}
