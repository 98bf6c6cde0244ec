//! Fixed worker pool fed over a crossbeam channel, shut down with an
//! explicit message per worker and joined on drop.

use crossbeam::channel::{unbounded, Receiver, Sender};
use std::thread::{self, JoinHandle};
use tracing::debug;

use super::Job;

pub(crate) enum PoolMessage {
    Run(Job),
    Shutdown,
}

pub(crate) struct WorkerPool {
    tx: Sender<PoolMessage>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` threads, each running `execute` on the jobs it
    /// receives. `execute` owns retry/requeue decisions.
    pub fn start<F>(workers: usize, execute: F) -> Self
    where
        F: Fn(Job) + Send + Sync + Clone + 'static,
    {
        let (tx, rx): (Sender<PoolMessage>, Receiver<PoolMessage>) = unbounded();
        let handles = (0..workers)
            .map(|worker| {
                let rx = rx.clone();
                let execute = execute.clone();
                thread::Builder::new()
                    .name(format!("job-worker-{worker}"))
                    .spawn(move || {
                        while let Ok(msg) = rx.recv() {
                            match msg {
                                PoolMessage::Run(job) => execute(job),
                                PoolMessage::Shutdown => {
                                    debug!(worker, "worker shutting down");
                                    break;
                                }
                            }
                        }
                    })
                    .unwrap_or_else(|e| panic!("failed to spawn worker thread: {e}"))
            })
            .collect();
        Self { tx, handles }
    }

    pub fn sender(&self) -> Sender<PoolMessage> {
        self.tx.clone()
    }

    /// One shutdown message per worker, then join them all.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        for _ in &self.handles {
            let _ = self.tx.send(PoolMessage::Shutdown);
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}
