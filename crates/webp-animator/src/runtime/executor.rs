use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;

/// A unit of background work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// The executor can no longer run jobs. The rejected job has been dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Decode executor is shut down")]
pub struct SpawnError;

/// Runs work off the calling thread.
pub trait Executor: Send + Sync {
    fn spawn(&self, job: Job) -> Result<(), SpawnError>;
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

/// Runs each job immediately on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn spawn(&self, job: Job) -> Result<(), SpawnError> {
        job();
        Ok(())
    }
}

/// Fixed-size pool of named worker threads fed by a channel.
pub struct WorkerPool {
    job_tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> std::io::Result<Self> {
        let threads = threads.max(1);
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<Job>();

        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let rx = job_rx.clone();
            let handle = thread::Builder::new()
                .name(format!("webp-decode-{i}"))
                .spawn(move || worker_loop(&rx))?;
            workers.push(handle);
        }
        log::debug!("Decode worker pool started with {threads} thread(s)");

        Ok(Self {
            job_tx: Some(job_tx),
            workers,
        })
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Finish queued jobs, then join the workers.
    pub fn shutdown(&mut self) {
        // Closing the channel ends each worker's receive loop.
        self.job_tx = None;
        for handle in self.workers.drain(..) {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

fn worker_loop(rx: &Receiver<Job>) {
    for job in rx {
        if let Err(e) = panic::catch_unwind(AssertUnwindSafe(job)) {
            log::error!("Decode job panicked: {}", panic_message(&*e));
        }
    }
    log::debug!(
        "Worker {} exiting",
        thread::current().name().unwrap_or("webp-decode")
    );
}

impl Executor for WorkerPool {
    fn spawn(&self, job: Job) -> Result<(), SpawnError> {
        let Some(tx) = &self.job_tx else {
            log::warn!("Decode worker pool is shut down; dropping job");
            return Err(SpawnError);
        };
        tx.send(job).map_err(|_| {
            log::warn!("Decode worker pool is gone; dropping job");
            SpawnError
        })
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn inline_runs_immediately() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        InlineExecutor
            .spawn(Box::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pool_runs_jobs_off_thread() {
        let pool = WorkerPool::new(2).unwrap();
        assert_eq!(pool.threads(), 2);
        let (tx, rx) = crossbeam_channel::unbounded();
        for i in 0..8 {
            let tx = tx.clone();
            pool.spawn(Box::new(move || {
                let name = thread::current().name().map(str::to_owned);
                let _ = tx.send((i, name));
            }))
            .unwrap();
        }
        let mut seen = Vec::new();
        for _ in 0..8 {
            let (i, name) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert!(name.unwrap().starts_with("webp-decode-"));
            seen.push(i);
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn pool_survives_panicking_job() {
        let pool = WorkerPool::new(1).unwrap();
        pool.spawn(Box::new(|| panic!("bad frame"))).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);
        pool.spawn(Box::new(move || {
            let _ = tx.send(42);
        }))
        .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    }

    #[test]
    fn shutdown_drains_queued_jobs() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut pool = WorkerPool::new(1).unwrap();
        for _ in 0..4 {
            let h = Arc::clone(&hits);
            pool.spawn(Box::new(move || {
                thread::sleep(Duration::from_millis(5));
                h.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }
        pool.shutdown();
        assert_eq!(hits.load(Ordering::SeqCst), 4);

        // Spawning after shutdown is rejected.
        let h = Arc::clone(&hits);
        let rejected = pool.spawn(Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(rejected, Err(SpawnError));
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn panic_messages_are_extracted() {
        let payload = panic::catch_unwind(|| panic!("frame {} broke", 3)).unwrap_err();
        assert_eq!(panic_message(&*payload), "frame 3 broke");
        let payload = panic::catch_unwind(|| panic!("static message")).unwrap_err();
        assert_eq!(panic_message(&*payload), "static message");
    }
}
