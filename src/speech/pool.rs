//! Fixed set of worker threads for sentence synthesis

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::{Error, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs submitted jobs on a bounded number of OS threads
pub struct SynthesisPool {
    jobs: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl SynthesisPool {
    /// Start `size` workers (at least one)
    ///
    /// # Errors
    ///
    /// Returns error if a worker thread can't be spawned
    pub fn new(size: usize) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..size.max(1))
            .map(|id| {
                let rx = Arc::clone(&rx);
                std::thread::Builder::new()
                    .name(format!("junin-tts-{id}"))
                    .spawn(move || worker_loop(&rx))
                    .map_err(Error::Io)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            jobs: Some(tx),
            workers,
        })
    }

    /// Number of worker threads
    #[must_use]
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue a job; returns false once the pool is shutting down
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.jobs
            .as_ref()
            .is_some_and(|tx| tx.send(Box::new(job)).is_ok())
    }
}

fn worker_loop(rx: &Mutex<Receiver<Job>>) {
    loop {
        let job = {
            let Ok(rx) = rx.lock() else { return };
            match rx.recv() {
                Ok(job) => job,
                Err(_) => return,
            }
        };
        job();
    }
}

impl Drop for SynthesisPool {
    fn drop(&mut self) {
        drop(self.jobs.take());
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("synthesis worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_jobs_run_concurrently() {
        let pool = SynthesisPool::new(3).unwrap();
        let (tx, rx) = mpsc::channel();
        for i in 0..3 {
            let tx = tx.clone();
            pool.submit(move || {
                std::thread::sleep(Duration::from_millis(100));
                tx.send(i).unwrap();
            });
        }
        drop(tx);

        let start = std::time::Instant::now();
        let mut done: Vec<i32> = rx.iter().collect();
        done.sort_unstable();
        assert_eq!(done, vec![0, 1, 2]);
        assert!(start.elapsed() < Duration::from_millis(280));
    }

    #[test]
    fn test_drop_finishes_queued_jobs() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let pool = SynthesisPool::new(1).unwrap();
            assert_eq!(pool.size(), 1);
            for _ in 0..4 {
                let count = Arc::clone(&count);
                pool.submit(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }
}
