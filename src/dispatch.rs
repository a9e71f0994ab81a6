//! UI-affinity execution context
//!
//! A [`DispatchQueue`] belongs to the thread that owns the visible preview.
//! Other threads post closures through a cloned [`Dispatcher`]; the owner
//! runs them when it pumps the queue, so every observable mutation happens
//! on the owning thread.

use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Sender};

/// Unit of work posted to the owning context
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle used to post jobs onto a [`DispatchQueue`]
#[derive(Clone)]
pub struct Dispatcher {
    tx: Sender<Job>,
}

impl Dispatcher {
    /// Post a job. Returns false if the owning queue is gone.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.tx.send(Box::new(job)).is_ok()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("queued", &self.tx.len())
            .finish()
    }
}

/// Receiving side, drained by the owning thread
pub struct DispatchQueue {
    tx: Sender<Job>,
    rx: Receiver<Job>,
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchQueue {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self { tx, rx }
    }

    #[must_use]
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher {
            tx: self.tx.clone(),
        }
    }

    /// Run every job queued so far without blocking. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    /// Block for up to `timeout` waiting for the first job, then drain the rest.
    pub fn run_for(&self, timeout: Duration) -> usize {
        match self.rx.recv_timeout(timeout) {
            Ok(job) => {
                job();
                1 + self.run_pending()
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => 0,
        }
    }

    /// Keep running jobs until `done` holds or `timeout` elapses.
    /// Returns whether `done` was satisfied.
    pub fn run_until(&self, timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.run_pending();
            if done() {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            self.run_for(remaining.min(Duration::from_millis(20)));
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
