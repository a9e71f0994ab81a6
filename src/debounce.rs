//! Trailing-edge debouncer
//!
//! Each [`Debouncer`] owns one timer thread parked on a condition variable.
//! `schedule` replaces the single pending slot under the same lock the timer
//! uses to take it, so a superseded action can never fire.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, warn};

use crate::dispatch::{Dispatcher, Job};

/// Where a fired action runs
#[derive(Clone, Debug)]
pub enum ExecutionContext {
    /// Directly on the debouncer's timer thread
    Worker,
    /// Posted back to the context that created the debouncer
    Affinity(Dispatcher),
}

struct Pending {
    action: Job,
    deadline: Instant,
    generation: u64,
}

#[derive(Default)]
struct Slot {
    pending: Option<Pending>,
    disposed: bool,
}

struct Shared {
    slot: Mutex<Slot>,
    wake: Condvar,
    /// Bumped on every schedule, cancel and dispose
    generation: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_live(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }
}

/// Coalesces bursts of triggers into a single delayed action
pub struct Debouncer {
    name: String,
    shared: Arc<Shared>,
    context: ExecutionContext,
    timer: Option<JoinHandle<()>>,
}

impl Debouncer {
    /// Debouncer whose actions run on its own worker thread
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_context(name, ExecutionContext::Worker)
    }

    /// Debouncer whose actions are posted to `dispatcher`'s queue
    pub fn with_affinity(name: impl Into<String>, dispatcher: Dispatcher) -> Self {
        Self::with_context(name, ExecutionContext::Affinity(dispatcher))
    }

    pub fn with_context(name: impl Into<String>, context: ExecutionContext) -> Self {
        let name = name.into();
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot::default()),
            wake: Condvar::new(),
            generation: AtomicU64::new(0),
        });

        let timer = {
            let shared = shared.clone();
            let context = context.clone();
            let thread_name = format!("debounce-{name}");
            thread::Builder::new()
                .name(thread_name)
                .spawn(move || timer_loop(&shared, &context))
        };

        let timer = match timer {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("Failed to spawn debounce timer '{name}': {e}");
                shared.lock().disposed = true;
                None
            }
        };

        Self {
            name,
            shared,
            context,
            timer,
        }
    }

    /// Run `action` once `delay` passes without another `schedule` call.
    /// Replaces any pending action. No-op after [`Debouncer::dispose`].
    pub fn schedule(&self, delay: Duration, action: impl FnOnce() + Send + 'static) {
        let mut slot = self.shared.lock();
        if slot.disposed {
            return;
        }

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if slot.pending.is_some() {
            debug!("[{}] superseding pending action", self.name);
        }
        slot.pending = Some(Pending {
            action: Box::new(action),
            deadline: Instant::now() + delay,
            generation,
        });
        drop(slot);
        self.shared.wake.notify_one();
    }

    /// Drop the pending action, if any
    pub fn cancel(&self) {
        let mut slot = self.shared.lock();
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        slot.pending = None;
        drop(slot);
        self.shared.wake.notify_one();
    }

    /// Cancel the pending action and refuse further scheduling
    pub fn dispose(&self) {
        let mut slot = self.shared.lock();
        if slot.disposed {
            return;
        }
        slot.disposed = true;
        slot.pending = None;
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        drop(slot);
        self.shared.wake.notify_all();
        debug!("[{}] disposed", self.name);
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.shared.lock().pending.is_some()
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.shared.lock().disposed
    }

    #[must_use]
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.dispose();
        if let Some(handle) = self.timer.take() {
            // An action running on the timer thread may own the last handle.
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("[{}] debounce timer thread panicked", self.name);
            }
        }
    }
}

fn timer_loop(shared: &Arc<Shared>, context: &ExecutionContext) {
    let mut slot = shared.lock();
    loop {
        if slot.disposed {
            return;
        }

        let deadline = match &slot.pending {
            None => {
                slot = shared
                    .wake
                    .wait(slot)
                    .unwrap_or_else(PoisonError::into_inner);
                continue;
            }
            Some(pending) => pending.deadline,
        };

        let now = Instant::now();
        if now < deadline {
            slot = shared
                .wake
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            continue;
        }

        let Some(pending) = slot.pending.take() else {
            continue;
        };
        drop(slot);
        fire(shared, context, pending);
        slot = shared.lock();
    }
}

fn fire(shared: &Arc<Shared>, context: &ExecutionContext, pending: Pending) {
    let Pending {
        action, generation, ..
    } = pending;

    match context {
        ExecutionContext::Worker => run_guarded(action),
        ExecutionContext::Affinity(dispatcher) => {
            let shared = shared.clone();
            let posted = dispatcher.post(move || {
                // A schedule/cancel that lands after posting still wins.
                if shared.is_live(generation) && !shared.lock().disposed {
                    run_guarded(action);
                }
            });
            if !posted {
                debug!("affinity queue closed, dropping debounced action");
            }
        }
    }
}

fn run_guarded(action: Job) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(action)) {
        let msg = panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!("Debounced action panicked: {msg}");
    }
}
