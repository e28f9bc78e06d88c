//! Fixed-size worker pool with explicit slot assignment.
//!
//! Each slot is backed by one persistent named thread. The caller picks a
//! slot with [`WorkerPool::find_idle`] and hands it a job with
//! [`WorkerPool::dispatch`]; the pool never grows. A failed job is recorded
//! and re-raised by the next `find_idle` or `join_all`.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::cancel::{CancellationToken, CANCEL_POLL_INTERVAL};
use crate::error::{Error, Result};
use crate::types::Stage;

/// Work item executed on a pool slot.
pub type Job = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// What a job is working on, used to attribute failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobContext {
    /// Stage the job belongs to.
    pub stage: Stage,
    /// Chunk the job processes.
    pub chunk: usize,
}

impl JobContext {
    /// Create a job context.
    pub fn new(stage: Stage, chunk: usize) -> Self {
        Self { stage, chunk }
    }
}

/// Pool counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Jobs handed to a slot.
    pub jobs_dispatched: u64,
    /// Jobs that returned `Ok`.
    pub jobs_completed: u64,
    /// Jobs that returned an error or panicked.
    pub jobs_failed: u64,
    /// Most slots busy at the same time.
    pub peak_busy: usize,
}

#[derive(Default)]
struct Slot {
    busy: bool,
    pending: Option<(JobContext, Job)>,
}

struct PoolState {
    slots: Vec<Slot>,
    failure: Option<Error>,
    shutdown: bool,
    stats: PoolStats,
}

impl PoolState {
    fn busy_count(&self) -> usize {
        self.slots.iter().filter(|s| s.busy).count()
    }
}

struct Shared {
    state: Mutex<PoolState>,
    /// Signalled when a job is assigned or on shutdown.
    work: Condvar,
    /// Signalled when a slot goes idle.
    idle: Condvar,
}

/// Pool of reusable worker threads, one job per slot at a time.
pub struct WorkerPool {
    name: String,
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn a pool with `size` slots. Threads are named `{name}-{slot}`.
    pub fn new(name: impl Into<String>, size: usize) -> Result<Self> {
        let name = name.into();
        if size == 0 {
            return Err(Error::config(format!("pool '{}' needs at least one slot", name)));
        }

        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                slots: (0..size).map(|_| Slot::default()).collect(),
                failure: None,
                shutdown: false,
                stats: PoolStats::default(),
            }),
            work: Condvar::new(),
            idle: Condvar::new(),
        });

        let mut pool = Self {
            name,
            shared,
            handles: Vec::with_capacity(size),
        };
        for slot in 0..size {
            let shared = Arc::clone(&pool.shared);
            let handle = thread::Builder::new()
                .name(format!("{}-{}", pool.name, slot))
                .spawn(move || worker_loop(shared, slot))?;
            pool.handles.push(handle);
        }

        tracing::debug!(pool = %pool.name, size, "worker pool started");
        Ok(pool)
    }

    /// Pool name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of slots.
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Slots currently running a job.
    pub fn busy_count(&self) -> usize {
        self.shared.state.lock().busy_count()
    }

    /// Snapshot of the pool counters.
    pub fn stats(&self) -> PoolStats {
        self.shared.state.lock().stats.clone()
    }

    /// Return the first idle slot, blocking until one frees.
    ///
    /// Fails with the first recorded job failure, or `Cancelled` once the
    /// token trips.
    pub fn find_idle(&self, cancel: &CancellationToken) -> Result<usize> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(err) = state.failure.take() {
                return Err(err);
            }
            cancel.check()?;
            if let Some(slot) = state.slots.iter().position(|s| !s.busy) {
                return Ok(slot);
            }
            self.shared.idle.wait_for(&mut state, CANCEL_POLL_INTERVAL);
        }
    }

    /// Start `job` on `slot`. The slot must be idle.
    pub fn dispatch(&self, slot: usize, context: JobContext, job: Job) -> Result<()> {
        let mut state = self.shared.state.lock();
        let size = state.slots.len();
        let entry = state
            .slots
            .get_mut(slot)
            .ok_or(Error::InvalidSlot { slot, size })?;
        if entry.busy {
            return Err(Error::SlotBusy { slot });
        }
        entry.busy = true;
        entry.pending = Some((context, job));

        let busy = state.busy_count();
        state.stats.jobs_dispatched += 1;
        state.stats.peak_busy = state.stats.peak_busy.max(busy);
        drop(state);

        self.shared.work.notify_all();
        Ok(())
    }

    /// Wait for an idle slot and start `job` on it. Returns the slot used.
    pub fn execute(
        &self,
        context: JobContext,
        job: Job,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let slot = self.find_idle(cancel)?;
        self.dispatch(slot, context, job)?;
        Ok(slot)
    }

    /// Block until every slot is idle, then re-raise the first failure.
    pub fn join_all(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        while state.slots.iter().any(|s| s.busy) {
            self.shared.idle.wait(&mut state);
        }
        match state.failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("size", &self.size())
            .field("busy", &self.busy_count())
            .finish()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.work.notify_all();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        tracing::debug!(pool = %self.name, "worker pool stopped");
    }
}

fn worker_loop(shared: Arc<Shared>, slot: usize) {
    let mut state = shared.state.lock();
    loop {
        if let Some((context, job)) = state.slots[slot].pending.take() {
            let outcome = MutexGuard::unlocked(&mut state, || run_job(job));
            finish_job(&mut state, slot, context, outcome);
            shared.idle.notify_all();
            continue;
        }
        if state.shutdown {
            break;
        }
        shared.work.wait(&mut state);
    }
}

fn run_job(job: Job) -> Result<()> {
    match panic::catch_unwind(AssertUnwindSafe(job)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(Error::WorkerPanicked(message))
        }
    }
}

fn finish_job(state: &mut PoolState, slot: usize, context: JobContext, outcome: Result<()>) {
    state.slots[slot].busy = false;
    match outcome {
        Ok(()) => state.stats.jobs_completed += 1,
        Err(err) => {
            state.stats.jobs_failed += 1;
            let err = err.in_stage(context.stage, context.chunk);
            tracing::warn!(slot, chunk = context.chunk, stage = %context.stage, error = %err, "job failed");
            if state.failure.is_none() {
                state.failure = Some(err);
            }
        }
    }
}
