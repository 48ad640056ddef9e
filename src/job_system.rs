//! The job system: scheduling API, completion protocol, and playback engine.
//!
//! The `JobSystem` is the primary entry point. It owns the worker threads,
//! their queues, the pool registry, and the global outstanding-job counter
//! whose zero crossing is the quiescence condition `wait` blocks on.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Instant;

use crossbeam::deque::{Injector, Steal, Stealer, Worker as Deque};

use crate::job::{JobFn, JobId};
#[cfg(feature = "metrics")]
use crate::metrics::Metrics;
use crate::pool::PoolSet;
use crate::trace::TraceLog;
use crate::worker::{self, StealRng, Worker, WorkerParams};
use crate::PinningStrategy;

/// Steal attempts at random peers per scheduling miss.
const STEAL_ATTEMPTS: usize = 5;

/// Bounded retries when the injector reports contention.
const MAX_INJECTOR_RETRIES: usize = 3;

/// State shared between the user-facing handle and the worker threads.
pub(crate) struct Shared {
    injector: Injector<JobId>,
    stealers: Vec<Stealer<JobId>>,
    pools: PoolSet,
    /// Jobs enqueued but not yet finished, system-wide.
    outstanding: AtomicU64,
    idle_lock: Mutex<()>,
    quiescent: Condvar,
    terminate: AtomicBool,
    trace: TraceLog,
    #[cfg(feature = "metrics")]
    pub(crate) metrics: Metrics,
}

impl Shared {
    pub(crate) fn is_terminated(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
    }

    /// Publishes a job for execution and accounts for it in the global
    /// counter. Everything lands in the injector; workers batch-refill
    /// their local deques from it.
    fn enqueue(&self, id: JobId) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        #[cfg(feature = "metrics")]
        self.metrics.jobs_enqueued.fetch_add(1, Ordering::Relaxed);
        self.injector.push(id);
    }

    pub(crate) fn refill_from_injector(&self, local: &Deque<JobId>) -> Option<JobId> {
        let mut retries = 0;
        loop {
            match self.injector.steal_batch_and_pop(local) {
                Steal::Success(id) => return Some(id),
                Steal::Empty => return None,
                Steal::Retry => {
                    retries += 1;
                    if retries >= MAX_INJECTOR_RETRIES {
                        return None;
                    }
                }
            }
        }
    }

    /// Tries up to [`STEAL_ATTEMPTS`] uniformly random peers (never the
    /// caller), stopping on the first success.
    pub(crate) fn steal_from_peers(&self, me: usize, rng: &mut StealRng) -> Option<JobId> {
        let peers = self.stealers.len();
        if peers <= 1 {
            return None;
        }
        for _ in 0..STEAL_ATTEMPTS {
            let mut victim = rng.pick(peers - 1);
            if victim >= me {
                victim += 1;
            }
            if let Steal::Success(id) = self.stealers[victim].steal() {
                #[cfg(feature = "metrics")]
                self.metrics.steals_success.fetch_add(1, Ordering::Relaxed);
                return Some(id);
            }
            #[cfg(feature = "metrics")]
            self.metrics.steals_failed.fetch_add(1, Ordering::Relaxed);
        }
        None
    }

    /// Allocates a job bound to `body`, wiring up parent accounting and the
    /// recorded child list when a parent is given.
    fn allocate_bound(&self, pool_id: u32, parent: Option<JobId>, body: JobFn) -> JobId {
        let pool = self.pools.get(pool_id);
        let slot_index = pool.allocate();
        let id = JobId {
            pool: pool_id,
            slot: slot_index,
        };
        let slot = pool.slot(slot_index);
        slot.reset(parent);
        slot.set_body(body);
        #[cfg(feature = "metrics")]
        self.metrics.jobs_allocated.fetch_add(1, Ordering::Relaxed);

        if let Some(parent_id) = parent {
            let parent_pool = self.pools.get(parent_id.pool);
            let parent_slot = parent_pool.slot(parent_id.slot);
            parent_slot.add_pending_child();
            match parent_slot.append_child(id) {
                None => {}
                Some(prev) => {
                    self.pools.get(prev.pool).slot(prev.slot).set_next_sibling(id);
                }
            }
        }
        id
    }

    /// Executes one job: arm the completion counter, run the body, replay
    /// recorded children when the owning pool is playing back, then retire
    /// the job's own unit of work.
    pub(crate) fn run_job(&self, worker_index: usize, id: JobId) {
        let span_start = self.trace.is_enabled().then(Instant::now);
        #[cfg(feature = "metrics")]
        self.metrics.jobs_run.fetch_add(1, Ordering::Relaxed);

        let pool = self.pools.get(id.pool);
        let slot = pool.slot(id.slot);

        // The job counts as its own child: the counter cannot reach zero
        // before the body has returned and the playback walk ran.
        slot.arm();

        if let Some(body) = slot.take_body() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| body()));
            // The body goes back into the slot so a recorded pool can
            // execute it again during playback.
            slot.put_body(body);
            if let Err(payload) = outcome {
                let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                    *s
                } else if let Some(s) = payload.downcast_ref::<String>() {
                    s.as_str()
                } else {
                    "unknown panic payload"
                };
                eprintln!("job body panicked: {msg}");
                // The completion protocol still runs so the tree and the
                // global counter stay consistent.
            }
        }

        if pool.is_playing_back() {
            // Re-enqueue the children recorded during the first execution;
            // structural calls in the body were no-ops.
            let mut child = slot.first_child();
            while let Some(child_id) = child {
                slot.add_pending_child();
                child = self.pools.get(child_id.pool).slot(child_id.slot).next_sibling();
                self.enqueue(child_id);
            }
            if let Some(completion) = pool.finish_one_playback() {
                #[cfg(feature = "metrics")]
                self.metrics.playbacks_finished.fetch_add(1, Ordering::Relaxed);
                self.enqueue(completion);
            }
        }

        if slot.complete_one() {
            self.finish_job(id);
        }

        if let Some(start) = span_start {
            self.trace.record(worker_index, start, Instant::now());
        }
    }

    /// Runs exactly once per job completion, after the job and all of its
    /// descendants have finished.
    fn finish_job(&self, id: JobId) {
        let pool = self.pools.get(id.pool);
        let slot = pool.slot(id.slot);

        if let Some(parent_id) = slot.parent() {
            let parent_pool = self.pools.get(parent_id.pool);
            if parent_pool.slot(parent_id.slot).complete_one() {
                self.finish_job(parent_id);
            }
        }

        if let Some(successor) = slot.on_finished() {
            self.enqueue(successor);
        }

        #[cfg(feature = "metrics")]
        self.metrics.jobs_finished.fetch_add(1, Ordering::Relaxed);

        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            // Taking the lock before notifying pairs with the check-then-wait
            // in `wait`, so the wakeup cannot be missed.
            let _guard = self.idle_lock.lock().unwrap();
            self.quiescent.notify_all();
        }

        slot.release();
    }
}

/// The main job system handle. Cheap to clone; all clones drive the same
/// workers and pools.
///
/// # Example
///
/// ```
/// use framejob::JobSystem;
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let jobs = JobSystem::new(4, 1);
/// let hits = Arc::new(AtomicUsize::new(0));
///
/// for _ in 0..16 {
///     let hits = Arc::clone(&hits);
///     jobs.submit(move || {
///         hits.fetch_add(1, Ordering::SeqCst);
///     });
/// }
///
/// jobs.wait();
/// assert_eq!(hits.load(Ordering::SeqCst), 16);
/// jobs.shutdown().expect("shutdown failed");
/// ```
#[derive(Clone)]
pub struct JobSystem {
    shared: Arc<Shared>,
    workers: Arc<Mutex<Vec<Worker>>>,
}

impl JobSystem {
    /// Creates a job system with `thread_count` workers (0 means one per
    /// hardware thread) and `num_pools` pre-created job pools. Further pools
    /// are created lazily by index.
    pub fn new(thread_count: usize, num_pools: usize) -> Self {
        Self::new_with_strategy(thread_count, num_pools, PinningStrategy::None)
    }

    /// Creates a job system with each worker pinned to a CPU core.
    pub fn new_with_affinity(thread_count: usize, num_pools: usize) -> Self {
        Self::new_with_strategy(thread_count, num_pools, PinningStrategy::Linear)
    }

    /// Creates a job system with one worker per hardware thread and a single
    /// pool.
    pub fn with_default_threads() -> Self {
        Self::new(0, 1)
    }

    /// Creates a job system with an explicit worker placement strategy.
    pub fn new_with_strategy(
        thread_count: usize,
        num_pools: usize,
        strategy: PinningStrategy,
    ) -> Self {
        let thread_count = if thread_count == 0 {
            thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
        } else {
            thread_count
        };

        let mut locals = Vec::with_capacity(thread_count);
        let mut stealers = Vec::with_capacity(thread_count);
        for _ in 0..thread_count {
            let deque = Deque::new_fifo();
            stealers.push(deque.stealer());
            locals.push(deque);
        }

        let shared = Arc::new(Shared {
            injector: Injector::new(),
            stealers,
            pools: PoolSet::new(num_pools.max(1)),
            outstanding: AtomicU64::new(0),
            idle_lock: Mutex::new(()),
            quiescent: Condvar::new(),
            terminate: AtomicBool::new(false),
            trace: TraceLog::new(thread_count),
            #[cfg(feature = "metrics")]
            metrics: Metrics::new(),
        });

        let core_ids = match strategy {
            PinningStrategy::None => Vec::new(),
            PinningStrategy::Linear => core_affinity::get_core_ids().unwrap_or_default(),
        };

        let workers = locals
            .into_iter()
            .enumerate()
            .map(|(index, local)| {
                let core_id = match strategy {
                    PinningStrategy::None => None,
                    PinningStrategy::Linear => {
                        core_ids.get(index % core_ids.len().max(1)).copied()
                    }
                };
                Worker::spawn(WorkerParams {
                    index,
                    local,
                    shared: Arc::clone(&shared),
                    core_id,
                })
            })
            .collect();

        JobSystem {
            shared,
            workers: Arc::new(Mutex::new(workers)),
        }
    }

    /// Enqueues a top-level job in pool 0.
    pub fn submit<F>(&self, f: F)
    where
        F: Fn() + Send + 'static,
    {
        self.submit_to(0, f);
    }

    /// Enqueues a top-level job in the given pool.
    ///
    /// The job never becomes a child of the calling job, even when submitted
    /// from inside a body. The first job submitted to a pool after a reset
    /// occupies slot 0 and is the root a later [`playback`](Self::playback)
    /// re-executes.
    pub fn submit_to<F>(&self, pool_id: u32, f: F)
    where
        F: Fn() + Send + 'static,
    {
        let id = self.shared.allocate_bound(pool_id, None, Box::new(f));
        self.shared.enqueue(id);
    }

    /// Enqueues a child of the currently running job, in that job's pool.
    ///
    /// The parent completes only after all of its children (transitively)
    /// have completed. During playback of the pool the call is a no-op:
    /// children are replayed from the recording instead.
    ///
    /// # Panics
    ///
    /// Panics when called from outside a job body.
    pub fn submit_child<F>(&self, f: F)
    where
        F: Fn() + Send + 'static,
    {
        let current = Self::expect_current("submit_child");
        self.submit_child_in(current, current.pool, f);
    }

    /// Enqueues a child of the currently running job in a specific pool.
    ///
    /// # Panics
    ///
    /// Panics when called from outside a job body.
    pub fn submit_child_to<F>(&self, pool_id: u32, f: F)
    where
        F: Fn() + Send + 'static,
    {
        let current = Self::expect_current("submit_child_to");
        self.submit_child_in(current, pool_id, f);
    }

    fn submit_child_in<F>(&self, parent: JobId, pool_id: u32, f: F)
    where
        F: Fn() + Send + 'static,
    {
        if self.shared.pools.get(pool_id).is_playing_back() {
            return;
        }
        let id = self.shared.allocate_bound(pool_id, Some(parent), Box::new(f));
        self.shared.enqueue(id);
    }

    /// Registers a successor for the currently running job, scheduled once
    /// the job and all of its descendants have completed. At most one
    /// successor per recording; a no-op while the job's pool is playing
    /// back (the recorded successor fires instead).
    ///
    /// # Panics
    ///
    /// Panics when called from outside a job body.
    pub fn on_finished<F>(&self, f: F)
    where
        F: Fn() + Send + 'static,
    {
        let current = Self::expect_current("on_finished");
        let pool = self.shared.pools.get(current.pool);
        if pool.is_playing_back() {
            return;
        }
        let successor = self.shared.allocate_bound(current.pool, None, Box::new(f));
        pool.slot(current.slot).set_on_finished(successor);
    }

    /// Re-executes the job graph recorded in `pool_id`, then runs `on_done`.
    ///
    /// The recorded root (slot 0) is seeded; every executing job re-enqueues
    /// its recorded children and successors, so each recorded job runs its
    /// body exactly once more. `on_done` is allocated in the caller's
    /// context: inside a job body it inherits that job's parent and pool,
    /// otherwise it is a parent-less job in pool 0.
    ///
    /// # Panics
    ///
    /// Panics when the pool was never used, is already playing back, or when
    /// the completion job would land in the pool being played.
    pub fn playback<F>(&self, pool_id: u32, on_done: F)
    where
        F: Fn() + Send + 'static,
    {
        let played = self
            .shared
            .pools
            .try_get(pool_id)
            .unwrap_or_else(|| panic!("playback of job pool {pool_id} that was never used"));

        let (parent, context_pool) = match worker::current_job() {
            Some(current) => {
                let pool = self.shared.pools.get(current.pool);
                (pool.slot(current.slot).parent(), current.pool)
            }
            None => (None, 0),
        };
        assert_ne!(
            context_pool, pool_id,
            "playback completion job may not be allocated in the pool being played"
        );

        let completion = self.shared.allocate_bound(context_pool, parent, Box::new(on_done));

        let recorded = played.recorded_len();
        if recorded == 0 {
            // Nothing was recorded; complete immediately.
            self.shared.enqueue(completion);
            return;
        }

        #[cfg(feature = "metrics")]
        self.shared.metrics.playbacks_started.fetch_add(1, Ordering::Relaxed);
        played.begin_playback(recorded, completion);
        self.shared.enqueue(JobId {
            pool: pool_id,
            slot: 0,
        });
    }

    /// Rewinds a pool's allocation cursor for a new recording cycle.
    ///
    /// Completed slots become reusable in their original allocation order.
    /// Recorded links and bodies survive until each slot is re-allocated, so
    /// the previous recording stays playable until then.
    pub fn reset_pool(&self, pool_id: u32) {
        self.shared.pools.get(pool_id).reset();
    }

    /// Blocks until no jobs are outstanding system-wide, or until the system
    /// is terminated.
    pub fn wait(&self) {
        let shared = &self.shared;
        let mut idle = shared.idle_lock.lock().unwrap();
        while shared.outstanding.load(Ordering::SeqCst) != 0 && !shared.is_terminated() {
            idle = shared.quiescent.wait(idle).unwrap();
        }
    }

    /// Signals workers to exit their loops. In-flight jobs finish; queued
    /// jobs are dropped. Does not block.
    pub fn terminate(&self) {
        self.shared.terminate.store(true, Ordering::SeqCst);
        let _guard = self.shared.idle_lock.lock().unwrap();
        self.shared.quiescent.notify_all();
    }

    /// Waits for all worker threads to exit. Call [`terminate`](Self::terminate)
    /// first, or this blocks until someone does.
    pub fn join(&self) -> Result<(), String> {
        let workers: Vec<Worker> = {
            let mut guard = self.workers.lock().unwrap();
            guard.drain(..).collect()
        };
        let mut failed = 0;
        for worker in workers {
            let index = worker.index();
            if worker.join().is_err() {
                failed += 1;
                eprintln!("worker {index} panicked during execution");
            }
        }
        if failed > 0 {
            Err(format!("{failed} worker thread(s) panicked"))
        } else {
            Ok(())
        }
    }

    /// Drains outstanding work, terminates, and joins the workers.
    pub fn shutdown(self) -> Result<(), String> {
        self.wait();
        self.terminate();
        self.join()
    }

    /// Worker index of the calling thread, or `None` off the worker pool.
    pub fn thread_index(&self) -> Option<usize> {
        worker::worker_index()
    }

    /// Job the calling worker is presently executing.
    pub fn current_job(&self) -> Option<JobId> {
        worker::current_job()
    }

    /// Number of worker threads.
    pub fn num_workers(&self) -> usize {
        self.shared.stealers.len()
    }

    /// Starts recording job execution spans for chrome://tracing export.
    pub fn enable_tracing(&self) {
        self.shared.trace.enable();
    }

    pub fn disable_tracing(&self) {
        self.shared.trace.disable();
    }

    /// Writes recorded execution spans as a chrome://tracing JSON file.
    /// Export at a quiet point ([`wait`](Self::wait)) for a complete file;
    /// spans recorded mid-export may be missed.
    pub fn export_trace(&self, path: &str) -> std::io::Result<()> {
        self.shared.trace.export(path)
    }

    /// Snapshot of the scheduler counters.
    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> crate::metrics::MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    fn expect_current(op: &str) -> JobId {
        worker::current_job()
            .unwrap_or_else(|| panic!("{op} must be called from inside a running job"))
    }
}
