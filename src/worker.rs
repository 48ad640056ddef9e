//! Worker threads: the pop/steal/execute loop.
//!
//! Each worker owns a FIFO deque, refills it in batches from the global
//! injector, and steals from random peers when both run dry. The worker's
//! index and the job it is currently executing live in thread-local storage;
//! `submit_child` and `on_finished` resolve the implicit "current job"
//! through them.

use std::cell::Cell;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use core_affinity::CoreId;
use crossbeam::deque::Worker as Deque;

use crate::job::JobId;
use crate::job_system::Shared;

/// Idle backoff on a miss. A coarse sleep rather than a condition variable:
/// jobs are expected to be short and frequent.
const IDLE_BACKOFF: Duration = Duration::from_micros(100);

thread_local! {
    static WORKER_INDEX: Cell<Option<usize>> = const { Cell::new(None) };
    static CURRENT_JOB: Cell<Option<JobId>> = const { Cell::new(None) };
}

/// Worker index of the calling thread, if it is a worker of any job system.
pub(crate) fn worker_index() -> Option<usize> {
    WORKER_INDEX.with(|index| index.get())
}

/// Job the calling worker is presently executing.
pub(crate) fn current_job() -> Option<JobId> {
    CURRENT_JOB.with(|current| current.get())
}

fn set_current_job(id: Option<JobId>) {
    CURRENT_JOB.with(|current| current.set(id));
}

/// xorshift64 for steal-victim selection. Shift constants from Marsaglia's
/// "Xorshift RNGs"; seed 0 is remapped to avoid the all-zero lockup state.
pub(crate) struct StealRng {
    state: u64,
}

impl StealRng {
    pub(crate) fn new(seed: u64) -> Self {
        let seed = if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed };
        StealRng { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    pub(crate) fn pick(&mut self, n: usize) -> usize {
        (self.next_u64() % n as u64) as usize
    }
}

pub(crate) struct WorkerParams {
    pub(crate) index: usize,
    pub(crate) local: Deque<JobId>,
    pub(crate) shared: Arc<Shared>,
    pub(crate) core_id: Option<CoreId>,
}

/// A spawned worker thread.
pub(crate) struct Worker {
    index: usize,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn spawn(params: WorkerParams) -> Self {
        let index = params.index;
        let handle = thread::Builder::new()
            .name(format!("framejob-worker-{index}"))
            .spawn(move || Worker::run_loop(params))
            .expect("failed to spawn worker thread");
        Worker {
            index,
            handle: Some(handle),
        }
    }

    fn run_loop(params: WorkerParams) {
        let WorkerParams {
            index,
            local,
            shared,
            core_id,
        } = params;

        if let Some(core_id) = core_id {
            core_affinity::set_for_current(core_id);
        }
        WORKER_INDEX.with(|slot| slot.set(Some(index)));
        let mut rng = StealRng::new(0x9E37_79B9_7F4A_7C15 ^ (index as u64 + 1));

        while !shared.is_terminated() {
            let job = local
                .pop()
                .or_else(|| shared.refill_from_injector(&local))
                .or_else(|| shared.steal_from_peers(index, &mut rng));

            match job {
                Some(id) => {
                    set_current_job(Some(id));
                    shared.run_job(index, id);
                    set_current_job(None);
                }
                None => thread::sleep(IDLE_BACKOFF),
            }
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    /// Waits for the worker thread to exit its loop.
    pub(crate) fn join(mut self) -> thread::Result<()> {
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steal_rng_zero_seed_does_not_lock_up() {
        let mut rng = StealRng::new(0);
        let a = rng.next_u64();
        let b = rng.next_u64();
        assert_ne!(a, 0);
        assert_ne!(a, b);
    }

    #[test]
    fn test_steal_rng_pick_in_range() {
        let mut rng = StealRng::new(7);
        for _ in 0..1000 {
            assert!(rng.pick(3) < 3);
        }
    }

    #[test]
    fn test_non_worker_thread_has_no_identity() {
        assert_eq!(worker_index(), None);
        assert_eq!(current_job(), None);
    }
}
