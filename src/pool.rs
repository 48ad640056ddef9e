//! Frame-scoped job pools: segmented bump arenas with playback state.
//!
//! A pool hands out job slots from fixed-capacity segments appended on
//! demand. Segments are never moved or freed while the pool is alive, so
//! `JobId`s stay stable across the whole recording/playback lifecycle.
//! `reset` only rewinds the allocation cursor: the slots below it keep their
//! recorded child/sibling/successor links and bodies, which is what playback
//! re-executes.

use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::job::{JobId, JobSlot, Link};

/// Slots per segment.
pub(crate) const SEGMENT_LEN: usize = 4096;

/// Upper bound on segments per pool (16M slots). Hitting it means the
/// embedding application recorded without ever resetting; growth past this
/// is fatal.
const MAX_SEGMENTS: usize = 4096;

struct Segment {
    slots: Box<[JobSlot]>,
}

impl Segment {
    fn new() -> Self {
        Segment {
            slots: (0..SEGMENT_LEN).map(|_| JobSlot::new()).collect(),
        }
    }
}

/// One recording's worth of job slots plus the state driving its playback.
pub(crate) struct JobPool {
    id: u32,
    /// Fixed table of segment pointers. An entry is published once under
    /// `grow_lock` and stays valid until the pool drops, so slot references
    /// handed out by [`slot`](Self::slot) never dangle.
    segments: Box<[AtomicPtr<Segment>]>,
    segment_count: AtomicUsize,
    grow_lock: Mutex<()>,
    /// Allocation cursor for the current recording cycle.
    next_index: AtomicU32,
    playing_back: AtomicBool,
    jobs_left_to_play: AtomicU32,
    on_playback_finished: Link,
}

impl JobPool {
    pub(crate) fn new(id: u32) -> Self {
        let segments: Box<[AtomicPtr<Segment>]> = (0..MAX_SEGMENTS)
            .map(|_| AtomicPtr::new(std::ptr::null_mut()))
            .collect();
        let pool = JobPool {
            id,
            segments,
            segment_count: AtomicUsize::new(0),
            grow_lock: Mutex::new(()),
            next_index: AtomicU32::new(0),
            playing_back: AtomicBool::new(false),
            jobs_left_to_play: AtomicU32::new(0),
            on_playback_finished: Link::empty(),
        };
        pool.ensure_segment(0);
        pool
    }

    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    /// Reserves the next slot for this recording cycle and claims it.
    ///
    /// Indices are handed out atomically, so each probe inspects a slot no
    /// other allocator is looking at. A slot still owned by an in-flight job
    /// from the previous cycle is skipped by taking the next index.
    pub(crate) fn allocate(&self) -> u32 {
        debug_assert!(
            !self.is_playing_back(),
            "allocating from pool {} while it is playing back",
            self.id
        );
        loop {
            let index = self.next_index.fetch_add(1, Ordering::SeqCst);
            self.ensure_segment(index as usize / SEGMENT_LEN);
            if self.slot(index).try_claim() {
                return index;
            }
        }
    }

    /// Appends segments until `seg` exists, double-checking under the growth
    /// lock. Individual allocation never takes this lock.
    fn ensure_segment(&self, seg: usize) {
        if seg < self.segment_count.load(Ordering::Acquire) {
            return;
        }
        let _guard = self.grow_lock.lock().unwrap();
        let mut count = self.segment_count.load(Ordering::Acquire);
        while count <= seg {
            assert!(
                count < self.segments.len(),
                "job pool {} exhausted its segment table ({} slots)",
                self.id,
                self.segments.len() * SEGMENT_LEN
            );
            let segment = Box::into_raw(Box::new(Segment::new()));
            self.segments[count].store(segment, Ordering::Release);
            count += 1;
            self.segment_count.store(count, Ordering::Release);
        }
    }

    /// Resolves a slot index. Panics on an index that was never allocated.
    pub(crate) fn slot(&self, index: u32) -> &JobSlot {
        let seg = index as usize / SEGMENT_LEN;
        let ptr = self.segments[seg].load(Ordering::Acquire);
        assert!(!ptr.is_null(), "pool {} slot {} does not exist", self.id, index);
        // SAFETY: the entry was published by `ensure_segment` via
        // `Box::into_raw`, is never replaced, and is freed only in `Drop`,
        // which requires exclusive access to the pool.
        let segment = unsafe { &*ptr };
        &segment.slots[index as usize % SEGMENT_LEN]
    }

    /// Number of slots allocated in the current recording cycle.
    pub(crate) fn recorded_len(&self) -> u32 {
        self.next_index.load(Ordering::SeqCst)
    }

    /// Rewinds the allocation cursor for a new recording cycle.
    ///
    /// Completed slots are already available for reuse; their links and
    /// bodies are preserved so the previous recording can still be played
    /// back, and are wiped only when the slot is re-allocated.
    pub(crate) fn reset(&self) {
        self.next_index.store(0, Ordering::SeqCst);
    }

    pub(crate) fn is_playing_back(&self) -> bool {
        self.playing_back.load(Ordering::SeqCst)
    }

    /// Arms playback: every recorded slot must execute once before the
    /// completion job fires.
    pub(crate) fn begin_playback(&self, recorded: u32, completion: JobId) {
        assert!(
            !self.playing_back.swap(true, Ordering::SeqCst),
            "pool {} is already playing back",
            self.id
        );
        self.jobs_left_to_play.store(recorded, Ordering::SeqCst);
        self.on_playback_finished.set(Some(completion));
    }

    /// Accounts for one recorded job having executed during playback.
    ///
    /// On the final decrement, playback ends and the completion job is
    /// handed back to the caller for enqueueing.
    pub(crate) fn finish_one_playback(&self) -> Option<JobId> {
        if self.jobs_left_to_play.fetch_sub(1, Ordering::SeqCst) != 1 {
            return None;
        }
        self.playing_back.store(false, Ordering::SeqCst);
        let completion = self.on_playback_finished.get();
        self.on_playback_finished.set(None);
        completion
    }
}

impl Drop for JobPool {
    fn drop(&mut self) {
        let count = *self.segment_count.get_mut();
        for entry in &mut self.segments[..count] {
            let ptr = *entry.get_mut();
            if !ptr.is_null() {
                // SAFETY: published by `ensure_segment` via `Box::into_raw`
                // and freed exactly once here.
                drop(unsafe { Box::from_raw(ptr) });
            }
        }
    }
}

/// Lazy by-index pool registry. Pools are created on first use and live
/// until the scheduler drops.
pub(crate) struct PoolSet {
    pools: RwLock<Vec<Arc<JobPool>>>,
}

impl PoolSet {
    pub(crate) fn new(initial: usize) -> Self {
        let pools = (0..initial as u32).map(|id| Arc::new(JobPool::new(id))).collect();
        PoolSet {
            pools: RwLock::new(pools),
        }
    }

    /// Returns the pool, creating it (and any lower-indexed gaps) on demand.
    pub(crate) fn get(&self, id: u32) -> Arc<JobPool> {
        {
            let pools = self.pools.read().unwrap();
            if let Some(pool) = pools.get(id as usize) {
                return Arc::clone(pool);
            }
        }
        let mut pools = self.pools.write().unwrap();
        while pools.len() <= id as usize {
            let new_id = pools.len() as u32;
            pools.push(Arc::new(JobPool::new(new_id)));
        }
        Arc::clone(&pools[id as usize])
    }

    /// Returns the pool only if it already exists.
    pub(crate) fn try_get(&self, id: u32) -> Option<Arc<JobPool>> {
        self.pools.read().unwrap().get(id as usize).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_hands_out_sequential_indices() {
        let pool = JobPool::new(0);
        assert_eq!(pool.allocate(), 0);
        assert_eq!(pool.allocate(), 1);
        assert_eq!(pool.allocate(), 2);
        assert_eq!(pool.recorded_len(), 3);
    }

    #[test]
    fn test_growth_across_segment_boundary() {
        let pool = JobPool::new(0);
        for expected in 0..(SEGMENT_LEN as u32 + 10) {
            assert_eq!(pool.allocate(), expected);
        }
        // Slots from both segments resolve.
        pool.slot(0).release();
        pool.slot(SEGMENT_LEN as u32 + 5).release();
    }

    #[test]
    fn test_reset_reuses_released_slots_in_order() {
        let pool = JobPool::new(0);
        for _ in 0..4 {
            pool.allocate();
        }
        for index in 0..4 {
            pool.slot(index).release();
        }

        pool.reset();
        assert_eq!(pool.allocate(), 0);
        assert_eq!(pool.allocate(), 1);
    }

    #[test]
    fn test_allocation_skips_in_flight_slots() {
        let pool = JobPool::new(0);
        for _ in 0..3 {
            pool.allocate();
        }
        // Slot 1 is still in flight; 0 and 2 completed.
        pool.slot(0).release();
        pool.slot(2).release();

        pool.reset();
        assert_eq!(pool.allocate(), 0);
        assert_eq!(pool.allocate(), 2);
    }

    #[test]
    fn test_playback_countdown_fires_completion_once() {
        let pool = JobPool::new(1);
        let completion = JobId { pool: 0, slot: 0 };
        pool.begin_playback(3, completion);
        assert!(pool.is_playing_back());

        assert_eq!(pool.finish_one_playback(), None);
        assert_eq!(pool.finish_one_playback(), None);
        assert_eq!(pool.finish_one_playback(), Some(completion));
        assert!(!pool.is_playing_back());
    }

    #[test]
    #[should_panic(expected = "already playing back")]
    fn test_reentrant_playback_panics() {
        let pool = JobPool::new(1);
        let completion = JobId { pool: 0, slot: 0 };
        pool.begin_playback(2, completion);
        pool.begin_playback(2, completion);
    }

    #[test]
    fn test_pool_set_creates_lazily() {
        let pools = PoolSet::new(1);
        assert!(pools.try_get(0).is_some());
        assert!(pools.try_get(3).is_none());

        let pool = pools.get(3);
        assert_eq!(pool.id(), 3);
        assert!(pools.try_get(2).is_some());
    }
}
