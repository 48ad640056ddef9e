//! Job identity, slots, and parent/child link state.
//!
//! A job is addressed by a [`JobId`]: the index of the pool that allocated it
//! plus the slot index inside that pool. Slots are never moved for the
//! lifetime of a pool, so a `JobId` stays valid until the slot is reused.
//! The slot carries the completion counter and the child/sibling/successor
//! links recorded during the first execution, which playback walks later.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

/// The user body of a job.
///
/// Bodies are `Fn`, not `FnOnce`: a recorded pool re-executes its bodies on
/// every playback. The slot owns the body from allocation until the slot is
/// re-allocated.
pub type JobFn = Box<dyn Fn() + Send + 'static>;

/// Identifies one job slot as a `(pool, slot)` index pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct JobId {
    pub(crate) pool: u32,
    pub(crate) slot: u32,
}

impl JobId {
    /// Index of the pool that allocated this job.
    pub fn pool(&self) -> u32 {
        self.pool
    }

    /// Slot index inside the pool, in allocation order of the recording cycle.
    pub fn slot(&self) -> u32 {
        self.slot
    }

    fn pack(id: Option<JobId>) -> u64 {
        match id {
            Some(id) => (u64::from(id.pool) << 32) | u64::from(id.slot),
            None => Link::NONE,
        }
    }

    fn unpack(raw: u64) -> Option<JobId> {
        if raw == Link::NONE {
            return None;
        }
        Some(JobId {
            pool: (raw >> 32) as u32,
            slot: raw as u32,
        })
    }
}

/// An optional job reference stored as a packed atomic word.
///
/// `u64::MAX` is the empty link; it can never collide with a packed id
/// because a pool index of `u32::MAX` would require a pool registry of four
/// billion entries.
pub(crate) struct Link(AtomicU64);

impl Link {
    const NONE: u64 = u64::MAX;

    pub(crate) fn empty() -> Self {
        Link(AtomicU64::new(Self::NONE))
    }

    pub(crate) fn get(&self) -> Option<JobId> {
        JobId::unpack(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, id: Option<JobId>) {
        self.0.store(JobId::pack(id), Ordering::Release);
    }

    /// Atomically replaces the link and returns the previous value.
    pub(crate) fn swap(&self, id: JobId) -> Option<JobId> {
        JobId::unpack(self.0.swap(JobId::pack(Some(id)), Ordering::AcqRel))
    }
}

/// One slot of a pool segment: a job's body plus its completion state and
/// the links recorded during its first execution.
pub(crate) struct JobSlot {
    /// True when the allocator may hand this slot out.
    available: AtomicBool,
    /// Outstanding work: the job itself plus its live direct children.
    unfinished: AtomicU32,
    parent: Link,
    on_finished: Link,
    first_child: Link,
    last_child: Link,
    next_sibling: Link,
    /// Never held across a body invocation; see `take_body`/`put_body`.
    body: Mutex<Option<JobFn>>,
}

impl JobSlot {
    pub(crate) fn new() -> Self {
        JobSlot {
            available: AtomicBool::new(true),
            unfinished: AtomicU32::new(0),
            parent: Link::empty(),
            on_finished: Link::empty(),
            first_child: Link::empty(),
            last_child: Link::empty(),
            next_sibling: Link::empty(),
            body: Mutex::new(None),
        }
    }

    /// Tries to take ownership of the slot for a new allocation.
    ///
    /// Fails while a job from a previous recording cycle is still in flight
    /// here; the allocator then moves on to the next index.
    pub(crate) fn try_claim(&self) -> bool {
        self.available.swap(false, Ordering::Acquire)
    }

    /// Returns the slot to the allocator. Last step of the completion
    /// protocol; the links survive for playback.
    pub(crate) fn release(&self) {
        self.available.store(true, Ordering::Release);
    }

    /// Re-initializes a freshly claimed slot. This is the only place where
    /// links and the body from a previous recording are wiped.
    pub(crate) fn reset(&self, parent: Option<JobId>) {
        self.unfinished.store(0, Ordering::SeqCst);
        self.parent.set(parent);
        self.on_finished.set(None);
        self.first_child.set(None);
        self.last_child.set(None);
        self.next_sibling.set(None);
        self.body.lock().unwrap().take();
    }

    pub(crate) fn set_body(&self, body: JobFn) {
        *self.body.lock().unwrap() = Some(body);
    }

    /// Takes the body out for one invocation. The caller puts it back with
    /// [`put_body`](Self::put_body) so playback can run it again.
    pub(crate) fn take_body(&self) -> Option<JobFn> {
        self.body.lock().unwrap().take()
    }

    pub(crate) fn put_body(&self, body: JobFn) {
        *self.body.lock().unwrap() = Some(body);
    }

    /// Arms the completion counter at body entry: the job counts as its own
    /// child, so the counter can only reach zero after the body returned.
    pub(crate) fn arm(&self) {
        self.unfinished.store(1, Ordering::SeqCst);
    }

    /// Accounts for one more outstanding direct child.
    pub(crate) fn add_pending_child(&self) {
        self.unfinished.fetch_add(1, Ordering::SeqCst);
    }

    /// Retires one unit of outstanding work. Returns true exactly once per
    /// arming, when the last unit (job or child) finishes.
    pub(crate) fn complete_one(&self) -> bool {
        self.unfinished.fetch_sub(1, Ordering::SeqCst) == 1
    }

    pub(crate) fn parent(&self) -> Option<JobId> {
        self.parent.get()
    }

    pub(crate) fn on_finished(&self) -> Option<JobId> {
        self.on_finished.get()
    }

    /// Records the successor job. A job registers at most one successor per
    /// recording.
    pub(crate) fn set_on_finished(&self, id: JobId) {
        debug_assert!(
            self.on_finished.get().is_none(),
            "a job may register only one successor"
        );
        self.on_finished.set(Some(id));
    }

    pub(crate) fn first_child(&self) -> Option<JobId> {
        self.first_child.get()
    }

    pub(crate) fn next_sibling(&self) -> Option<JobId> {
        self.next_sibling.get()
    }

    /// Appends `child` to this slot's recorded child list and returns the
    /// previous tail. When the list was empty, `first_child` is published
    /// here; otherwise the caller links the previous tail's sibling pointer.
    ///
    /// The tail swap keeps the chain well-formed even when two workers append
    /// to the same parent (a running child attaching a playback completion
    /// job races the parent's own `submit_child` calls).
    pub(crate) fn append_child(&self, child: JobId) -> Option<JobId> {
        let prev = self.last_child.swap(child);
        if prev.is_none() {
            self.first_child.set(Some(child));
        }
        prev
    }

    pub(crate) fn set_next_sibling(&self, id: JobId) {
        self.next_sibling.set(Some(id));
    }
}
