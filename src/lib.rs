//! # framejob - Frame-Oriented Job System with Record/Replay
//!
//! An in-process, multi-threaded scheduler for fine-grained, short-lived
//! jobs that form dynamic parent/child trees, plus a record-and-replay
//! facility: a job graph executed once into a frame-scoped pool can be
//! played back on later frames without re-running its structural
//! bookkeeping.
//!
//! ## Architecture
//!
//! - **Jobs**: units of work addressed by `(pool, slot)` indices. A job
//!   completes when its body and all of its descendants have completed; a
//!   registered successor is scheduled exactly once after that.
//! - **Pools**: segmented bump arenas, one per logical recording. Segments
//!   are never moved or freed while the pool lives, and a reset only
//!   rewinds the allocation cursor, so the recorded child/sibling/successor
//!   links survive for playback.
//! - **Workers**: OS threads running a pop/steal/execute loop over
//!   work-stealing deques, refilled from a global injector.
//! - **Playback**: re-enqueues a recording starting from its root; each
//!   replayed job re-enqueues its recorded children, and a completion job
//!   fires once every recorded job has run again.
//!
//! ## Example
//!
//! ```
//! use framejob::JobSystem;
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! let jobs = JobSystem::new(4, 2);
//! let frames = Arc::new(AtomicUsize::new(0));
//!
//! // Record a small job tree into pool 1.
//! {
//!     let jobs2 = jobs.clone();
//!     let frames = Arc::clone(&frames);
//!     jobs.submit_to(1, move || {
//!         frames.fetch_add(1, Ordering::SeqCst);
//!         let frames = Arc::clone(&frames);
//!         jobs2.submit_child(move || {
//!             frames.fetch_add(1, Ordering::SeqCst);
//!         });
//!     });
//! }
//! jobs.wait();
//! assert_eq!(frames.load(Ordering::SeqCst), 2);
//!
//! // Replay it: both bodies run again, then the completion job.
//! jobs.playback(1, || {});
//! jobs.wait();
//! assert_eq!(frames.load(Ordering::SeqCst), 4);
//!
//! jobs.shutdown().expect("shutdown failed");
//! ```

pub mod job;
pub mod job_system;
pub mod metrics;

mod pool;
mod trace;
mod worker;

pub use job::JobId;
pub use job_system::JobSystem;

/// How worker threads are placed on CPU cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinningStrategy {
    /// Let the OS schedule worker threads freely.
    None,
    /// Pin worker `i` to core `i` (wrapping) for cache locality.
    Linear,
}
