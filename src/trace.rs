//! Execution-span capture for chrome://tracing.
//!
//! The scheduler owns one span lane per worker; a worker only ever pushes to
//! its own lane, so the per-lane mutexes are uncontended on the hot path.
//! Recording is off until enabled. The export is the `traceEvents` JSON
//! layout understood by chrome://tracing and ui.perfetto.dev, with one "X"
//! (complete) event per executed job.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;

/// One executed job, as an offset from the log's creation time.
struct Span {
    start_us: u64,
    duration_us: u64,
}

/// Per-worker span lanes plus the capture switch.
pub(crate) struct TraceLog {
    enabled: AtomicBool,
    epoch: Instant,
    lanes: Vec<Mutex<Vec<Span>>>,
}

impl TraceLog {
    pub(crate) fn new(workers: usize) -> Self {
        TraceLog {
            enabled: AtomicBool::new(false),
            epoch: Instant::now(),
            lanes: (0..workers).map(|_| Mutex::new(Vec::new())).collect(),
        }
    }

    pub(crate) fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub(crate) fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Appends a span to `worker`'s lane.
    pub(crate) fn record(&self, worker: usize, start: Instant, end: Instant) {
        let span = Span {
            start_us: start.saturating_duration_since(self.epoch).as_micros() as u64,
            duration_us: end.saturating_duration_since(start).as_micros() as u64,
        };
        self.lanes[worker].lock().unwrap().push(span);
    }

    /// Writes every recorded span to `path` as a chrome trace file. Lanes
    /// are drained lane by lane, so exporting while workers are busy only
    /// misses spans recorded after their lane was visited.
    pub(crate) fn export(&self, path: &str) -> io::Result<()> {
        let mut out = BufWriter::new(File::create(path)?);

        writeln!(out, "{{")?;
        writeln!(out, "\"traceEvents\": [")?;
        let mut first = true;
        for (tid, lane) in self.lanes.iter().enumerate() {
            for span in lane.lock().unwrap().iter() {
                if !first {
                    writeln!(out, ",")?;
                }
                first = false;
                write!(
                    out,
                    "{{\"cat\": \"job\", \"pid\": 0, \"tid\": {}, \"ts\": {}, \"dur\": {}, \"ph\": \"X\", \"name\": \"job\"}}",
                    tid, span.start_us, span.duration_us
                )?;
            }
        }
        writeln!(out)?;
        writeln!(out, "],")?;
        writeln!(out, "\"displayTimeUnit\": \"ms\"")?;
        writeln!(out, "}}")?;
        out.flush()
    }
}
