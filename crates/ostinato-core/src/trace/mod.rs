//! Lock-free trace stream for real-time code
//!
//! The audio callback must never call the logging framework directly:
//! formatting allocates, and the `log` backends may take locks. Instead,
//! real-time code pushes fixed-size [`TraceRecord`]s into a bounded
//! lock-free ring, and a background drain thread formats them and forwards
//! them through `log` where latency does not matter. Queue now, format later.
//!
//! Severity taxonomy follows the engine's error-handling design: invalid
//! input and anomalies are traced and tolerated, never propagated as
//! structured errors out of the real-time path.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::queue::ArrayQueue;

use crate::types::Frame;

/// Capacity of the trace ring
///
/// A misbehaving host can produce a warning per block; at 375 blocks/sec
/// (128 frames @ 48kHz) 4096 records is ~10 seconds of headroom before the
/// drain thread has to be scheduled.
pub const TRACE_RING_CAPACITY: usize = 4096;

/// Trace severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TraceLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl TraceLevel {
    fn to_log(self) -> log::Level {
        match self {
            TraceLevel::Error => log::Level::Error,
            TraceLevel::Warn => log::Level::Warn,
            TraceLevel::Info => log::Level::Info,
            TraceLevel::Debug => log::Level::Debug,
        }
    }
}

/// Where in the engine a record originated
///
/// All fields optional so global, per-track and per-frame records share one
/// fixed-size layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceContext {
    pub track: Option<u8>,
    pub loop_index: Option<u8>,
    pub frame: Option<Frame>,
}

impl TraceContext {
    /// A record with no track association (engine-global)
    pub fn global() -> Self {
        Self::default()
    }

    /// A record for a specific track
    pub fn track(track: usize) -> Self {
        Self {
            track: Some(track as u8),
            ..Self::default()
        }
    }

    /// Attach a loop index
    pub fn with_loop(mut self, loop_index: usize) -> Self {
        self.loop_index = Some(loop_index as u8);
        self
    }

    /// Attach a frame position
    pub fn at_frame(mut self, frame: Frame) -> Self {
        self.frame = Some(frame);
        self
    }
}

/// One trace record: static message plus up to two integer arguments
///
/// `Copy` and allocation-free so pushing from the audio thread is wait-free.
#[derive(Debug, Clone, Copy)]
pub struct TraceRecord {
    pub level: TraceLevel,
    pub context: TraceContext,
    pub message: &'static str,
    pub arg1: i64,
    pub arg2: i64,
}

struct TraceShared {
    ring: ArrayQueue<TraceRecord>,
    /// Records discarded because the ring was full (drain thread starved)
    dropped: AtomicU64,
}

/// Real-time handle for pushing trace records
///
/// Cloneable; every subsystem on the audio thread holds one. Push never
/// blocks: if the ring is full the record is dropped and counted.
#[derive(Clone)]
pub struct TraceSender {
    shared: Arc<TraceShared>,
}

// Manual impl: the ring itself has nothing printable, but components that
// hold a sender want to stay `derive(Debug)`.
impl std::fmt::Debug for TraceSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceSender")
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

impl TraceSender {
    /// Push a record (wait-free)
    #[inline]
    pub fn push(&self, record: TraceRecord) {
        if self.shared.ring.push(record).is_err() {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Trace at error severity
    #[inline]
    pub fn error(&self, context: TraceContext, message: &'static str, arg1: i64, arg2: i64) {
        self.push(TraceRecord { level: TraceLevel::Error, context, message, arg1, arg2 });
    }

    /// Trace at warn severity
    #[inline]
    pub fn warn(&self, context: TraceContext, message: &'static str, arg1: i64, arg2: i64) {
        self.push(TraceRecord { level: TraceLevel::Warn, context, message, arg1, arg2 });
    }

    /// Trace at info severity
    #[inline]
    pub fn info(&self, context: TraceContext, message: &'static str, arg1: i64, arg2: i64) {
        self.push(TraceRecord { level: TraceLevel::Info, context, message, arg1, arg2 });
    }

    /// Trace at debug severity
    #[inline]
    pub fn debug(&self, context: TraceContext, message: &'static str, arg1: i64, arg2: i64) {
        self.push(TraceRecord { level: TraceLevel::Debug, context, message, arg1, arg2 });
    }

    /// Number of records lost to ring overflow so far
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// A sender wired to nothing useful, for unit tests of RT components
    pub fn disconnected() -> Self {
        TraceRing::new(16).0
    }
}

/// Drain side of the trace ring
pub struct TraceDrain {
    shared: Arc<TraceShared>,
    reported_drops: u64,
}

impl TraceDrain {
    /// Pop and format everything currently queued, forwarding into `log`
    ///
    /// Returns the number of records drained. Callable directly from tests
    /// or a host idle callback; `spawn` runs it on a dedicated thread.
    pub fn drain(&mut self) -> usize {
        let mut count = 0;
        while let Some(record) = self.shared.ring.pop() {
            log::log!(
                record.level.to_log(),
                "{}{}: {} ({}, {})",
                format_context(&record.context),
                record
                    .context
                    .frame
                    .map(|f| format!(" f{}", f))
                    .unwrap_or_default(),
                record.message,
                record.arg1,
                record.arg2
            );
            count += 1;
        }

        let dropped = self.shared.dropped.load(Ordering::Relaxed);
        if dropped > self.reported_drops {
            log::warn!("trace ring overflow: {} records lost", dropped - self.reported_drops);
            self.reported_drops = dropped;
        }

        count
    }

    /// Spawn the drain thread
    ///
    /// Runs until `shutdown` is set, then drains one final time so nothing
    /// queued at shutdown is lost.
    pub fn spawn(mut self, shutdown: Arc<AtomicBool>) -> thread::JoinHandle<()> {
        thread::Builder::new()
            .name("ostinato-trace".to_string())
            .spawn(move || {
                log::info!("Trace drain thread started");
                while !shutdown.load(Ordering::Relaxed) {
                    self.drain();
                    // 20ms keeps worst-case ring occupancy low at small block sizes
                    thread::sleep(Duration::from_millis(20));
                }
                self.drain();
                log::info!("Trace drain thread stopped");
            })
            .expect("Failed to spawn trace drain thread")
    }

    /// Pop a single raw record without formatting (test introspection)
    pub fn pop_raw(&mut self) -> Option<TraceRecord> {
        self.shared.ring.pop()
    }
}

fn format_context(context: &TraceContext) -> String {
    match (context.track, context.loop_index) {
        (Some(t), Some(l)) => format!("track {} loop {}", t, l),
        (Some(t), None) => format!("track {}", t),
        _ => "engine".to_string(),
    }
}

/// Trace ring constructor
pub struct TraceRing;

impl TraceRing {
    /// Create a sender/drain pair over a bounded ring
    pub fn new(capacity: usize) -> (TraceSender, TraceDrain) {
        let shared = Arc::new(TraceShared {
            ring: ArrayQueue::new(capacity),
            dropped: AtomicU64::new(0),
        });
        (
            TraceSender { shared: Arc::clone(&shared) },
            TraceDrain { shared, reported_drops: 0 },
        )
    }

    /// Create a ring with the default capacity
    pub fn with_default_capacity() -> (TraceSender, TraceDrain) {
        Self::new(TRACE_RING_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_size_stays_fixed() {
        // The record must stay Copy and small enough that pushing from the
        // audio thread is a plain memcpy into the ring.
        let size = std::mem::size_of::<TraceRecord>();
        assert!(size <= 64, "TraceRecord is {} bytes, expected <= 64", size);
    }

    #[test]
    fn test_sender_debug_format() {
        // Components embedding a sender derive Debug, so the sender has to
        // format without exposing the ring internals.
        let (tx, _rx) = TraceRing::new(2);
        tx.info(TraceContext::global(), "a", 0, 0);
        tx.info(TraceContext::global(), "b", 0, 0);
        tx.info(TraceContext::global(), "c", 0, 0);
        let text = format!("{:?}", tx);
        assert!(text.contains("TraceSender"));
        assert!(text.contains("dropped: 1"));
    }

    #[test]
    fn test_push_and_pop_roundtrip() {
        let (tx, mut rx) = TraceRing::new(8);
        tx.warn(TraceContext::track(2).at_frame(100), "loop length mismatch", 4800, 4810);

        let record = rx.pop_raw().expect("record queued");
        assert_eq!(record.level, TraceLevel::Warn);
        assert_eq!(record.context.track, Some(2));
        assert_eq!(record.context.frame, Some(100));
        assert_eq!(record.arg1, 4800);
    }

    #[test]
    fn test_overflow_counts_drops() {
        let (tx, _rx) = TraceRing::new(2);
        for i in 0..5 {
            tx.info(TraceContext::global(), "filler", i, 0);
        }
        assert_eq!(tx.dropped(), 3);
    }

    #[test]
    fn test_drain_empties_ring() {
        let (tx, mut rx) = TraceRing::new(8);
        for i in 0..4 {
            tx.debug(TraceContext::global(), "tick", i, 0);
        }
        assert_eq!(rx.drain(), 4);
        assert!(rx.pop_raw().is_none());
    }
}
