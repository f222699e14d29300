//! Track - one independent looper timeline
//!
//! A track owns its loops (one active at a time), the event queue that
//! drives them, the layer arena they record into, and a lock-free atomics
//! mirror for the UI. All mutation happens on the audio thread during the
//! block pass.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::config::TrackConfig;
use crate::event::EventQueue;
use crate::pool::Arena;
use crate::trace::TraceSender;
use crate::types::{Frame, TrackId, LOOPS_PER_TRACK};

use super::{Layer, Loop, MajorMode};

/// Lock-free track state for UI access
///
/// The audio thread writes these after each block; the UI reads them
/// without acquiring any lock. `Ordering::Relaxed` everywhere since only
/// visibility matters, not synchronization with other memory.
pub struct TrackAtomics {
    /// Active loop's major mode as a byte (MajorMode discriminant)
    pub mode: AtomicU8,
    /// Active loop's play cursor in frames
    pub frame: AtomicU64,
    /// Active loop's length in frames
    pub frames: AtomicU64,
    /// Active loop's cycle count
    pub cycles: AtomicU32,
    /// Index of the active loop
    pub loop_index: AtomicU8,
    /// Minor-mode flags
    pub overdub: AtomicBool,
    pub mute: AtomicBool,
    pub pause: AtomicBool,
}

impl TrackAtomics {
    /// Create a fresh mirror
    pub fn new() -> Self {
        Self {
            mode: AtomicU8::new(MajorMode::Reset as u8),
            frame: AtomicU64::new(0),
            frames: AtomicU64::new(0),
            cycles: AtomicU32::new(0),
            loop_index: AtomicU8::new(0),
            overdub: AtomicBool::new(false),
            mute: AtomicBool::new(false),
            pause: AtomicBool::new(false),
        }
    }

    /// Current major mode (lock-free)
    #[inline]
    pub fn mode(&self) -> MajorMode {
        MajorMode::from_u8(self.mode.load(Ordering::Relaxed))
    }

    /// Current play frame (lock-free)
    #[inline]
    pub fn frame(&self) -> u64 {
        self.frame.load(Ordering::Relaxed)
    }

    /// Current loop length (lock-free)
    #[inline]
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Whether the active loop is audibly muted (lock-free)
    #[inline]
    pub fn is_muted(&self) -> bool {
        self.mute.load(Ordering::Relaxed)
    }
}

impl Default for TrackAtomics {
    fn default() -> Self {
        Self::new()
    }
}

/// A single independent looper timeline
pub struct Track {
    /// Track identifier
    id: TrackId,
    /// The loops (only `active` plays/records)
    pub loops: Vec<Loop>,
    /// Index of the active loop
    pub active: usize,
    /// Scheduled events for this track
    pub queue: EventQueue,
    /// Layer arena the loops record into
    pub layers: Arena<Layer>,
    /// This track defines the internal transport other tracks follow
    pub sync_leader: bool,
    /// Per-track behavior settings
    pub config: TrackConfig,
    /// Lock-free mirror for UI reads
    atomics: Arc<TrackAtomics>,
}

impl Track {
    /// Create a track with empty loops and pre-populated arenas
    pub fn new(id: TrackId, config: TrackConfig, event_capacity: usize, layer_capacity: usize) -> Self {
        Self {
            id,
            loops: (0..LOOPS_PER_TRACK).map(Loop::new).collect(),
            active: 0,
            queue: EventQueue::new(id.0, event_capacity),
            layers: Arena::new("layer", layer_capacity),
            sync_leader: id.0 == 0,
            config,
            atomics: Arc::new(TrackAtomics::new()),
        }
    }

    /// Wire the track's arenas into the trace stream
    pub fn set_trace(&mut self, trace: TraceSender) {
        self.queue.set_trace(trace.clone());
        self.layers.set_trace(trace);
    }

    /// Get the track ID
    pub fn id(&self) -> TrackId {
        self.id
    }

    /// The active loop
    pub fn active_loop(&self) -> &Loop {
        &self.loops[self.active]
    }

    /// Mutable access to the active loop
    pub fn active_loop_mut(&mut self) -> &mut Loop {
        &mut self.loops[self.active]
    }

    /// Get a reference to the lock-free atomic state
    ///
    /// The UI clones this Arc once at startup and reads position/mode
    /// without touching the audio thread's data.
    pub fn atomics(&self) -> Arc<TrackAtomics> {
        Arc::clone(&self.atomics)
    }

    /// Write the active loop's state to the atomics mirror
    pub fn sync_atomics(&self) {
        let lp = self.active_loop();
        let atomics = &self.atomics;
        atomics.mode.store(lp.mode as u8, Ordering::Relaxed);
        atomics.frame.store(lp.play_frame, Ordering::Relaxed);
        atomics.frames.store(lp.frames, Ordering::Relaxed);
        atomics.cycles.store(lp.cycles, Ordering::Relaxed);
        atomics.loop_index.store(self.active as u8, Ordering::Relaxed);
        atomics.overdub.store(lp.minor.overdub, Ordering::Relaxed);
        atomics.mute.store(lp.minor.mute, Ordering::Relaxed);
        atomics.pause.store(lp.minor.pause, Ordering::Relaxed);
    }

    /// Reset every loop and cancel everything queued
    pub fn reset(&mut self) {
        self.queue.clear();
        for lp in &mut self.loops {
            let (record, play) = lp.reset();
            if let Some(h) = record {
                self.layers.release(h);
            }
            if let Some(h) = play {
                self.layers.release(h);
            }
        }
        self.active = 0;
        self.sync_atomics();
    }

    /// Advance the active loop's cursors by a block segment
    pub fn advance(&mut self, block_frames: Frame) {
        self.loops[self.active].advance(block_frames);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track() -> Track {
        Track::new(TrackId::new(0), TrackConfig::default(), 16, 8)
    }

    #[test]
    fn test_track_creation() {
        let t = track();
        assert_eq!(t.loops.len(), LOOPS_PER_TRACK);
        assert!(t.active_loop().is_empty());
        assert!(t.sync_leader, "track 0 leads by default");
        assert!(!Track::new(TrackId::new(1), TrackConfig::default(), 16, 8).sync_leader);
    }

    #[test]
    fn test_atomics_mirror() {
        let mut t = track();
        let atomics = t.atomics();

        t.active_loop_mut().frames = 48000;
        t.active_loop_mut().play_frame = 1234;
        t.active_loop_mut().mode = MajorMode::Play;
        t.active_loop_mut().minor.mute = true;
        t.sync_atomics();

        assert_eq!(atomics.mode(), MajorMode::Play);
        assert_eq!(atomics.frame(), 1234);
        assert_eq!(atomics.frames(), 48000);
        assert!(atomics.is_muted());
    }

    #[test]
    fn test_reset_releases_layers() {
        let mut t = track();
        let layer = t.layers.alloc();
        t.active_loop_mut().begin_recording(layer);
        assert_eq!(t.layers.stats().in_use, 1);

        t.reset();
        assert_eq!(t.layers.stats().in_use, 0);
        assert_eq!(t.active_loop().mode, MajorMode::Reset);
    }
}
