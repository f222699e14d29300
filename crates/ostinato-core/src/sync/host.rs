//! Host transport tracking - beat and bar detection
//!
//! The host hands us a continuously varying transport description once per
//! audio block; this turns it into discrete edges: play started, play
//! stopped, crossed a beat, crossed a bar. Detection itself is quantized to
//! block boundaries on purpose: acting on sub-block positions would
//! reintroduce the float-rounding corner cases (a beat landing exactly on a
//! block edge) that cause double or missed detection. Each beat edge still
//! carries the boundary's nominal offset within the block, recovered from
//! the end-of-block beat position, so drift measurement does not read a
//! phase-locked transport as up to a block of error.

use crate::trace::{TraceContext, TraceSender};

/// Discrete transport edges derived for one block
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HostEvents {
    /// Transport went from stopped to playing this block
    pub started: bool,
    /// Transport went from playing to stopped this block
    pub stopped: bool,
    /// An integer beat boundary was crossed (always set on `started`)
    pub beat: bool,
    /// The crossed beat falls on a bar boundary
    pub bar: bool,
    /// Beat number at the boundary
    pub beat_number: i64,
    /// Bar number at the boundary
    pub bar_number: i64,
    /// Frames into the block where the boundary nominally falls
    ///
    /// Equals the block length when the boundary sits exactly on the
    /// trailing edge; late detection (the crossing slipped to the next
    /// block through float rounding) yields 0, so the recovered absolute
    /// frame stays the same either way.
    pub beat_offset: u32,
}

/// Read-only per-block snapshot for display consumers
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SyncSnapshot {
    pub tempo: f64,
    pub beat_position: f64,
    pub playing: bool,
    pub beat_boundary: bool,
    pub bar_boundary: bool,
    /// Frames into the block where the boundary nominally falls
    pub boundary_offset: u32,
    pub beat_number: i64,
    pub bar_number: i64,
    pub beats_per_bar: f64,
}

/// Running host transport state
///
/// One instance suffices; there is only one external host clock.
pub struct HostSyncState {
    sample_rate: u32,
    tempo: f64,
    numerator: u32,
    denominator: u32,
    beats_per_frame: f64,
    beats_per_bar: f64,
    transport_playing: bool,
    last_beat: i64,
    last_beat_position: f64,
    /// Last derived edges, for `transfer`
    events: HostEvents,
    trace: Option<TraceSender>,
}

impl HostSyncState {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            tempo: 0.0,
            numerator: 0,
            denominator: 0,
            beats_per_frame: 0.0,
            beats_per_bar: 0.0,
            transport_playing: false,
            last_beat: -1,
            last_beat_position: 0.0,
            events: HostEvents::default(),
            trace: None,
        }
    }

    /// Attach a trace sender
    pub fn set_trace(&mut self, trace: TraceSender) {
        self.trace = Some(trace);
    }

    /// Whether the host has supplied a usable tempo
    pub fn has_tempo(&self) -> bool {
        self.tempo > 0.0
    }

    /// Current tempo in BPM (0 = unknown)
    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    /// Beats per bar derived from the time signature
    pub fn beats_per_bar(&self) -> f64 {
        self.beats_per_bar
    }

    /// Frames spanned by one beat at the current tempo (0 = unknown)
    pub fn frames_per_beat(&self) -> f64 {
        if self.beats_per_frame > 0.0 {
            1.0 / self.beats_per_frame
        } else {
            0.0
        }
    }

    /// Recompute tempo-derived values; cheap no-op when inputs are unchanged
    pub fn update_tempo(&mut self, sample_rate: u32, tempo: f64, numerator: u32, denominator: u32) {
        if sample_rate == self.sample_rate
            && tempo == self.tempo
            && numerator == self.numerator
            && denominator == self.denominator
        {
            return;
        }
        self.sample_rate = sample_rate;
        self.tempo = tempo;
        self.numerator = numerator;
        self.denominator = denominator;
        self.beats_per_frame = if tempo > 0.0 {
            tempo / (60.0 * sample_rate as f64)
        } else {
            0.0
        };
        self.beats_per_bar = if denominator > 0 {
            numerator as f64 / (denominator as f64 / 4.0)
        } else {
            0.0
        };
        if self.beats_per_bar > 0.0 && self.beats_per_bar.fract() != 0.0 {
            self.warn(
                "fractional beats per bar, bar boundaries will be approximate",
                self.numerator as i64,
                self.denominator as i64,
            );
        }
    }

    /// Derive this block's transport edges
    ///
    /// Jumps (rewind or skipping forward more than one beat) are traced but
    /// not corrected; the resulting drift is accepted. A return to beat 0
    /// is traced as a probable pattern loop-back, nothing more, since
    /// distinguishing a loop from a one-off rewind needs host knowledge we
    /// don't have.
    pub fn advance(&mut self, frames: u32, transport_playing: bool, beat_position: f64) -> HostEvents {
        let mut events = HostEvents::default();
        let was_playing = self.transport_playing;
        self.transport_playing = transport_playing;

        if transport_playing && !was_playing {
            events.started = true;
        } else if !transport_playing && was_playing {
            events.stopped = true;
        }

        if !transport_playing {
            self.events = events;
            return events;
        }

        let new_beat = beat_position.floor() as i64;

        if beat_position < self.last_beat_position && !events.started {
            if new_beat <= 0 && self.last_beat > 0 {
                self.trace_info("transport pattern loop-back", self.last_beat, new_beat);
            } else {
                self.warn("transport rewind", self.last_beat, new_beat);
            }
        } else if new_beat > self.last_beat + 1 && !events.started {
            self.warn("transport skipped beats", self.last_beat, new_beat);
        }

        if events.started || new_beat != self.last_beat {
            events.beat = true;
            events.beat_number = new_beat;
            let beats_per_bar = self.beats_per_bar.max(0.0) as i64;
            if beats_per_bar > 0 {
                events.bar = new_beat.rem_euclid(beats_per_bar) == 0;
                events.bar_number = new_beat.div_euclid(beats_per_bar);
            }
            // `beat_position` is the end-of-block position, so the beats
            // elapsed past the boundary translate into frames back from the
            // block end.
            if self.beats_per_frame > 0.0 {
                let elapsed_beats = (beat_position - new_beat as f64).max(0.0);
                let elapsed_frames = elapsed_beats / self.beats_per_frame;
                events.beat_offset = (frames as f64 - elapsed_frames)
                    .clamp(0.0, frames as f64)
                    .round() as u32;
            }
        }

        self.last_beat = new_beat;
        self.last_beat_position = beat_position;
        self.events = events;
        events
    }

    /// Copy the derived per-block state into a read-only snapshot
    pub fn transfer(&self) -> SyncSnapshot {
        SyncSnapshot {
            tempo: self.tempo,
            beat_position: self.last_beat_position,
            playing: self.transport_playing,
            beat_boundary: self.events.beat,
            bar_boundary: self.events.bar,
            boundary_offset: self.events.beat_offset,
            beat_number: self.events.beat_number,
            bar_number: self.events.bar_number,
            beats_per_bar: self.beats_per_bar,
        }
    }

    fn warn(&self, message: &'static str, a: i64, b: i64) {
        if let Some(trace) = &self.trace {
            trace.warn(TraceContext::global(), message, a, b);
        }
    }

    fn trace_info(&self, message: &'static str, a: i64, b: i64) {
        if let Some(trace) = &self.trace {
            trace.info(TraceContext::global(), message, a, b);
        }
    }
}
