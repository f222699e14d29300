//! Drift measurement between loop timelines and external pulse trains
//!
//! Two formulations, used at different layers:
//!
//! - [`BeatDriftMonitor`] measures pulse spacing against an expected unit
//!   length in stream time. It answers "are the host's beats arriving when
//!   the tempo says they should".
//! - [`TransportDriftMonitor`] runs two wrapping cursors over the loop, one
//!   advanced by audio frames and one by pulse arrivals, and compares them
//!   once per pulse lap. It answers "is this loop still phase-locked to
//!   the pulse train" and proposes a corrective rate nudge when it isn't.

use crate::trace::{TraceContext, TraceSender};
use crate::types::{Frame, MAX_BLOCK_FRAMES};

/// Fixed rate-nudge magnitude applied per threshold breach
///
/// Deliberately small and non-proportional: over a loop's lap the error it
/// removes is bounded, and the re-arm hysteresis in `check_drift` keeps
/// repeated breaches from alternating sign.
pub const DRIFT_NUDGE_MAGNITUDE: f64 = 0.0001;

/// Stream-time drift against an expected pulse unit
#[derive(Debug, Default)]
pub struct BeatDriftMonitor {
    /// Expected frames between pulses
    unit: f64,
    /// Frames elapsed since orientation
    stream_time: f64,
    /// Stream time at the previous pulse
    last_pulse_time: f64,
    /// Accumulated error in frames; positive = pulses arriving late
    drift: f64,
    pulses: u64,
    trace: Option<TraceSender>,
}

impl BeatDriftMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_trace(&mut self, trace: TraceSender) {
        self.trace = Some(trace);
    }

    /// Re-establish the sync relationship: zero everything, store the unit
    pub fn orient(&mut self, unit: f64) {
        self.unit = unit;
        self.stream_time = 0.0;
        self.last_pulse_time = 0.0;
        self.drift = 0.0;
        self.pulses = 0;
    }

    /// Advance stream time by one block
    pub fn advance(&mut self, frames: Frame) {
        self.stream_time += frames as f64;
    }

    /// Register a pulse observed `block_offset` frames into the block
    pub fn add_pulse(&mut self, block_offset: u32) {
        let now = self.stream_time + block_offset as f64;
        if self.pulses > 0 {
            let spacing = now - self.last_pulse_time;
            let delta = spacing - self.unit;
            self.drift += delta;
            if delta.abs() > MAX_BLOCK_FRAMES as f64 {
                if let Some(trace) = &self.trace {
                    trace.warn(
                        TraceContext::global(),
                        "pulse spacing far from expected unit",
                        delta as i64,
                        self.unit as i64,
                    );
                }
            }
        }
        self.last_pulse_time = now;
        self.pulses += 1;
    }

    /// Accumulated drift in frames
    pub fn drift(&self) -> f64 {
        self.drift
    }
}

/// A small corrective rate adjustment for the pulse-generating side
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateNudge {
    /// +1 when the audio cursor runs ahead of pulses, -1 behind
    pub direction: i32,
    pub magnitude: f64,
}

/// Wrapping-cursor drift over a loop, with correction proposals
#[derive(Debug, Default)]
pub struct TransportDriftMonitor {
    loop_frames: Frame,
    pulse_frames: Frame,
    audio_frame: Frame,
    pulse_frame: Frame,
    /// Signed frames the audio cursor leads the pulse cursor by, sampled
    /// once per pulse lap
    drift: i64,
    /// Correction threshold in frames
    threshold: i64,
    /// Cleared when a nudge fires; set again once drift falls below half
    /// the threshold, so corrections can't alternate sign every lap
    armed: bool,
}

impl TransportDriftMonitor {
    pub fn new(threshold: i64) -> Self {
        Self {
            threshold: threshold.max(1),
            armed: true,
            ..Self::default()
        }
    }

    /// Re-establish tracking for a loop of `loop_frames` paced by pulses
    /// of `pulse_frames`
    pub fn orient(&mut self, loop_frames: Frame, pulse_frames: Frame) {
        self.loop_frames = loop_frames;
        self.pulse_frames = pulse_frames;
        self.audio_frame = 0;
        self.pulse_frame = 0;
        self.drift = 0;
        self.armed = true;
    }

    /// Whether `orient` has been called with a usable loop
    pub fn oriented(&self) -> bool {
        self.loop_frames > 0 && self.pulse_frames > 0
    }

    /// Advance the audio cursor by one block
    pub fn advance(&mut self, frames: Frame) {
        if self.loop_frames > 0 {
            self.audio_frame = (self.audio_frame + frames) % self.loop_frames;
        }
    }

    /// Register one external pulse; drift is resampled when the pulse
    /// cursor completes a lap of the loop
    pub fn pulse(&mut self) {
        self.pulse_at(0);
    }

    /// Register a pulse that nominally falls `block_offset` frames past the
    /// current audio cursor
    ///
    /// Hosts detect beat crossings per block; the pulse itself lands
    /// somewhere inside that block. Comparing against the cursor plus the
    /// offset keeps a phase-locked transport from reading as one block of
    /// drift. Call before `advance` for the block the pulse was detected in.
    pub fn pulse_at(&mut self, block_offset: Frame) {
        if !self.oriented() {
            return;
        }
        let next = self.pulse_frame + self.pulse_frames;
        if next >= self.loop_frames {
            self.pulse_frame = next % self.loop_frames;
            let audio_at_pulse = (self.audio_frame + block_offset) % self.loop_frames;
            self.drift = wrapped_lead(audio_at_pulse, self.pulse_frame, self.loop_frames);
            if self.armed_again() {
                self.armed = true;
            }
        } else {
            self.pulse_frame = next;
        }
    }

    /// Signed drift in frames at the last lap sample
    pub fn drift(&self) -> i64 {
        self.drift
    }

    /// Propose a correction when the threshold is breached
    ///
    /// Fires at most once per breach: after a nudge the monitor disarms
    /// until drift has fallen back below half the threshold.
    pub fn check_drift(&mut self) -> Option<RateNudge> {
        if !self.armed || self.drift.abs() <= self.threshold {
            return None;
        }
        self.armed = false;
        Some(RateNudge {
            direction: if self.drift > 0 { 1 } else { -1 },
            magnitude: DRIFT_NUDGE_MAGNITUDE,
        })
    }

    fn armed_again(&self) -> bool {
        !self.armed && self.drift.abs() < self.threshold / 2
    }
}

/// Shortest signed lead of `a` over `b` on a ring of `modulus` frames
fn wrapped_lead(a: Frame, b: Frame, modulus: Frame) -> i64 {
    let raw = (a as i64 - b as i64).rem_euclid(modulus as i64);
    if raw > modulus as i64 / 2 {
        raw - modulus as i64
    } else {
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_drift_neutrality_over_100_pulses() {
        let mut monitor = BeatDriftMonitor::new();
        monitor.orient(24000.0);
        monitor.add_pulse(0);
        for _ in 0..100 {
            for _ in 0..(24000 / 250) {
                monitor.advance(250);
            }
            monitor.add_pulse(0);
            assert_abs_diff_eq!(monitor.drift(), 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_drift_accumulates_n_times_k() {
        // Each pulse arrives 7 frames later than the unit predicts
        let mut monitor = BeatDriftMonitor::new();
        monitor.orient(1000.0);
        monitor.add_pulse(0);
        for n in 1..=50u64 {
            monitor.advance(1007);
            monitor.add_pulse(0);
            assert_abs_diff_eq!(monitor.drift(), (n * 7) as f64, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_first_pulse_establishes_reference_only() {
        let mut monitor = BeatDriftMonitor::new();
        monitor.orient(1000.0);
        monitor.advance(400);
        monitor.add_pulse(13);
        assert_eq!(monitor.drift(), 0.0, "no spacing to measure yet");
    }

    #[test]
    fn test_transport_monitor_locked_is_neutral() {
        let mut monitor = TransportDriftMonitor::new(2048);
        monitor.orient(4000, 1000);
        for _ in 0..40 {
            monitor.advance(1000);
            monitor.pulse();
            assert_eq!(monitor.drift(), 0);
            assert_eq!(monitor.check_drift(), None);
        }
    }

    #[test]
    fn test_pulse_offset_neutralizes_midblock_beat() {
        // Beats land mid-block: the cursor sits at the block start when the
        // pulse is registered, so the lap sample must add the offset back in.
        let mut monitor = TransportDriftMonitor::new(100);
        monitor.orient(96_000, 24_000);
        let mut pos: Frame = 0;
        for beat in 1..=12u64 {
            let beat_frame = beat * 24_000;
            // Advance whole 256-frame blocks up to the one holding the beat
            while pos + 256 < beat_frame {
                monitor.advance(256);
                pos += 256;
            }
            monitor.pulse_at(beat_frame - pos);
            monitor.advance(256);
            pos += 256;
            assert_eq!(monitor.drift(), 0, "beat {beat}");
        }
        assert_eq!(monitor.check_drift(), None);
    }

    #[test]
    fn test_transport_monitor_detects_audio_lead() {
        let mut monitor = TransportDriftMonitor::new(100);
        monitor.orient(4000, 1000);
        // Audio runs 50 frames per pulse fast
        for _ in 0..4 {
            monitor.advance(1050);
            monitor.pulse();
        }
        assert_eq!(monitor.drift(), 200);
        let nudge = monitor.check_drift().unwrap();
        assert_eq!(nudge.direction, 1);
        assert_eq!(nudge.magnitude, DRIFT_NUDGE_MAGNITUDE);
    }

    #[test]
    fn test_nudge_fires_once_per_breach() {
        let mut monitor = TransportDriftMonitor::new(100);
        monitor.orient(4000, 1000);
        for _ in 0..4 {
            monitor.advance(1050);
            monitor.pulse();
        }
        assert!(monitor.check_drift().is_some());
        assert!(monitor.check_drift().is_none(), "disarmed until drift subsides");
    }

    #[test]
    fn test_no_sign_oscillation_under_step_change() {
        // Pulse spacing steps from locked to 30 frames longer per pulse.
        // The correction must not alternate direction breach after breach.
        let mut monitor = TransportDriftMonitor::new(100);
        monitor.orient(4000, 1000);
        let mut directions = Vec::new();
        for lap in 0..200 {
            let per_pulse: Frame = if lap < 10 { 1000 } else { 1030 };
            for _ in 0..4 {
                // Pulses arrive late, so audio leads by 30 per pulse
                monitor.advance(per_pulse);
                monitor.pulse();
            }
            if let Some(nudge) = monitor.check_drift() {
                directions.push(nudge.direction);
            }
        }
        assert!(!directions.is_empty());
        assert!(
            directions.windows(2).all(|w| w[0] == w[1]),
            "corrections alternated sign: {directions:?}"
        );
    }

    #[test]
    fn test_rearm_after_drift_subsides() {
        let mut monitor = TransportDriftMonitor::new(100);
        monitor.orient(4000, 1000);

        // Breach once
        for _ in 0..4 {
            monitor.advance(1050);
            monitor.pulse();
        }
        assert!(monitor.check_drift().is_some());

        // Drift decays back under half the threshold (correction took hold)
        for _ in 0..4 {
            monitor.advance(960);
            monitor.pulse();
        }
        assert_eq!(monitor.drift(), 40);

        // A fresh breach fires again
        for _ in 0..4 {
            monitor.advance(1050);
            monitor.pulse();
        }
        assert!(monitor.check_drift().is_some());
    }
}
