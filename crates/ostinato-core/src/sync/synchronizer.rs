//! Synchronizer - ties host sync, drift monitoring, and the event queues
//! together
//!
//! Once per block the engine feeds it the host's transport description; it
//! derives the block's sync pulse (if any), keeps both drift monitors fed,
//! and activates pending events with latency compensation applied. When the
//! host supplies no tempo, synchronized functions degrade to unsynchronized
//! scheduling; the synchronizer just reports `sync_available() == false`.

use crate::config::LooperConfig;
use crate::model::Track;
use crate::trace::{TraceContext, TraceSender};
use crate::types::{Frame, SyncSource, SyncUnit};

use super::drift::{BeatDriftMonitor, RateNudge, TransportDriftMonitor};
use super::host::{HostSyncState, SyncSnapshot};

/// The host's transport description for one audio block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostBlock {
    pub frames: u32,
    pub sample_rate: u32,
    /// `None` when the host supplies no tempo
    pub tempo: Option<f64>,
    pub time_signature: (u32, u32),
    pub transport_playing: bool,
    /// Fractional beats since host start
    pub beat_position: f64,
}

impl Default for HostBlock {
    fn default() -> Self {
        Self {
            frames: 256,
            sample_rate: crate::types::SAMPLE_RATE,
            tempo: None,
            time_signature: (4, 4),
            transport_playing: false,
            beat_position: 0.0,
        }
    }
}

/// What the synchronizer derived for the current block
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BlockSync {
    /// The block's sync pulse, coarsest unit first (a bar implies a beat)
    pub pulse: Option<SyncUnit>,
    /// Transport started this block
    pub started: bool,
    /// Transport stopped this block
    pub stopped: bool,
    /// Read-only transport snapshot for display consumers
    pub snapshot: SyncSnapshot,
}

pub struct Synchronizer {
    source: SyncSource,
    host: HostSyncState,
    beat_drift: BeatDriftMonitor,
    loop_drift: TransportDriftMonitor,
    input_latency: Frame,
    output_latency: Frame,
    /// frames_per_beat the beat monitor was last oriented to
    oriented_beat_unit: f64,
    trace: Option<TraceSender>,
}

impl Synchronizer {
    pub fn new(config: &LooperConfig, sample_rate: u32) -> Self {
        Self {
            source: config.sync_source,
            host: HostSyncState::new(sample_rate),
            beat_drift: BeatDriftMonitor::new(),
            loop_drift: TransportDriftMonitor::new(config.drift_correction_threshold as i64),
            input_latency: config.input_latency_frames as Frame,
            output_latency: config.output_latency_frames as Frame,
            oriented_beat_unit: 0.0,
            trace: None,
        }
    }

    pub fn set_trace(&mut self, trace: TraceSender) {
        self.host.set_trace(trace.clone());
        self.beat_drift.set_trace(trace.clone());
        self.trace = Some(trace);
    }

    /// Whether this synchronizer can deliver a pulse to wait on
    ///
    /// Internal sync reports `false` here: its pulses come from the leader
    /// loop, which the engine owns, so the engine combines this with the
    /// leader's state when deciding availability.
    pub fn sync_available(&self) -> bool {
        match self.source {
            SyncSource::None | SyncSource::Internal => false,
            SyncSource::Host | SyncSource::Midi => self.host.has_tempo(),
        }
    }

    /// Read-only transport snapshot from the last block
    pub fn snapshot(&self) -> SyncSnapshot {
        self.host.transfer()
    }

    /// Derive the block's sync state and feed the drift monitors
    pub fn advance_block(&mut self, block: &HostBlock) -> BlockSync {
        let (numerator, denominator) = block.time_signature;
        self.host.update_tempo(
            block.sample_rate,
            block.tempo.unwrap_or(0.0),
            numerator,
            denominator,
        );

        // Re-orient the beat monitor whenever the expected spacing changes
        let unit = self.host.frames_per_beat();
        if unit > 0.0 && unit != self.oriented_beat_unit {
            self.beat_drift.orient(unit);
            self.oriented_beat_unit = unit;
        }

        let events = self
            .host
            .advance(block.frames, block.transport_playing, block.beat_position);

        // Pulses register before the block advance, at the boundary's
        // intra-block offset, so the monitors see the beat where it
        // nominally fell rather than at the block edge.
        if events.beat {
            self.beat_drift.add_pulse(events.beat_offset);
            self.loop_drift.pulse_at(events.beat_offset as Frame);
        }
        self.beat_drift.advance(block.frames as Frame);
        self.loop_drift.advance(block.frames as Frame);

        let pulse = if events.bar {
            Some(SyncUnit::Bar)
        } else if events.beat {
            Some(SyncUnit::Beat)
        } else {
            None
        };

        BlockSync {
            pulse,
            started: events.started,
            stopped: events.stopped,
            snapshot: self.host.transfer(),
        }
    }

    /// Give concrete frames to a track's pulse-waiting events
    ///
    /// Recording boundaries are shifted by the input latency so the audible
    /// loop edge lines up with the true pulse despite buffering delay.
    pub fn activate_pending(&self, track: &mut Track, pulse: SyncUnit, stream_frame: Frame) -> usize {
        let compensated = stream_frame + self.input_latency;
        let activated = track.queue.activate_pending(pulse, compensated);
        if activated > 0 {
            track
                .queue
                .trace_note("pulse activated pending events", activated as i64, compensated as i64);
        }
        activated
    }

    /// Frames a recording must span to cover `bars` whole bars
    pub fn auto_record_frames(&self, bars: u32) -> Option<Frame> {
        let frames_per_beat = self.host.frames_per_beat();
        let beats_per_bar = self.host.beats_per_bar();
        if frames_per_beat <= 0.0 || beats_per_bar <= 0.0 {
            return None;
        }
        Some((frames_per_beat * beats_per_bar * bars as f64).round() as Frame)
    }

    /// Latency applied to playback-side boundaries (loop jumps, unmutes)
    pub fn output_latency(&self) -> Frame {
        self.output_latency
    }

    /// Re-establish loop drift tracking after the loop's length settles
    pub fn orient_loop(&mut self, loop_frames: Frame) {
        let pulse_frames = self.host.frames_per_beat().round() as Frame;
        if loop_frames > 0 && pulse_frames > 0 {
            self.loop_drift.orient(loop_frames, pulse_frames);
        } else {
            self.loop_drift.orient(0, 0);
        }
    }

    /// Current loop drift in frames
    pub fn loop_drift(&self) -> i64 {
        self.loop_drift.drift()
    }

    /// Check for a correction proposal, tracing any breach
    pub fn check_drift(&mut self) -> Option<RateNudge> {
        let nudge = self.loop_drift.check_drift()?;
        if let Some(trace) = &self.trace {
            trace.warn(
                TraceContext::global(),
                "drift threshold breached, proposing rate nudge",
                self.loop_drift.drift(),
                nudge.direction as i64,
            );
        }
        Some(nudge)
    }
}
