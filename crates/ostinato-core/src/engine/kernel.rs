//! The block-pass kernel
//!
//! Everything the looper does happens inside [`LoopKernel::process`],
//! called once per audio block from the host's real-time callback. The
//! pass is strictly ordered: drain control commands, drain shell
//! completions, derive the block's sync pulse, activate pending events,
//! then walk each track executing due events at their intra-block offsets
//! with cursor advancement split around them. Nothing in the pass blocks,
//! locks, or touches the general heap (pool-exhaustion fallback aside).

use std::sync::Arc;

use crate::config::{LooperConfig, CONFIG_FILE_NAME};
use crate::function::{self, ExecuteResult, FunctionId, InvokeContext, InvokeOutcome};
use crate::kernel::{kernel_channel, ArgStr, KernelClient, KernelRequestType, KernelShell};
use crate::model::{Track, TrackAtomics};
use crate::sync::{HostBlock, RateNudge, SyncSnapshot, Synchronizer};
use crate::trace::{TraceContext, TraceDrain, TraceRing, TraceSender};
use crate::types::{Frame, SyncSource, SyncUnit, TrackId, NUM_TRACKS};

use super::command::{command_channel, LooperCommand};

/// Everything the non-real-time side holds after construction
pub struct LooperHandles {
    /// Command producer for UI/MIDI/script threads
    pub commands: rtrb::Producer<LooperCommand>,
    /// Per-track lock-free state mirrors for display
    pub atomics: Vec<Arc<TrackAtomics>>,
    /// Trace drain, to be run on a background thread
    pub trace: TraceDrain,
    /// Shell side of the kernel request bus
    pub shell: KernelShell,
}

/// The real-time looper core
pub struct LoopKernel {
    config: LooperConfig,
    tracks: Vec<Track>,
    sync: Synchronizer,
    commands: rtrb::Consumer<LooperCommand>,
    kernel: KernelClient,
    trace: TraceSender,
    /// Monotonic engine frame counter; event frames are absolute in it
    stream_frame: Frame,
    sample_rate: u32,
    /// Correction proposed by the last drift check, for the host side
    last_nudge: Option<RateNudge>,
}

impl LoopKernel {
    /// Build the kernel and the handles the embedding host keeps
    pub fn new(config: LooperConfig, sample_rate: u32) -> (Self, LooperHandles) {
        let (trace_tx, trace_drain) = TraceRing::with_default_capacity();
        let (command_tx, command_rx) = command_channel();
        let (mut kernel_client, kernel_shell) = kernel_channel(config.kernel_pool_capacity.max(1));
        kernel_client.set_trace(trace_tx.clone());

        let mut tracks: Vec<Track> = (0..NUM_TRACKS)
            .map(|i| {
                Track::new(
                    TrackId::new(i),
                    config.track.clone(),
                    config.event_pool_capacity,
                    config.layer_pool_capacity,
                )
            })
            .collect();
        for track in &mut tracks {
            track.set_trace(trace_tx.clone());
        }

        let mut sync = Synchronizer::new(&config, sample_rate);
        sync.set_trace(trace_tx.clone());

        let atomics = tracks.iter().map(|t| t.atomics()).collect();

        (
            Self {
                config,
                tracks,
                sync,
                commands: command_rx,
                kernel: kernel_client,
                trace: trace_tx,
                stream_frame: 0,
                sample_rate,
                last_nudge: None,
            },
            LooperHandles {
                commands: command_tx,
                atomics,
                trace: trace_drain,
                shell: kernel_shell,
            },
        )
    }

    /// Build the kernel from a YAML configuration file
    ///
    /// Missing or unparseable files fall back to defaults, per
    /// [`crate::config::load_config`]. Must run on a non-real-time thread.
    pub fn from_config_file(path: &std::path::Path, sample_rate: u32) -> (Self, LooperHandles) {
        Self::new(crate::config::load_config(path), sample_rate)
    }

    /// Absolute engine frame at the start of the next block
    pub fn stream_frame(&self) -> Frame {
        self.stream_frame
    }

    /// The tracks, for embedders that render audio around this core
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Correction proposed by the most recent drift check, if any
    pub fn take_rate_nudge(&mut self) -> Option<RateNudge> {
        self.last_nudge.take()
    }

    /// Run one audio block
    ///
    /// Returns the transport snapshot for display consumers.
    pub fn process(&mut self, block: &HostBlock) -> SyncSnapshot {
        let block_start = self.stream_frame;
        let block_frames = block.frames as Frame;

        self.drain_commands();
        self.drain_completions();

        let block_sync = self.sync.advance_block(block);
        let pulse = if self.config.sync_source == SyncSource::Internal {
            self.internal_pulse(block_frames)
        } else {
            block_sync.pulse
        };
        if let Some(pulse) = pulse {
            for track in &mut self.tracks {
                self.sync.activate_pending(track, pulse, block_start);
            }
        }

        let sync_available = self.pulse_source_ready();
        let mut leader_changed = false;
        for index in 0..self.tracks.len() {
            let result = Self::run_track_block(
                &mut self.tracks[index],
                &self.config,
                sync_available,
                self.sync.auto_record_frames(self.config.auto_record_bars),
                block_start,
                block_frames,
            );
            if result.length_changed && self.tracks[index].sync_leader {
                leader_changed = true;
            }
        }

        if leader_changed {
            self.orient_to_leader();
        }
        if let Some(nudge) = self.sync.check_drift() {
            self.last_nudge = Some(nudge);
        }

        for track in &self.tracks {
            track.sync_atomics();
        }
        self.stream_frame += block_frames;
        block_sync.snapshot
    }

    /// Execute a track's due events at their exact offsets
    ///
    /// The cursor advances in segments around each event so a transition
    /// lands on the frame it was scheduled for, not at block granularity.
    fn run_track_block(
        track: &mut Track,
        config: &LooperConfig,
        sync_available: bool,
        auto_record_frames: Option<Frame>,
        block_start: Frame,
        block_frames: Frame,
    ) -> ExecuteResult {
        let mut result = ExecuteResult::default();
        let mut consumed: Frame = 0;
        while let Some((handle, offset)) = track.queue.pop_due(block_start, block_frames) {
            let offset = offset as Frame;
            if offset > consumed {
                track.advance(offset - consumed);
                consumed = offset;
            }
            let ctx = InvokeContext {
                stream_frame: block_start + consumed,
                config,
                sync_available,
                auto_record_frames,
            };
            let step = function::execute_event(track, handle, &ctx);
            result.length_changed |= step.length_changed;
            result.was_reset |= step.was_reset;
        }
        if block_frames > consumed {
            track.advance(block_frames - consumed);
        }
        result
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            self.apply_command(command);
        }
    }

    fn apply_command(&mut self, command: LooperCommand) {
        match command {
            LooperCommand::Invoke { track, function, argument } => {
                self.invoke(track, function, argument);
            }
            LooperCommand::SetQuantize { track, quantize } => {
                if let Some(t) = self.track_mut(track) {
                    t.config.quantize = quantize;
                }
            }
            LooperCommand::SetSwitchQuantize { track, quantize } => {
                if let Some(t) = self.track_mut(track) {
                    t.config.switch_quantize = quantize;
                }
            }
            LooperCommand::SetMuteMode { track, mute_mode } => {
                if let Some(t) = self.track_mut(track) {
                    t.config.mute_mode = mute_mode;
                }
            }
            LooperCommand::SetSubcycles { track, subcycles } => {
                if let Some(t) = self.track_mut(track) {
                    t.config.subcycles = subcycles.max(1);
                }
            }
            LooperCommand::SetSyncLeader { track } => {
                if self.track_mut(track).is_some() {
                    for t in &mut self.tracks {
                        t.sync_leader = t.id() == track;
                    }
                    self.orient_to_leader();
                }
            }
            LooperCommand::SetSyncSource { source } => {
                self.config.sync_source = source;
                self.sync = Synchronizer::new(&self.config, self.sample_rate);
                self.sync.set_trace(self.trace.clone());
            }
            LooperCommand::SaveLoop { track } => {
                self.request_save(track);
            }
            LooperCommand::SaveConfig => {
                self.request_save_config();
            }
        }
    }

    /// Whether a pulse source can currently deliver pulses
    ///
    /// Internal sync pulses come from the leader loop, so availability
    /// means a leader with recorded content; the other sources answer for
    /// themselves. Functions invoked when this is false degrade to
    /// quantized or immediate scheduling instead of waiting forever.
    fn pulse_source_ready(&self) -> bool {
        match self.config.sync_source {
            SyncSource::Internal => self
                .tracks
                .iter()
                .find(|t| t.sync_leader)
                .map(|t| !t.active_loop().is_empty())
                .unwrap_or(false),
            _ => self.sync.sync_available(),
        }
    }

    /// Derive this block's internal pulse from the leader loop's cursor
    ///
    /// A pulse fires when the cursor crosses a boundary of the configured
    /// unit inside the block, including the wrap through the loop start.
    /// The leader itself never waits on this train; its loop defines it.
    fn internal_pulse(&self, block_frames: Frame) -> Option<SyncUnit> {
        let leader = self.tracks.iter().find(|t| t.sync_leader)?;
        let lp = leader.active_loop();
        if lp.is_empty() || lp.minor.pause {
            return None;
        }
        let granule = match self.config.sync_unit {
            SyncUnit::Subcycle => lp.subcycle_frames(leader.config.subcycles),
            SyncUnit::Cycle | SyncUnit::Beat => lp.cycle_frames(),
            SyncUnit::Loop | SyncUnit::Bar => lp.frames,
        };
        if granule == 0 {
            return None;
        }
        let pos = lp.play_frame;
        ((pos + block_frames) / granule > pos / granule).then_some(self.config.sync_unit)
    }

    /// Invoke a function against a track, exactly as a due event would
    pub fn invoke(&mut self, track: TrackId, function: FunctionId, argument: usize) -> InvokeOutcome {
        let sync_available = self.pulse_source_ready();
        let auto_record_frames = self.sync.auto_record_frames(self.config.auto_record_bars);
        let stream_frame = self.stream_frame;
        if function == FunctionId::GlobalReset {
            // GlobalReset fans out to every track
            let mut outcome = InvokeOutcome::Rejected;
            for index in 0..self.tracks.len() {
                let ctx = InvokeContext {
                    stream_frame,
                    config: &self.config,
                    sync_available,
                    auto_record_frames,
                };
                outcome = function::invoke(&mut self.tracks[index], function, argument, &ctx);
            }
            return outcome;
        }
        let Some(index) = self.track_index(track) else {
            return InvokeOutcome::Rejected;
        };
        let ctx = InvokeContext {
            stream_frame,
            config: &self.config,
            sync_available,
            auto_record_frames,
        };
        function::invoke(&mut self.tracks[index], function, argument, &ctx)
    }

    fn request_save(&mut self, track: TrackId) {
        let Some(index) = self.track_index(track) else { return };
        let loop_index = self.tracks[index].active;
        if self.tracks[index].active_loop().is_empty() {
            self.tracks[index]
                .queue
                .trace_invalid("save requested for an empty loop", loop_index as i64);
            return;
        }
        let args = [
            ArgStr::from_str("session"),
            loop_label(index, loop_index),
            ArgStr::empty(),
        ];
        self.kernel.submit(
            KernelRequestType::SaveLoop,
            args,
            Some(index),
            self.stream_frame,
        );
    }

    fn request_save_config(&mut self) {
        let args = [ArgStr::from_str(CONFIG_FILE_NAME), ArgStr::empty(), ArgStr::empty()];
        self.kernel
            .submit(KernelRequestType::SaveConfig, args, None, self.stream_frame);
    }

    fn drain_completions(&mut self) {
        let trace = self.trace.clone();
        self.kernel.drain_completions(|event, code| {
            let ctx = if event.request.track == u8::MAX {
                TraceContext::global()
            } else {
                TraceContext::track(event.request.track as usize)
            };
            if code == 0 {
                trace.debug(ctx, "kernel request completed", event.request.request_id as i64, 0);
            } else {
                trace.warn(
                    ctx,
                    "kernel request failed",
                    event.request.request_id as i64,
                    code as i64,
                );
            }
        });
    }

    /// Point the drift monitor at the sync leader's loop
    fn orient_to_leader(&mut self) {
        let frames = self
            .tracks
            .iter()
            .find(|t| t.sync_leader)
            .map(|t| t.active_loop().frames)
            .unwrap_or(0);
        self.sync.orient_loop(frames);
    }

    fn track_index(&self, track: TrackId) -> Option<usize> {
        if track.0 < self.tracks.len() {
            Some(track.0)
        } else {
            self.trace.error(
                TraceContext::global(),
                "command addressed a nonexistent track",
                track.0 as i64,
                0,
            );
            None
        }
    }

    fn track_mut(&mut self, track: TrackId) -> Option<&mut Track> {
        let index = self.track_index(track)?;
        Some(&mut self.tracks[index])
    }
}

/// Short `trackN-loopM` label that fits a kernel argument without heap work
fn loop_label(track: usize, loop_index: usize) -> ArgStr {
    let mut buf = [0u8; 16];
    let text = b"track0-loop0";
    buf[..text.len()].copy_from_slice(text);
    buf[5] = b'0' + (track % 10) as u8;
    buf[11] = b'0' + (loop_index % 10) as u8;
    // The buffer is ASCII by construction
    ArgStr::from_str(std::str::from_utf8(&buf[..text.len()]).unwrap_or("loop"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use crate::model::MajorMode;
    use crate::types::{QuantizeMode, SyncSource, SAMPLE_RATE};

    fn silent_block(frames: u32) -> HostBlock {
        HostBlock {
            frames,
            sample_rate: SAMPLE_RATE,
            tempo: None,
            time_signature: (4, 4),
            transport_playing: false,
            beat_position: 0.0,
        }
    }

    /// Transport stopped but the host still reports its tempo
    fn stopped_block(frames: u32) -> HostBlock {
        HostBlock {
            tempo: Some(120.0),
            ..silent_block(frames)
        }
    }

    fn playing_block(frames: u32, beat_position: f64) -> HostBlock {
        HostBlock {
            frames,
            sample_rate: SAMPLE_RATE,
            tempo: Some(120.0),
            time_signature: (4, 4),
            transport_playing: true,
            beat_position,
        }
    }

    fn kernel(config: LooperConfig) -> (LoopKernel, LooperHandles) {
        LoopKernel::new(config, SAMPLE_RATE)
    }

    #[test]
    fn test_command_driven_record_cycle() {
        let (mut k, mut handles) = kernel(LooperConfig::default());
        let track = TrackId::new(0);

        handles
            .commands
            .push(LooperCommand::Invoke { track, function: FunctionId::Record, argument: 0 })
            .unwrap();
        k.process(&silent_block(256));
        assert_eq!(handles.atomics[0].mode(), MajorMode::Record);

        // ~1 second of blocks, then stop
        for _ in 0..187 {
            k.process(&silent_block(256));
        }
        handles
            .commands
            .push(LooperCommand::Invoke { track, function: FunctionId::Record, argument: 0 })
            .unwrap();
        k.process(&silent_block(256));

        assert_eq!(handles.atomics[0].mode(), MajorMode::Play);
        assert_eq!(handles.atomics[0].frames(), 188 * 256);
    }

    #[test]
    fn test_synchronized_record_waits_for_transport() {
        let mut config = LooperConfig::default();
        config.sync_source = SyncSource::Host;
        let (mut k, _handles) = kernel(config);
        let track = TrackId::new(0);

        // Tempo known, transport stopped: the record goes pending
        k.process(&playing_block(256, 0.0));
        k.process(&stopped_block(256));
        let outcome = k.invoke(track, FunctionId::Record, 0);
        assert!(matches!(outcome, InvokeOutcome::Pending(_)));
        k.process(&stopped_block(256));
        assert_eq!(k.tracks()[0].active_loop().mode, MajorMode::Synchronize);

        // Transport starts: the start pulse activates and executes it
        k.process(&playing_block(256, 0.0));
        assert_eq!(k.tracks()[0].active_loop().mode, MajorMode::Record);
    }

    #[test]
    fn test_event_executes_at_intra_block_offset() {
        let (mut k, _handles) = kernel(LooperConfig::default());
        let track = TrackId::new(0);

        k.invoke(track, FunctionId::Record, 0);
        k.process(&silent_block(256));
        for _ in 0..3 {
            k.process(&silent_block(256));
        }
        // Stop lands mid-block: schedule it 100 frames into the next one
        let stop_frame = k.stream_frame() + 100;
        k.tracks[0].queue.schedule(
            EventType::RecordStop,
            FunctionId::Record,
            Some(stop_frame),
            false,
            None,
        );
        k.process(&silent_block(256));

        assert_eq!(k.tracks()[0].active_loop().frames, 4 * 256 + 100);
    }

    #[test]
    fn test_quantize_command_changes_scheduling() {
        let (mut k, _handles) = kernel(LooperConfig::default());
        let track = TrackId::new(0);

        k.invoke(track, FunctionId::Record, 0);
        k.process(&silent_block(1000));
        k.invoke(track, FunctionId::Record, 0);
        k.process(&silent_block(1000));
        assert_eq!(k.tracks()[0].active_loop().frames, 1000);

        k.apply_command(LooperCommand::SetQuantize {
            track,
            quantize: QuantizeMode::Loop,
        });
        // Mute now quantizes to the loop boundary instead of firing at once
        k.invoke(track, FunctionId::Mute, 0);
        assert_eq!(k.tracks()[0].queue.len(), 1);
        k.process(&silent_block(1000));
        assert_eq!(k.tracks()[0].active_loop().mode, MajorMode::Play, "boundary not reached yet");
        k.process(&silent_block(1000));
        assert_eq!(k.tracks()[0].active_loop().mode, MajorMode::Mute);
        assert_eq!(k.tracks()[0].active_loop().play_frame, 0, "fired exactly at the wrap");
    }

    #[test]
    fn test_save_loop_reaches_shell() {
        let (mut k, mut handles) = kernel(LooperConfig::default());
        let track = TrackId::new(0);

        // Empty loop: refused
        k.apply_command(LooperCommand::SaveLoop { track });
        assert!(handles.shell.pop().is_none());

        k.invoke(track, FunctionId::Record, 0);
        k.process(&silent_block(1000));
        k.invoke(track, FunctionId::Record, 0);
        k.process(&silent_block(1000));

        k.apply_command(LooperCommand::SaveLoop { track });
        let request = handles.shell.pop().unwrap();
        assert_eq!(request.request_type, KernelRequestType::SaveLoop);
        assert_eq!(request.args[1].as_str(), "track0-loop0");
    }

    #[test]
    fn test_save_config_reaches_shell() {
        let (mut k, mut handles) = kernel(LooperConfig::default());
        k.apply_command(LooperCommand::SaveConfig);

        let request = handles.shell.pop().unwrap();
        assert_eq!(request.request_type, KernelRequestType::SaveConfig);
        assert_eq!(request.args[0].as_str(), CONFIG_FILE_NAME);
    }

    #[test]
    fn test_from_config_file_tolerates_missing_file() {
        let path = std::env::temp_dir().join("ostinato-no-such-config.yaml");
        let _ = std::fs::remove_file(&path);

        let (k, _handles) = LoopKernel::from_config_file(&path, SAMPLE_RATE);
        assert_eq!(k.tracks().len(), NUM_TRACKS);
    }

    #[test]
    fn test_global_reset_clears_every_track() {
        let (mut k, _handles) = kernel(LooperConfig::default());
        for i in 0..2 {
            k.invoke(TrackId::new(i), FunctionId::Record, 0);
            k.process(&silent_block(500));
            k.invoke(TrackId::new(i), FunctionId::Record, 0);
            k.process(&silent_block(500));
        }
        assert!(!k.tracks()[0].active_loop().is_empty());

        k.invoke(TrackId::new(0), FunctionId::GlobalReset, 0);
        k.process(&silent_block(256));
        for track in k.tracks() {
            assert!(track.active_loop().is_empty());
        }
    }

    #[test]
    fn test_invalid_track_is_a_traced_noop() {
        let (mut k, _handles) = kernel(LooperConfig::default());
        let outcome = k.invoke(TrackId(99), FunctionId::Record, 0);
        assert_eq!(outcome, InvokeOutcome::Rejected);
    }

    #[test]
    fn test_internal_sync_follows_leader_loop() {
        let mut config = LooperConfig::default();
        config.sync_source = SyncSource::Internal;
        config.sync_unit = crate::types::SyncUnit::Loop;
        let (mut k, _handles) = kernel(config);

        // No leader content yet: record degrades to immediate scheduling
        // instead of waiting on a pulse that can never arrive
        let outcome = k.invoke(TrackId::new(0), FunctionId::Record, 0);
        assert!(matches!(outcome, InvokeOutcome::Scheduled(_)));
        for _ in 0..4 {
            k.process(&silent_block(256));
        }
        let outcome = k.invoke(TrackId::new(0), FunctionId::Record, 0);
        assert!(matches!(outcome, InvokeOutcome::Scheduled(_)));
        k.process(&silent_block(256));
        assert_eq!(k.tracks()[0].active_loop().frames, 1024);

        // With the leader looping, a second track's record waits for the
        // leader's wrap and starts there
        let outcome = k.invoke(TrackId::new(1), FunctionId::Record, 0);
        assert!(matches!(outcome, InvokeOutcome::Pending(_)));
        for _ in 0..2 {
            k.process(&silent_block(256));
            assert_eq!(k.tracks()[1].active_loop().mode, MajorMode::Synchronize);
        }
        k.process(&silent_block(256));
        assert_eq!(k.tracks()[1].active_loop().mode, MajorMode::Record);
    }

    #[test]
    fn test_leader_loop_orients_drift_monitor() {
        let mut config = LooperConfig::default();
        config.sync_source = SyncSource::Host;
        config.drift_correction_threshold = 100;
        let (mut k, _handles) = kernel(config);

        // Record a 2-second leader loop against a running 120 BPM transport
        let mut position = 0.0;
        let beats_per_block = 256.0 / 24000.0;
        k.process(&playing_block(256, position));
        k.invoke(TrackId::new(0), FunctionId::Record, 0);
        for _ in 0..375 {
            position += beats_per_block;
            k.process(&playing_block(256, position));
        }
        k.invoke(TrackId::new(0), FunctionId::Record, 0);

        // A locked transport accumulates no drift and proposes no nudge
        for _ in 0..2000 {
            position += beats_per_block;
            k.process(&playing_block(256, position));
        }
        assert!(k.take_rate_nudge().is_none());
    }
}
