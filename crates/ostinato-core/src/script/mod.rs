//! Scripting waits
//!
//! The scripting collaborator runs synchronously inside the block pass and
//! parks itself on a frame by handing us a wait specification. Resolution
//! either yields a concrete `ScriptWait` event in the track's queue (the
//! script resumes when it fires) or a [`WaitError`] the script layer can
//! report. This is the one place in the core where a structured error is
//! returned: scripts run off the hot path, so a failed wait can be surfaced
//! to the script author instead of being traced and dropped.

use thiserror::Error;

use crate::event::EventType;
use crate::function::FunctionId;
use crate::model::Track;
use crate::pool::Handle;
use crate::types::Frame;

/// Unit a wait count or position is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUnit {
    Frame,
    Msec,
    Subcycle,
    Cycle,
    Loop,
}

impl WaitUnit {
    pub fn name(&self) -> &'static str {
        match self {
            WaitUnit::Frame => "frame",
            WaitUnit::Msec => "msec",
            WaitUnit::Subcycle => "subcycle",
            WaitUnit::Cycle => "cycle",
            WaitUnit::Loop => "loop",
        }
    }

    /// Whether the unit's length depends on recorded loop content
    fn needs_loop(&self) -> bool {
        matches!(self, WaitUnit::Subcycle | WaitUnit::Cycle | WaitUnit::Loop)
    }
}

/// A script's wait request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitSpec {
    /// Wait a span of time from now
    Duration { unit: WaitUnit, count: u64 },
    /// Wait until the play cursor reaches a position within the loop,
    /// expressed in whole units from the loop start
    Location { unit: WaitUnit, position: u64 },
    /// Wait until the next queued event of this type has executed
    Event { event_type: EventType },
}

/// Why a wait specification could not be resolved
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WaitError {
    #[error("{0} wait is meaningless on an empty loop")]
    EmptyLoop(&'static str),
    #[error("location {position} is outside the loop ({limit} {unit}s)")]
    OutOfRange {
        unit: &'static str,
        position: u64,
        limit: u64,
    },
    #[error("no {0} event is queued to wait on")]
    NoSuchEvent(&'static str),
    #[error("wait resolves to zero frames")]
    ZeroLength,
}

/// Resolve a wait against a track, scheduling the `ScriptWait` event
///
/// `stream_frame` is the absolute frame the wait is issued at (the current
/// position within the block, not its start).
pub fn resolve(
    track: &mut Track,
    spec: WaitSpec,
    stream_frame: Frame,
    sample_rate: u32,
    subcycles: u32,
) -> Result<Handle, WaitError> {
    match spec {
        WaitSpec::Duration { unit, count } => {
            let unit_frames = unit_frames(track, unit, sample_rate, subcycles)?;
            let span = unit_frames * count;
            if span == 0 {
                return Err(WaitError::ZeroLength);
            }
            Ok(schedule_wait(track, stream_frame + span))
        }
        WaitSpec::Location { unit, position } => {
            let lp = track.active_loop();
            if lp.is_empty() {
                return Err(WaitError::EmptyLoop(unit.name()));
            }
            let unit_frames = unit_frames(track, unit, sample_rate, subcycles)?;
            let target = position * unit_frames;
            if target >= track.active_loop().frames {
                let limit = track.active_loop().frames / unit_frames.max(1);
                return Err(WaitError::OutOfRange {
                    unit: unit.name(),
                    position,
                    limit,
                });
            }
            // Distance forward from the cursor, wrapping through loop start
            let lp = track.active_loop();
            let delay = if target > lp.play_frame {
                target - lp.play_frame
            } else {
                lp.frames - lp.play_frame + target
            };
            Ok(schedule_wait(track, stream_frame + delay))
        }
        WaitSpec::Event { event_type } => {
            let parent = track
                .queue
                .find(event_type)
                .ok_or(WaitError::NoSuchEvent(event_type.name()))?;
            let wait = schedule_wait(track, stream_frame);
            track.queue.stack_child(parent, wait);
            Ok(wait)
        }
    }
}

/// Frames per unit, or an error when the unit needs loop content that
/// isn't there
fn unit_frames(
    track: &Track,
    unit: WaitUnit,
    sample_rate: u32,
    subcycles: u32,
) -> Result<Frame, WaitError> {
    let lp = track.active_loop();
    if unit.needs_loop() && lp.is_empty() {
        return Err(WaitError::EmptyLoop(unit.name()));
    }
    Ok(match unit {
        WaitUnit::Frame => 1,
        WaitUnit::Msec => (sample_rate as Frame) / 1000,
        WaitUnit::Subcycle => lp.subcycle_frames(subcycles),
        WaitUnit::Cycle => lp.cycle_frames(),
        WaitUnit::Loop => lp.frames,
    })
}

fn schedule_wait(track: &mut Track, frame: Frame) -> Handle {
    track
        .queue
        .schedule(EventType::ScriptWait, FunctionId::default(), Some(frame), false, None)
}
