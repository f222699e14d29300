//! Lock-free command queue for real-time looper control
//!
//! The command pattern for audio engines: UI, MIDI, and scripting threads
//! send commands through a lock-free queue and the audio thread drains them
//! at the top of each block.
//!
//! # Why Lock-Free?
//!
//! Mutex-based sharing causes dropouts: a UI thread holding a lock for a
//! millisecond is enough to make the audio callback miss its deadline.
//! With the `rtrb` ringbuffer both push and pop are wait-free, O(1), and
//! allocation-free after startup - the single-producer single-consumer
//! shape fits the control→audio direction exactly.
//!
//! Commands stay small and `Copy`-ish on purpose (no boxed payloads are
//! needed here; everything a looper function takes fits in a few words) so
//! the ring stays cache-friendly.

use crate::function::FunctionId;
use crate::types::{MuteMode, QuantizeMode, SyncSource, TrackId};

/// Commands sent from control threads to the audio thread
///
/// Each variant is an atomic operation, processed at the start of a block
/// in submission order.
#[derive(Debug, Clone, PartialEq)]
pub enum LooperCommand {
    /// Invoke a looper function on a track
    ///
    /// `argument` carries the function's operand (switch target loop, jump
    /// distance); functions that take none ignore it.
    Invoke {
        track: TrackId,
        function: FunctionId,
        argument: usize,
    },
    /// Change a track's quantization granularity
    SetQuantize { track: TrackId, quantize: QuantizeMode },
    /// Change a track's switch quantization
    SetSwitchQuantize { track: TrackId, quantize: QuantizeMode },
    /// Change a track's unmute policy
    SetMuteMode { track: TrackId, mute_mode: MuteMode },
    /// Change a track's subcycle division
    SetSubcycles { track: TrackId, subcycles: u32 },
    /// Elect a track as the sync leader
    SetSyncLeader { track: TrackId },
    /// Switch the engine's timing reference
    SetSyncSource { source: SyncSource },
    /// Ask the shell thread to persist a track's active loop
    SaveLoop { track: TrackId },
    /// Ask the shell thread to rewrite the engine configuration file
    SaveConfig,
}

/// Capacity of the command queue
///
/// A MIDI controller mash plus a script burst stays well under this;
/// 256 keeps the ring a few KB.
pub const COMMAND_QUEUE_CAPACITY: usize = 256;

/// Create a command channel (producer/consumer pair)
///
/// Producer goes to the control side, consumer to the audio thread. The
/// ring is bounded at [`COMMAND_QUEUE_CAPACITY`]; a full ring returns the
/// command to the caller instead of blocking.
pub fn command_channel() -> (rtrb::Producer<LooperCommand>, rtrb::Consumer<LooperCommand>) {
    rtrb::RingBuffer::new(COMMAND_QUEUE_CAPACITY)
}
