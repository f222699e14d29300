//! Event records
//!
//! A scheduled action. Events with a concrete frame execute when the block
//! containing that frame is processed; pending events have no frame and
//! wait for a sync pulse to activate them. Once an event's frame is set it
//! stays fixed until executed or explicitly rescheduled.

use crate::function::FunctionId;
use crate::pool::{Handle, PoolReset};
use crate::types::{Frame, SyncUnit};

/// Tag identifying what an event does when it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventType {
    Record,
    RecordStop,
    Overdub,
    Multiply,
    MultiplyEnd,
    Insert,
    InsertEnd,
    Mute,
    Replace,
    Substitute,
    Rehearse,
    Pause,
    Reset,
    /// Transition to another loop within the track
    Switch,
    /// Relocate the play cursor (and possibly mute state) mid-loop
    PlayJump,
    /// Internal revalidation after a structural change
    #[default]
    Validate,
    /// A script is waiting for this frame
    ScriptWait,
}

impl EventType {
    /// Display name for traces
    pub fn name(&self) -> &'static str {
        match self {
            EventType::Record => "Record",
            EventType::RecordStop => "RecordStop",
            EventType::Overdub => "Overdub",
            EventType::Multiply => "Multiply",
            EventType::MultiplyEnd => "MultiplyEnd",
            EventType::Insert => "Insert",
            EventType::InsertEnd => "InsertEnd",
            EventType::Mute => "Mute",
            EventType::Replace => "Replace",
            EventType::Substitute => "Substitute",
            EventType::Rehearse => "Rehearse",
            EventType::Pause => "Pause",
            EventType::Reset => "Reset",
            EventType::Switch => "Switch",
            EventType::PlayJump => "PlayJump",
            EventType::Validate => "Validate",
            EventType::ScriptWait => "ScriptWait",
        }
    }
}

/// A scheduled action in a track's queue
#[derive(Debug, Clone, Default)]
pub struct Event {
    pub event_type: EventType,
    /// The function that scheduled this event
    pub function: FunctionId,
    /// Absolute stream frame to execute at; `None` = pending on a pulse
    pub frame: Option<Frame>,
    /// Scheduled via quantization (as opposed to immediate or latency-shifted)
    pub quantized: bool,
    /// Pulse that will activate a pending event
    pub sync_unit: Option<SyncUnit>,
    /// Loop index argument (switch target, etc.)
    pub argument: usize,
    /// Next event in the queue's frame order
    pub next: Option<Handle>,
    /// Parent event this one is stacked under (pending switch stacking)
    pub parent: Option<Handle>,
    /// First stacked child
    pub first_child: Option<Handle>,
    /// Next sibling in the parent's child list
    pub sibling: Option<Handle>,
}

impl PoolReset for Event {
    fn pool_reset(&mut self) {
        *self = Self::default();
    }
}

impl Event {
    /// Whether this event is waiting on a sync pulse
    pub fn is_pending(&self) -> bool {
        self.frame.is_none()
    }
}

/// Transient description of what the output stream does at a transition
///
/// Computed immediately before a jump-type event fires and consumed during
/// its execution; never persisted past it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct JumpContext {
    /// Output muted across the jump
    pub mute: bool,
    /// Frame the play cursor lands on
    pub frame: Frame,
    /// Playback rate step applied at the transition (half-speed etc.)
    pub rate_shift: i32,
}
