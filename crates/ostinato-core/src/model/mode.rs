//! Major and minor loop modes
//!
//! A loop is always in exactly one major mode; minor modes are orthogonal
//! flags that persist across major-mode transitions (overdubbing through a
//! multiply, staying muted while switching loops). Mode behavior lives in a
//! static profile table keyed by the enum discriminant, so "is this mode a
//! recording mode" is a table lookup, not scattered special cases.

/// The primary behavioral state of a loop, mutually exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum MajorMode {
    /// Empty loop, nothing recorded
    #[default]
    Reset = 0,
    /// Waiting for a sync pulse before recording starts
    Synchronize = 1,
    /// Waiting for the input to cross the record threshold
    Threshold = 2,
    /// Recording the first layer
    Record = 3,
    /// Playing back
    Play = 4,
    /// Extending the loop a cycle at a time while recording on top
    Multiply = 5,
    /// Inserting new cycles into the loop
    Insert = 6,
    /// Audible silence, playback position per MuteMode policy
    Mute = 7,
    /// Replacing loop content while the cursor advances
    Replace = 8,
    /// Replacing dry signal over existing content
    Substitute = 9,
    /// Alternating record/review passes
    Rehearse = 10,
    /// Transition to another loop is pending
    Switch = 11,
    /// Playback frozen
    Pause = 12,
}

/// Immutable behavioral description of a major mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeProfile {
    /// Input is being written into the record layer
    pub recording: bool,
    /// The mode can grow the loop's length
    pub extends: bool,
    /// Ending the mode rounds to a cycle boundary before taking effect
    pub rounds: bool,
    /// Output is forced silent while in this mode
    pub silent: bool,
}

impl MajorMode {
    /// All major modes in discriminant order
    pub const ALL: [MajorMode; 13] = [
        MajorMode::Reset,
        MajorMode::Synchronize,
        MajorMode::Threshold,
        MajorMode::Record,
        MajorMode::Play,
        MajorMode::Multiply,
        MajorMode::Insert,
        MajorMode::Mute,
        MajorMode::Replace,
        MajorMode::Substitute,
        MajorMode::Rehearse,
        MajorMode::Switch,
        MajorMode::Pause,
    ];

    /// Look up this mode's behavioral profile
    pub const fn profile(&self) -> ModeProfile {
        const fn p(recording: bool, extends: bool, rounds: bool, silent: bool) -> ModeProfile {
            ModeProfile { recording, extends, rounds, silent }
        }
        match self {
            MajorMode::Reset => p(false, false, false, true),
            MajorMode::Synchronize => p(false, false, false, true),
            MajorMode::Threshold => p(false, false, false, true),
            MajorMode::Record => p(true, true, false, false),
            MajorMode::Play => p(false, false, false, false),
            MajorMode::Multiply => p(true, true, true, false),
            MajorMode::Insert => p(true, true, true, false),
            MajorMode::Mute => p(false, false, false, true),
            MajorMode::Replace => p(true, false, false, false),
            MajorMode::Substitute => p(true, false, false, false),
            MajorMode::Rehearse => p(true, false, false, false),
            MajorMode::Switch => p(false, false, false, false),
            MajorMode::Pause => p(false, false, false, true),
        }
    }

    /// Display name
    pub fn name(&self) -> &'static str {
        match self {
            MajorMode::Reset => "Reset",
            MajorMode::Synchronize => "Synchronize",
            MajorMode::Threshold => "Threshold",
            MajorMode::Record => "Record",
            MajorMode::Play => "Play",
            MajorMode::Multiply => "Multiply",
            MajorMode::Insert => "Insert",
            MajorMode::Mute => "Mute",
            MajorMode::Replace => "Replace",
            MajorMode::Substitute => "Substitute",
            MajorMode::Rehearse => "Rehearse",
            MajorMode::Switch => "Switch",
            MajorMode::Pause => "Pause",
        }
    }

    /// Convert from the atomics-mirror byte
    pub fn from_u8(value: u8) -> Self {
        Self::ALL.get(value as usize).copied().unwrap_or(MajorMode::Reset)
    }
}

/// Orthogonal flags that coexist with any major mode
///
/// `mute` is the instantaneous audible state; `mute_mode` is the user's
/// sticky intent. They are decoupled so other modes can temporarily force
/// silence (an insert, a pause) without canceling a mute the user asked for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MinorModes {
    /// Overdubbing onto the play layer; survives major-mode transitions
    pub overdub: bool,
    /// Output is audibly silent right now
    pub mute: bool,
    /// The user asked for mute (sticky across forced-silence episodes)
    pub mute_mode: bool,
    /// Playback frozen in place
    pub pause: bool,
    /// Playing the loop backwards
    pub reverse: bool,
    /// Half-speed playback
    pub half_speed: bool,
}

impl MinorModes {
    /// Clear everything (loop reset)
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
