//! Common types for Ostinato
//!
//! Fundamental types shared across the control core: frame arithmetic,
//! track identifiers, and the small enums that describe synchronization and
//! quantization policy.

/// Default sample rate (48kHz); the actual rate is supplied by the host
/// with every block and may differ.
pub const SAMPLE_RATE: u32 = 48000;

/// Number of tracks in the looper
pub const NUM_TRACKS: usize = 8;

/// Number of loops per track (only one is active at a time)
pub const LOOPS_PER_TRACK: usize = 4;

/// Maximum block size the core is prepared for
/// Covers all common host configurations (64, 128, 256, 512, 1024, 2048, 4096)
pub const MAX_BLOCK_FRAMES: usize = 8192;

/// An absolute or loop-relative audio frame count
pub type Frame = u64;

/// Track identifier (0-7)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackId(pub usize);

impl TrackId {
    /// Create a new track ID (panics if >= NUM_TRACKS)
    pub fn new(id: usize) -> Self {
        assert!(id < NUM_TRACKS, "Track ID must be less than {}", NUM_TRACKS);
        Self(id)
    }

    /// Get the track number (1-8 for display)
    pub fn display_number(&self) -> usize {
        self.0 + 1
    }
}

/// Where a track's timing reference comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum SyncSource {
    /// No external reference; functions run immediately or quantized
    #[default]
    None,
    /// Host transport (tempo + beat position supplied per block)
    Host,
    /// MIDI clock pulses
    Midi,
    /// Internal transport driven by the sync leader track
    Internal,
}

/// The musical granularity a pulse or boundary is measured at
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SyncUnit {
    Subcycle,
    Cycle,
    Loop,
    Beat,
    Bar,
}

impl SyncUnit {
    /// Get all sync units in order
    pub const ALL: [SyncUnit; 5] = [
        SyncUnit::Subcycle,
        SyncUnit::Cycle,
        SyncUnit::Loop,
        SyncUnit::Beat,
        SyncUnit::Bar,
    ];

    /// Get the name of this unit
    pub fn name(&self) -> &'static str {
        match self {
            SyncUnit::Subcycle => "Subcycle",
            SyncUnit::Cycle => "Cycle",
            SyncUnit::Loop => "Loop",
            SyncUnit::Beat => "Beat",
            SyncUnit::Bar => "Bar",
        }
    }
}

/// Quantization policy for scheduled functions
///
/// `Off` executes immediately; the other modes delay execution until the
/// next boundary of the given granularity. A function invoked exactly on a
/// boundary escalates to the following one (see `event::schedule`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum QuantizeMode {
    #[default]
    Off,
    Subcycle,
    Cycle,
    Loop,
}

impl QuantizeMode {
    /// The equivalent sync unit, if this mode quantizes at all
    pub fn sync_unit(&self) -> Option<SyncUnit> {
        match self {
            QuantizeMode::Off => None,
            QuantizeMode::Subcycle => Some(SyncUnit::Subcycle),
            QuantizeMode::Cycle => Some(SyncUnit::Cycle),
            QuantizeMode::Loop => Some(SyncUnit::Loop),
        }
    }
}

/// What the play cursor does when a mute is lifted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum MuteMode {
    /// The cursor kept running while muted; unmute picks up wherever it is
    #[default]
    Continue,
    /// Unmute restarts playback from frame zero
    Start,
    /// The cursor froze at the mute point; unmute resumes from there
    Pause,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_id() {
        let id = TrackId::new(3);
        assert_eq!(id.display_number(), 4);
    }

    #[test]
    #[should_panic]
    fn test_track_id_out_of_range() {
        TrackId::new(NUM_TRACKS);
    }

    #[test]
    fn test_quantize_mode_sync_unit() {
        assert_eq!(QuantizeMode::Off.sync_unit(), None);
        assert_eq!(QuantizeMode::Cycle.sync_unit(), Some(SyncUnit::Cycle));
    }

    #[test]
    fn test_sync_unit_names() {
        for unit in SyncUnit::ALL {
            assert!(!unit.name().is_empty());
        }
    }
}
