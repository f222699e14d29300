//! Looper configuration
//!
//! Everything the control core needs to know that isn't supplied per block
//! by the host: quantization policy, mute behavior, synchronization source,
//! latency compensation amounts and pool sizes. Loaded once at startup on a
//! non-real-time thread and handed to the kernel by value; the real-time
//! path never touches the filesystem.

mod io;

pub use io::{load_config, save_config};

/// Default file name for the engine configuration
pub const CONFIG_FILE_NAME: &str = "config.yaml";

use serde::{Deserialize, Serialize};

use crate::types::{MuteMode, QuantizeMode, SyncSource, SyncUnit};

/// Per-track behavior settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackConfig {
    /// Quantization granularity for scheduled functions
    pub quantize: QuantizeMode,
    /// Quantization applied to loop switches (often coarser than `quantize`)
    pub switch_quantize: QuantizeMode,
    /// What the play cursor does when a mute is lifted
    pub mute_mode: MuteMode,
    /// Number of subcycles per cycle (the "8ths per cycle" parameter)
    pub subcycles: u32,
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            quantize: QuantizeMode::Off,
            switch_quantize: QuantizeMode::Loop,
            mute_mode: MuteMode::Continue,
            subcycles: 4,
        }
    }
}

/// Engine-wide looper configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LooperConfig {
    /// Timing reference for synchronized recording
    pub sync_source: SyncSource,
    /// Pulse granularity synchronized recordings wait for
    pub sync_unit: SyncUnit,
    /// Frames of input buffering between the instrument and the engine
    ///
    /// Recording boundaries triggered by user actions are shifted by this
    /// amount so the recorded material lines up with what was actually heard.
    pub input_latency_frames: u32,
    /// Frames of output buffering between the engine and the speakers
    pub output_latency_frames: u32,
    /// Bars recorded by AutoRecord before it stops itself
    pub auto_record_bars: u32,
    /// Accumulated drift (frames) that triggers a corrective rate nudge
    pub drift_correction_threshold: u32,
    /// Settings shared by all tracks
    pub track: TrackConfig,
    /// Event arena slots pre-populated per track
    pub event_pool_capacity: usize,
    /// Layer arena slots pre-populated per track
    pub layer_pool_capacity: usize,
    /// Kernel request slots pre-populated for the whole engine
    pub kernel_pool_capacity: usize,
}

impl Default for LooperConfig {
    fn default() -> Self {
        Self {
            sync_source: SyncSource::None,
            sync_unit: SyncUnit::Bar,
            input_latency_frames: 0,
            output_latency_frames: 0,
            auto_record_bars: 1,
            drift_correction_threshold: 2048,
            track: TrackConfig::default(),
            event_pool_capacity: 64,
            layer_pool_capacity: 32,
            kernel_pool_capacity: 16,
        }
    }
}
