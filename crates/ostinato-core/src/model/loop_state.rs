//! Loop - one recordable/playable audio region
//!
//! Owned by exactly one track, created at track construction and reset (not
//! destroyed) by Reset/GlobalReset. Function handlers mutate it during
//! event execution; the playback cursors advance once per block segment.

use crate::pool::Handle;
use crate::types::{Frame, MuteMode, QuantizeMode};

use super::{MajorMode, MinorModes};

/// One loop's scheduling state
#[derive(Debug, Clone, Default)]
pub struct Loop {
    /// Position of this loop within its track (for traces and switches)
    pub index: usize,
    /// Current major mode
    pub mode: MajorMode,
    /// Orthogonal minor-mode flags
    pub minor: MinorModes,
    /// Record cursor; counts recorded frames while a recording mode is active
    pub record_frame: Frame,
    /// Play cursor within [0, frames)
    pub play_frame: Frame,
    /// Loop length in frames (0 = empty)
    pub frames: Frame,
    /// Number of cycles the loop contains
    pub cycles: u32,
    /// Frame where the current rounding mode (multiply/insert) began
    pub mode_start_frame: Frame,
    /// Frames elapsed since the current rounding mode began
    pub mode_elapsed: Frame,
    /// Play frame captured when the loop was muted (for MuteMode::Pause)
    pub mute_start_frame: Frame,
    /// Layer currently being recorded
    pub record_layer: Option<Handle>,
    /// Layer currently playing
    pub play_layer: Option<Handle>,
}

impl Loop {
    /// Create an empty loop
    pub fn new(index: usize) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }

    /// Whether nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    /// Length of one cycle in frames
    pub fn cycle_frames(&self) -> Frame {
        if self.cycles == 0 {
            self.frames
        } else {
            self.frames / self.cycles as Frame
        }
    }

    /// Length of one subcycle in frames
    pub fn subcycle_frames(&self, subcycles: u32) -> Frame {
        let cycle = self.cycle_frames();
        if subcycles == 0 {
            cycle
        } else {
            cycle / subcycles as Frame
        }
    }

    /// The quantization granule for a mode, in frames (0 = unquantized)
    pub fn granule_frames(&self, quantize: QuantizeMode, subcycles: u32) -> Frame {
        match quantize {
            QuantizeMode::Off => 0,
            QuantizeMode::Subcycle => self.subcycle_frames(subcycles),
            QuantizeMode::Cycle => self.cycle_frames(),
            QuantizeMode::Loop => self.frames,
        }
    }

    /// Return the loop to its just-created state
    ///
    /// Layer handles are handed back so the caller can release them to the
    /// arena; the loop never owns the arena itself.
    pub fn reset(&mut self) -> (Option<Handle>, Option<Handle>) {
        let layers = (self.record_layer.take(), self.play_layer.take());
        self.mode = MajorMode::Reset;
        self.minor.clear();
        self.record_frame = 0;
        self.play_frame = 0;
        self.frames = 0;
        self.cycles = 0;
        self.mode_start_frame = 0;
        self.mode_elapsed = 0;
        self.mute_start_frame = 0;
        layers
    }

    /// Begin the initial recording
    pub fn begin_recording(&mut self, layer: Handle) {
        self.mode = MajorMode::Record;
        self.record_frame = 0;
        self.play_frame = 0;
        self.frames = 0;
        self.cycles = 0;
        self.mode_start_frame = 0;
        self.record_layer = Some(layer);
    }

    /// Close the initial recording at the given length and enter Play
    pub fn finish_recording(&mut self, length: Frame) {
        self.frames = length;
        self.cycles = 1;
        self.play_frame = 0;
        self.record_frame = 0;
        self.mode = MajorMode::Play;
        self.play_layer = self.record_layer.take();
    }

    /// Advance the cursors by one block segment
    ///
    /// While a recording-without-length mode is active the record cursor
    /// counts up unbounded; once the loop has a length both cursors wrap.
    pub fn advance(&mut self, block_frames: Frame) {
        if self.minor.pause || self.mode == MajorMode::Pause {
            return;
        }
        if self.mode.profile().recording && self.frames == 0 {
            self.record_frame += block_frames;
            return;
        }
        if self.mode.profile().rounds {
            self.mode_elapsed += block_frames;
        }
        if self.frames > 0 {
            self.play_frame = (self.play_frame + block_frames) % self.frames;
            if self.mode.profile().recording {
                self.record_frame = (self.record_frame + block_frames) % self.frames;
            }
        }
    }

    /// Rebase the cursors after the loop length changed
    ///
    /// Cursors are reduced modulo the new length so they stay inside the
    /// loop; the event queue is rebased separately by its own `shift`.
    pub fn set_frames(&mut self, frames: Frame) {
        self.frames = frames;
        if frames > 0 {
            self.play_frame %= frames;
            self.record_frame %= frames;
        } else {
            self.play_frame = 0;
            self.record_frame = 0;
        }
    }

    /// Apply the configured unmute policy to the play cursor
    pub fn apply_unmute(&mut self, policy: MuteMode, mute_start_frame: Frame) {
        match policy {
            MuteMode::Continue => {
                // Cursor kept running while muted; nothing to do
            }
            MuteMode::Start => {
                self.play_frame = 0;
            }
            MuteMode::Pause => {
                self.play_frame = if self.frames > 0 {
                    mute_start_frame % self.frames
                } else {
                    0
                };
            }
        }
        self.minor.mute = false;
        self.minor.mute_mode = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loop_with_frames(frames: Frame, cycles: u32) -> Loop {
        let mut lp = Loop::new(0);
        lp.frames = frames;
        lp.cycles = cycles;
        lp.mode = MajorMode::Play;
        lp
    }

    #[test]
    fn test_cycle_math() {
        let lp = loop_with_frames(4000, 4);
        assert_eq!(lp.cycle_frames(), 1000);
        assert_eq!(lp.subcycle_frames(4), 250);
    }

    #[test]
    fn test_granule_frames() {
        let lp = loop_with_frames(4000, 4);
        assert_eq!(lp.granule_frames(QuantizeMode::Off, 4), 0);
        assert_eq!(lp.granule_frames(QuantizeMode::Subcycle, 4), 250);
        assert_eq!(lp.granule_frames(QuantizeMode::Cycle, 4), 1000);
        assert_eq!(lp.granule_frames(QuantizeMode::Loop, 4), 4000);
    }

    #[test]
    fn test_advance_wraps_play_cursor() {
        let mut lp = loop_with_frames(1000, 1);
        lp.play_frame = 900;
        lp.advance(250);
        assert_eq!(lp.play_frame, 150);
    }

    #[test]
    fn test_advance_counts_while_recording() {
        let mut lp = Loop::new(0);
        lp.mode = MajorMode::Record;
        lp.advance(256);
        lp.advance(256);
        assert_eq!(lp.record_frame, 512);
        assert_eq!(lp.frames, 0);
    }

    #[test]
    fn test_advance_frozen_while_paused() {
        let mut lp = loop_with_frames(1000, 1);
        lp.play_frame = 400;
        lp.minor.pause = true;
        lp.advance(256);
        assert_eq!(lp.play_frame, 400);
    }

    #[test]
    fn test_finish_recording_enters_play() {
        let mut lp = Loop::new(0);
        lp.mode = MajorMode::Record;
        lp.record_frame = 48000;
        lp.finish_recording(48000);
        assert_eq!(lp.mode, MajorMode::Play);
        assert_eq!(lp.frames, 48000);
        assert_eq!(lp.cycles, 1);
        assert_eq!(lp.play_frame, 0);
    }

    #[test]
    fn test_unmute_policies() {
        let mut lp = loop_with_frames(1000, 1);

        lp.play_frame = 700;
        lp.minor.mute = true;
        lp.minor.mute_mode = true;
        lp.apply_unmute(MuteMode::Continue, 300);
        assert_eq!(lp.play_frame, 700);
        assert!(!lp.minor.mute && !lp.minor.mute_mode);

        lp.play_frame = 700;
        lp.apply_unmute(MuteMode::Start, 300);
        assert_eq!(lp.play_frame, 0);

        lp.play_frame = 700;
        lp.apply_unmute(MuteMode::Pause, 300);
        assert_eq!(lp.play_frame, 300);
    }

    #[test]
    fn test_set_frames_rebases_cursors() {
        let mut lp = loop_with_frames(4000, 4);
        lp.play_frame = 3500;
        lp.set_frames(1000);
        assert_eq!(lp.play_frame, 500);
    }
}
