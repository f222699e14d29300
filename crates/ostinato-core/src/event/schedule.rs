//! Quantization boundary selection
//!
//! A quantized function is delayed until the next boundary of its granule
//! at or after the current frame. A function invoked exactly on a boundary
//! escalates to the following one: the musician already heard this boundary
//! pass, so "the next subcycle" always means a frame strictly ahead.

use crate::model::Loop;
use crate::types::{Frame, QuantizeMode};

/// The next granule boundary strictly after `current`
///
/// Returns `current` unchanged when `granule` is zero (unquantized).
pub fn next_boundary(current: Frame, granule: Frame) -> Frame {
    if granule == 0 {
        return current;
    }
    (current / granule + 1) * granule
}

/// Frames from the loop cursor to the next quantization boundary
///
/// Returns `None` when the mode is unquantized or the loop has no length
/// to quantize against (an empty loop degrades to immediate execution).
pub fn quantize_delay(lp: &Loop, quantize: QuantizeMode, subcycles: u32) -> Option<Frame> {
    let granule = lp.granule_frames(quantize, subcycles);
    if granule == 0 || lp.frames == 0 {
        return None;
    }
    let cursor = lp.play_frame;
    Some(next_boundary(cursor, granule) - cursor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MajorMode;

    fn play_loop(frames: Frame, cycles: u32, play_frame: Frame) -> Loop {
        let mut lp = Loop::new(0);
        lp.frames = frames;
        lp.cycles = cycles;
        lp.play_frame = play_frame;
        lp.mode = MajorMode::Play;
        lp
    }

    #[test]
    fn test_boundary_after_mid_granule() {
        assert_eq!(next_boundary(260, 250), 500);
        assert_eq!(next_boundary(1, 250), 250);
        assert_eq!(next_boundary(999, 250), 1000);
    }

    #[test]
    fn test_tie_escalates_to_next_boundary() {
        // Exactly on a boundary: never the current frame itself
        assert_eq!(next_boundary(250, 250), 500);
        assert_eq!(next_boundary(0, 250), 250);
    }

    #[test]
    fn test_subcycle_selection_never_picks_current_frame() {
        // 1000-frame cycle, 250-frame subcycles: a quantized event always
        // lands on 250, 500, 750 or 1000, never the current frame.
        for play_frame in [0, 1, 249, 250, 499, 700, 750, 999] {
            let lp = play_loop(1000, 1, play_frame);
            let delay = quantize_delay(&lp, QuantizeMode::Subcycle, 4).unwrap();
            let target = play_frame + delay;
            assert!(target > play_frame);
            assert_eq!(target % 250, 0);
            assert!(target <= 1000);
        }
    }

    #[test]
    fn test_loop_quantize_targets_loop_end() {
        let lp = play_loop(4000, 4, 1500);
        let delay = quantize_delay(&lp, QuantizeMode::Loop, 4).unwrap();
        assert_eq!(lp.play_frame + delay, 4000);
    }

    #[test]
    fn test_unquantized_and_empty_degrade() {
        let lp = play_loop(1000, 1, 300);
        assert_eq!(quantize_delay(&lp, QuantizeMode::Off, 4), None);

        let empty = Loop::new(0);
        assert_eq!(quantize_delay(&empty, QuantizeMode::Cycle, 4), None);
    }
}
