//! Mute and pause handlers
//!
//! Mute silences the output while (depending on policy) the cursor keeps
//! running; pause freezes the timeline entirely. Both are toggles.

use crate::model::{MajorMode, Track};
use crate::types::MuteMode;

use super::ExecuteResult;

/// Toggle mute on the active loop
///
/// Two flags move together here: `mute` is the instantaneous audible state
/// (other paths flip it transiently) and `mute_mode` is the sticky user
/// intent the toggle is keyed on. On mute the play frame is captured so
/// `MuteMode::Pause` can resume from it; the cursor itself keeps advancing
/// so `Continue` stays aligned with the other tracks.
pub fn mute_toggle(track: &mut Track, policy: MuteMode) -> ExecuteResult {
    let lp = track.active_loop_mut();
    if lp.mode == MajorMode::Record {
        // Mute as an alternate ending of Record
        let result = super::record::record_stop(track);
        if result.was_reset {
            return result;
        }
        let lp = track.active_loop_mut();
        lp.minor.mute = true;
        lp.minor.mute_mode = true;
        lp.mute_start_frame = 0;
        lp.mode = MajorMode::Mute;
        return result;
    }
    if lp.minor.mute_mode {
        let captured = lp.mute_start_frame;
        lp.apply_unmute(policy, captured);
        if lp.mode == MajorMode::Mute {
            lp.mode = MajorMode::Play;
        }
    } else {
        lp.minor.mute = true;
        lp.minor.mute_mode = true;
        lp.mute_start_frame = lp.play_frame;
        if lp.mode == MajorMode::Play {
            lp.mode = MajorMode::Mute;
        }
    }
    ExecuteResult::default()
}

/// Toggle pause on the active loop
pub fn pause_toggle(track: &mut Track) -> ExecuteResult {
    let lp = track.active_loop_mut();
    if lp.minor.pause {
        lp.minor.pause = false;
        lp.mode = if lp.minor.mute { MajorMode::Mute } else { MajorMode::Play };
    } else {
        lp.minor.pause = true;
        lp.mode = MajorMode::Pause;
    }
    ExecuteResult::default()
}
