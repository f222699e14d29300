//! Loop switching, play jumps, and reset

use crate::event::JumpContext;
use crate::model::{MajorMode, Track};

use super::{mute, record, rounding, ExecuteResult};

/// Switch the track to another of its loops
///
/// Any recording mode on the departing loop is closed first so its length
/// is settled; the destination keeps whatever state it was left in. The
/// departing loop's cursor freezes (only the active loop advances), so
/// switching back resumes it where it stopped.
pub fn switch_loop(track: &mut Track, target: usize) -> ExecuteResult {
    let mut result = settle_departing_loop(track);
    let target = target % track.loops.len();
    if target == track.active {
        return result;
    }

    let departing = track.active;
    track.active = target;
    let jump = landing_context(track);
    track
        .queue
        .trace_note("loop switch", departing as i64, jump.frame as i64);

    // A switch to a differently sized loop re-orients external sync
    result.length_changed = true;
    result
}

/// Describe what the output stream does at the switch point
pub fn landing_context(track: &Track) -> JumpContext {
    let lp = track.active_loop();
    JumpContext {
        mute: lp.minor.mute || lp.is_empty(),
        frame: lp.play_frame,
        rate_shift: if lp.minor.half_speed { -1 } else { 0 },
    }
}

/// Relocate playback: jump the cursor and flip half-speed
pub fn play_jump(track: &mut Track) -> ExecuteResult {
    let lp = track.active_loop_mut();
    lp.minor.half_speed = !lp.minor.half_speed;
    ExecuteResult::default()
}

/// Reset only the active loop, leaving the track's other loops intact
pub fn reset_active_loop(track: &mut Track) -> ExecuteResult {
    track.queue.clear();
    let (record_layer, play_layer) = track.active_loop_mut().reset();
    if let Some(h) = record_layer {
        track.layers.release(h);
    }
    if let Some(h) = play_layer {
        track.layers.release(h);
    }
    ExecuteResult { length_changed: true, was_reset: true }
}

/// Close whatever open-ended mode the departing loop is in
fn settle_departing_loop(track: &mut Track) -> ExecuteResult {
    let mut result = ExecuteResult::default();
    match track.active_loop().mode {
        MajorMode::Record => {
            result = record::record_stop(track);
        }
        MajorMode::Multiply => {
            result = rounding::multiply_end(track, false);
        }
        MajorMode::Insert => {
            result = rounding::insert_end(track, false);
        }
        MajorMode::Replace => {
            result = record::replace_toggle(track, MajorMode::Replace);
        }
        MajorMode::Substitute => {
            result = record::replace_toggle(track, MajorMode::Substitute);
        }
        MajorMode::Rehearse => {
            result = record::replace_toggle(track, MajorMode::Rehearse);
        }
        MajorMode::Pause => {
            result = mute::pause_toggle(track);
        }
        _ => {}
    }
    if track.active_loop().minor.overdub {
        let lp = track.active_loop_mut();
        lp.minor.overdub = false;
        record::retire_record_layer(track, true);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackConfig;
    use crate::function::record::{overdub_toggle, record_start, record_stop};
    use crate::types::TrackId;

    fn playing_track() -> Track {
        let mut t = Track::new(TrackId::new(0), TrackConfig::default(), 32, 16);
        record_start(&mut t);
        t.advance(1000);
        record_stop(&mut t);
        t
    }

    #[test]
    fn test_switch_to_empty_loop() {
        let mut t = playing_track();
        switch_loop(&mut t, 1);
        assert_eq!(t.active, 1);
        assert_eq!(t.active_loop().mode, MajorMode::Reset);
        assert!(t.active_loop().is_empty());
    }

    #[test]
    fn test_switch_back_resumes_frozen_cursor() {
        let mut t = playing_track();
        t.advance(400);
        switch_loop(&mut t, 1);
        t.advance(9999);
        switch_loop(&mut t, 0);
        assert_eq!(t.active_loop().play_frame, 400);
        assert_eq!(t.active_loop().mode, MajorMode::Play);
    }

    #[test]
    fn test_switch_target_wraps() {
        let mut t = playing_track();
        let target = t.loops.len() + 2;
        switch_loop(&mut t, target);
        assert_eq!(t.active, 2);
    }

    #[test]
    fn test_switch_closes_open_recording() {
        let mut t = Track::new(TrackId::new(0), TrackConfig::default(), 32, 16);
        record_start(&mut t);
        t.advance(750);
        switch_loop(&mut t, 1);

        assert_eq!(t.loops[0].frames, 750);
        assert_eq!(t.loops[0].mode, MajorMode::Play);
    }

    #[test]
    fn test_switch_closes_overdub() {
        let mut t = playing_track();
        overdub_toggle(&mut t);
        assert_eq!(t.layers.stats().in_use, 2);

        switch_loop(&mut t, 1);
        assert!(!t.loops[0].minor.overdub);
        assert_eq!(t.layers.stats().in_use, 1);
    }

    #[test]
    fn test_reset_active_loop_spares_others() {
        let mut t = playing_track();
        switch_loop(&mut t, 1);
        record_start(&mut t);
        t.advance(500);
        record_stop(&mut t);

        reset_active_loop(&mut t);
        assert!(t.loops[1].is_empty());
        assert_eq!(t.loops[0].frames, 1000, "loop 0 untouched");
    }
}
