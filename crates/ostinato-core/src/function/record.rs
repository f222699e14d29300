//! Record, overdub, and the replace-family handlers

use crate::model::{MajorMode, Track};

use super::ExecuteResult;

/// Begin the initial recording on the active loop
///
/// Re-recording over existing content discards it; any layers the loop
/// still holds go back to the arena first.
pub fn record_start(track: &mut Track) -> ExecuteResult {
    let lp = track.active_loop_mut();
    if let Some(h) = lp.record_layer.take() {
        track.layers.release(h);
    }
    let lp = track.active_loop_mut();
    if let Some(h) = lp.play_layer.take() {
        track.layers.release(h);
    }
    let layer = track.layers.alloc();
    if let Some(l) = track.layers.get_mut(layer) {
        l.begin(0);
        l.checkpoint = true;
    }
    track.active_loop_mut().begin_recording(layer);
    ExecuteResult::default()
}

/// Close the initial recording at the current record cursor
pub fn record_stop(track: &mut Track) -> ExecuteResult {
    let lp = track.active_loop_mut();
    let length = lp.record_frame;
    if length == 0 {
        // Stop landed in the same block as the start; drop the empty take
        let (record, play) = lp.reset();
        if let Some(h) = record {
            track.layers.release(h);
        }
        if let Some(h) = play {
            track.layers.release(h);
        }
        track.queue.trace_invalid("recording stopped with zero length", 0);
        return ExecuteResult { length_changed: false, was_reset: true };
    }
    let layer = lp.record_layer;
    lp.finish_recording(length);
    if let Some(h) = layer {
        if let Some(l) = track.layers.get_mut(h) {
            l.finish(length, 1);
        }
    }
    ExecuteResult { length_changed: true, was_reset: false }
}

/// Toggle overdub; also serves as the overdub alternate ending of Record
pub fn overdub_toggle(track: &mut Track) -> ExecuteResult {
    let mut result = ExecuteResult::default();
    if track.active_loop().mode == MajorMode::Record {
        result = record_stop(track);
        if result.was_reset {
            return result;
        }
    }
    let lp = track.active_loop_mut();
    lp.minor.overdub = !lp.minor.overdub;
    if lp.minor.overdub {
        lp.record_frame = lp.play_frame;
        let layer = track.layers.alloc();
        let start = track.active_loop().play_frame;
        if let Some(l) = track.layers.get_mut(layer) {
            l.begin(start);
        }
        track.active_loop_mut().record_layer = Some(layer);
    } else {
        retire_record_layer(track, true);
    }
    result
}

/// Enter or exit one of the replace-family modes (Replace/Substitute/Rehearse)
///
/// Rehearse discards its pass on exit; Replace and Substitute keep theirs
/// as the new play layer.
pub fn replace_toggle(track: &mut Track, target: MajorMode) -> ExecuteResult {
    let mut result = ExecuteResult::default();
    let mode = track.active_loop().mode;
    if mode == MajorMode::Record {
        result = record_stop(track);
        if result.was_reset {
            return result;
        }
    }
    if track.active_loop().mode == target {
        // Exiting
        let keep = target != MajorMode::Rehearse;
        retire_record_layer(track, keep);
        let lp = track.active_loop_mut();
        lp.mode = if lp.minor.mute { MajorMode::Mute } else { MajorMode::Play };
        return result;
    }
    // Entering; an overdub pass still in flight is folded in first
    if track.active_loop().record_layer.is_some() {
        retire_record_layer(track, true);
    }
    let layer = track.layers.alloc();
    let start = track.active_loop().play_frame;
    if let Some(l) = track.layers.get_mut(layer) {
        l.begin(start);
    }
    let lp = track.active_loop_mut();
    lp.mode = target;
    lp.mode_start_frame = lp.play_frame;
    lp.record_frame = lp.play_frame;
    lp.record_layer = Some(layer);
    result
}

/// Close out the in-flight record layer
///
/// When kept it becomes the play layer (releasing the previous one);
/// otherwise it goes straight back to the arena.
pub(super) fn retire_record_layer(track: &mut Track, keep: bool) {
    let lp = track.active_loop_mut();
    let Some(handle) = lp.record_layer.take() else { return };
    if !keep {
        track.layers.release(handle);
        return;
    }
    let frames = lp.frames;
    let cycles = lp.cycles;
    let previous = lp.play_layer.replace(handle);
    if let Some(l) = track.layers.get_mut(handle) {
        l.finish(frames, cycles);
    }
    if let Some(h) = previous {
        track.layers.release(h);
    }
}
