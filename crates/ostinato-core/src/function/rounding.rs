//! Multiply and Insert - the rounding modes
//!
//! Both run open-ended and settle their extent when they end. A rounded
//! ending lands on a cycle boundary and counts whole cycles spanned; the
//! unrounded ending (via Record) closes at the exact invocation frame.

use crate::model::{MajorMode, Track};
use crate::types::Frame;

use super::record::retire_record_layer;
use super::ExecuteResult;

/// Enter Multiply on the active loop
pub fn multiply_start(track: &mut Track) -> ExecuteResult {
    enter(track, MajorMode::Multiply)
}

/// End Multiply
///
/// Rounded: the loop is redefined as the whole cycles spanned. Unrounded:
/// the loop becomes a single cycle of exactly the multiplied length.
pub fn multiply_end(track: &mut Track, unrounded: bool) -> ExecuteResult {
    if !in_rounding_mode(track) {
        return ExecuteResult::default();
    }
    let lp = track.active_loop_mut();
    let cycle = lp.cycle_frames();
    if unrounded && lp.mode_elapsed > 0 {
        lp.set_frames(lp.mode_elapsed);
        lp.cycles = 1;
    } else {
        let spanned = spanned_cycles(lp.mode_elapsed, cycle);
        lp.set_frames(spanned * cycle);
        lp.cycles = spanned as u32;
    }
    finish_rounding(track);
    ExecuteResult { length_changed: true, was_reset: false }
}

/// Enter Insert on the active loop
pub fn insert_start(track: &mut Track) -> ExecuteResult {
    enter(track, MajorMode::Insert)
}

/// End Insert
///
/// Rounded: whole cycles are added to the loop. Unrounded: exactly the
/// inserted span is spliced in and the cycle length absorbs the change.
pub fn insert_end(track: &mut Track, unrounded: bool) -> ExecuteResult {
    if !in_rounding_mode(track) {
        return ExecuteResult::default();
    }
    let lp = track.active_loop_mut();
    let cycle = lp.cycle_frames();
    if unrounded && lp.mode_elapsed > 0 {
        let frames = lp.frames + lp.mode_elapsed;
        lp.set_frames(frames);
    } else {
        let inserted = spanned_cycles(lp.mode_elapsed, cycle);
        let frames = lp.frames + inserted * cycle;
        lp.set_frames(frames);
        lp.cycles += inserted as u32;
    }
    finish_rounding(track);
    ExecuteResult { length_changed: true, was_reset: false }
}

/// Whole cycles covered by an elapsed span, never less than one
fn spanned_cycles(elapsed: Frame, cycle: Frame) -> Frame {
    if cycle == 0 {
        return 1;
    }
    elapsed.div_ceil(cycle).max(1)
}

fn enter(track: &mut Track, mode: MajorMode) -> ExecuteResult {
    let mut result = ExecuteResult::default();
    if track.active_loop().mode == MajorMode::Record {
        result = super::record::record_stop(track);
        if result.was_reset {
            return result;
        }
    }
    // Fold in an overdub pass still in flight before opening a new one
    if track.active_loop().record_layer.is_some() {
        retire_record_layer(track, true);
    }
    let layer = track.layers.alloc();
    let start = track.active_loop().play_frame;
    if let Some(l) = track.layers.get_mut(layer) {
        l.begin(start);
    }
    let lp = track.active_loop_mut();
    lp.mode = mode;
    lp.mode_start_frame = lp.play_frame;
    lp.mode_elapsed = 0;
    lp.record_layer = Some(layer);
    result
}

/// A stale end event can fire after the mode already changed (a Reset in
/// the same block, say); bail rather than remeasure a loop that isn't in
/// a rounding mode anymore.
fn in_rounding_mode(track: &Track) -> bool {
    if track.active_loop().mode.profile().rounds {
        return true;
    }
    track
        .queue
        .trace_invalid("rounding end fired outside a rounding mode", 0);
    false
}

fn finish_rounding(track: &mut Track) {
    retire_record_layer(track, true);
    let lp = track.active_loop_mut();
    lp.mode_elapsed = 0;
    lp.mode = if lp.minor.mute { MajorMode::Mute } else { MajorMode::Play };
}
