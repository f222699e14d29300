//! Function dispatch - the mode state machine
//!
//! Every user-visible looper function routes through one explicit
//! transition table keyed by `(current major mode, function)`. The table
//! decides whether the function runs now, gets quantized, waits for a sync
//! pulse, ends a rounding mode at its cycle boundary, stacks under a
//! pending loop switch, or is rejected. Keeping the table in one match
//! makes the state machine's completeness auditable.
//!
//! Two standing rules sit above the table:
//! - re-invoking a function that already has a scheduled or pending event
//!   cancels that event instead of stacking a second one
//! - while a loop switch is pending, invoked functions stack under the
//!   switch and execute against the destination loop after it completes

mod mute;
mod record;
mod rounding;
mod switch;

use crate::config::LooperConfig;
use crate::event::{quantize_delay, EventType};
use crate::model::{MajorMode, Track};
use crate::pool::Handle;
use crate::types::{Frame, QuantizeMode, SyncSource, SyncUnit};

/// User-visible looper functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FunctionId {
    #[default]
    Record,
    AutoRecord,
    Overdub,
    Multiply,
    Insert,
    Mute,
    Pause,
    Replace,
    Substitute,
    Rehearse,
    Speed,
    Switch,
    Reset,
    GlobalReset,
}

impl FunctionId {
    /// Display name for traces
    pub fn name(&self) -> &'static str {
        match self {
            FunctionId::Record => "Record",
            FunctionId::AutoRecord => "AutoRecord",
            FunctionId::Overdub => "Overdub",
            FunctionId::Multiply => "Multiply",
            FunctionId::Insert => "Insert",
            FunctionId::Mute => "Mute",
            FunctionId::Pause => "Pause",
            FunctionId::Replace => "Replace",
            FunctionId::Substitute => "Substitute",
            FunctionId::Rehearse => "Rehearse",
            FunctionId::Speed => "Speed",
            FunctionId::Switch => "Switch",
            FunctionId::Reset => "Reset",
            FunctionId::GlobalReset => "GlobalReset",
        }
    }

    /// The event type this function schedules by default
    pub fn event_type(&self) -> EventType {
        match self {
            FunctionId::Record | FunctionId::AutoRecord => EventType::Record,
            FunctionId::Overdub => EventType::Overdub,
            FunctionId::Multiply => EventType::Multiply,
            FunctionId::Insert => EventType::Insert,
            FunctionId::Mute => EventType::Mute,
            FunctionId::Pause => EventType::Pause,
            FunctionId::Replace => EventType::Replace,
            FunctionId::Substitute => EventType::Substitute,
            FunctionId::Rehearse => EventType::Rehearse,
            FunctionId::Speed => EventType::PlayJump,
            FunctionId::Switch => EventType::Switch,
            FunctionId::Reset | FunctionId::GlobalReset => EventType::Reset,
        }
    }
}

/// What the transition table decided for an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionAction {
    /// Execute this block, at the invocation frame
    Immediate(EventType),
    /// Delay to the next boundary of the track's quantize granularity
    Quantized(EventType),
    /// Delay using the (usually coarser) switch quantization
    SwitchQuantized(EventType),
    /// Wait for the next sync pulse; degrades to Quantized without a source
    PendingPulse(EventType),
    /// Schedule the end of a rounding mode at its cycle boundary
    Rounded(EventType),
    /// The re-invocation cancels the function's own pending event
    CancelPending,
    /// Traced and ignored
    Reject(&'static str),
}

/// The mode state machine's transition table
pub fn transition(mode: MajorMode, function: FunctionId) -> TransitionAction {
    use EventType as E;
    use FunctionId as F;
    use MajorMode as M;
    use TransitionAction::*;

    match (mode, function) {
        // Reset and GlobalReset work everywhere
        (_, F::Reset) | (_, F::GlobalReset) => Immediate(E::Reset),

        // --- empty loop ---
        (M::Reset, F::Record) | (M::Reset, F::AutoRecord) => PendingPulse(E::Record),
        (M::Reset, F::Switch) => Immediate(E::Switch),
        (M::Reset, _) => Reject("function requires recorded content"),

        // --- waiting for a pulse or threshold crossing ---
        (M::Synchronize | M::Threshold, F::Record | F::AutoRecord) => CancelPending,
        (M::Synchronize | M::Threshold, _) => Reject("recording has not started"),

        // --- recording the first layer; most functions are alternate endings ---
        (M::Record, F::Record | F::AutoRecord) => PendingPulse(E::RecordStop),
        (M::Record, F::Overdub) => Immediate(E::Overdub),
        (M::Record, F::Multiply) => Immediate(E::Multiply),
        (M::Record, F::Insert) => Immediate(E::Insert),
        (M::Record, F::Mute) => Immediate(E::Mute),
        (M::Record, _) => Reject("not available while recording"),

        // --- rounding modes: the same function schedules the rounded end,
        //     Record ends unrounded at the invocation frame ---
        (M::Multiply, F::Multiply) => Rounded(E::MultiplyEnd),
        (M::Multiply, F::Record) => Immediate(E::MultiplyEnd),
        (M::Multiply, F::Overdub) => Immediate(E::Overdub),
        (M::Multiply, _) => Reject("end the multiply first"),
        (M::Insert, F::Insert) => Rounded(E::InsertEnd),
        (M::Insert, F::Record) => Immediate(E::InsertEnd),
        (M::Insert, F::Overdub) => Immediate(E::Overdub),
        (M::Insert, _) => Reject("end the insert first"),

        // --- replace-family modes: the same function exits, Record exits now ---
        (M::Replace, F::Replace) => Quantized(E::Replace),
        (M::Replace, F::Record) => Immediate(E::Replace),
        (M::Substitute, F::Substitute) => Quantized(E::Substitute),
        (M::Substitute, F::Record) => Immediate(E::Substitute),
        (M::Rehearse, F::Rehearse) => Quantized(E::Rehearse),
        (M::Rehearse, F::Record) => Immediate(E::Rehearse),
        (M::Replace | M::Substitute | M::Rehearse, F::Mute) => Quantized(E::Mute),
        (M::Replace | M::Substitute | M::Rehearse, F::Overdub) => Immediate(E::Overdub),
        (M::Replace | M::Substitute | M::Rehearse, _) => Reject("end the current mode first"),

        // --- paused ---
        (M::Pause, F::Pause) => Immediate(E::Pause),
        (M::Pause, F::Record | F::AutoRecord) => PendingPulse(E::Record),
        (M::Pause, F::Mute) => Immediate(E::Mute),
        (M::Pause, _) => Reject("not available while paused"),

        // --- playing or muted: the general case ---
        (M::Play | M::Mute | M::Switch, F::Record | F::AutoRecord) => Quantized(E::Record),
        (M::Play | M::Mute | M::Switch, F::Overdub) => Quantized(E::Overdub),
        (M::Play | M::Mute | M::Switch, F::Multiply) => Quantized(E::Multiply),
        (M::Play | M::Mute | M::Switch, F::Insert) => Quantized(E::Insert),
        (M::Play | M::Mute | M::Switch, F::Mute) => Quantized(E::Mute),
        (M::Play | M::Mute | M::Switch, F::Pause) => Immediate(E::Pause),
        (M::Play | M::Mute | M::Switch, F::Replace) => Quantized(E::Replace),
        (M::Play | M::Mute | M::Switch, F::Substitute) => Quantized(E::Substitute),
        (M::Play | M::Mute | M::Switch, F::Rehearse) => Quantized(E::Rehearse),
        (M::Play | M::Mute | M::Switch, F::Speed) => Quantized(E::PlayJump),
        (M::Play | M::Mute | M::Switch, F::Switch) => SwitchQuantized(E::Switch),
    }
}

/// Per-invocation context supplied by the engine
#[derive(Debug, Clone, Copy)]
pub struct InvokeContext<'a> {
    /// Absolute stream frame at the point of invocation
    pub stream_frame: Frame,
    /// Engine configuration
    pub config: &'a LooperConfig,
    /// A usable sync pulse source exists right now
    pub sync_available: bool,
    /// Precomputed AutoRecord length in frames, when tempo is known
    pub auto_record_frames: Option<Frame>,
}

/// What happened to an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeOutcome {
    /// Scheduled for execution (possibly within the current block)
    Scheduled(Handle),
    /// Waiting for a sync pulse
    Pending(Handle),
    /// Stacked under a pending loop switch
    Stacked(Handle),
    /// The invocation canceled a previously scheduled event
    Canceled,
    /// Traced and ignored
    Rejected,
}

/// Invoke a function against a track
///
/// This is the only entry point for user actions: the transition table
/// plus the standing re-invoke and switch-stacking rules decide everything.
pub fn invoke(
    track: &mut Track,
    function: FunctionId,
    argument: usize,
    ctx: &InvokeContext,
) -> InvokeOutcome {
    // Stacking rule: functions invoked during a pending switch pile up
    // under it and run against the destination loop.
    if function != FunctionId::Reset && function != FunctionId::GlobalReset {
        if let Some(switch_event) = track.queue.find(EventType::Switch) {
            if function != FunctionId::Switch {
                let child = track.queue.schedule(
                    function.event_type(),
                    function,
                    None,
                    false,
                    None,
                );
                if let Some(event) = track.queue.event_mut(child) {
                    event.argument = argument;
                }
                track.queue.stack_child(switch_event, child);
                return InvokeOutcome::Stacked(child);
            }
        }

        // Re-invoke rule: cancel the function's own scheduled/pending event
        // instead of stacking a second one.
        if let Some(existing) = track.queue.find_by_function(function) {
            track.queue.cancel(existing);
            let lp = track.active_loop_mut();
            if lp.mode == MajorMode::Synchronize {
                lp.mode = MajorMode::Reset;
            }
            return InvokeOutcome::Canceled;
        }
    }

    let mode = track.active_loop().mode;
    match transition(mode, function) {
        TransitionAction::Immediate(event_type) => {
            schedule_concrete(track, event_type, function, argument, ctx.stream_frame, false)
        }
        TransitionAction::Quantized(event_type) => {
            let quantize = track.config.quantize;
            schedule_quantized(track, event_type, function, argument, ctx, quantize)
        }
        TransitionAction::SwitchQuantized(event_type) => {
            let quantize = track.config.switch_quantize;
            schedule_quantized(track, event_type, function, argument, ctx, quantize)
        }
        TransitionAction::PendingPulse(event_type) => {
            if ctx.sync_available {
                let handle = track.queue.schedule(
                    event_type,
                    function,
                    None,
                    false,
                    Some(pending_sync_unit(ctx.config)),
                );
                set_argument(track, handle, argument);
                if event_type == EventType::Record && track.active_loop().is_empty() {
                    track.active_loop_mut().mode = MajorMode::Synchronize;
                }
                maybe_auto_record_stop(track, function, None, ctx);
                InvokeOutcome::Pending(handle)
            } else {
                // No sync source: degrade to unsynchronized scheduling
                let quantize = track.config.quantize;
                let outcome =
                    schedule_quantized(track, event_type, function, argument, ctx, quantize);
                if let InvokeOutcome::Scheduled(handle) = outcome {
                    let frame = track.queue.event(handle).and_then(|e| e.frame);
                    maybe_auto_record_stop(track, function, frame, ctx);
                }
                outcome
            }
        }
        TransitionAction::Rounded(event_type) => {
            let delay = quantize_delay(
                track.active_loop(),
                QuantizeMode::Cycle,
                track.config.subcycles,
            )
            .unwrap_or(0);
            schedule_concrete(track, event_type, function, argument, ctx.stream_frame + delay, true)
        }
        TransitionAction::CancelPending => {
            // No event found above; nothing to cancel
            track.queue.trace_invalid("no pending event to cancel", function as i64);
            InvokeOutcome::Rejected
        }
        TransitionAction::Reject(message) => {
            track.queue.trace_invalid(message, function as i64);
            InvokeOutcome::Rejected
        }
    }
}

/// The pulse unit a pending event waits on
///
/// Loop-relative units only exist on the internal pulse train; an external
/// source delivers beats and bars, so anything finer than a bar degrades to
/// waiting on the beat.
fn pending_sync_unit(config: &LooperConfig) -> SyncUnit {
    match config.sync_source {
        SyncSource::Internal => config.sync_unit,
        _ => match config.sync_unit {
            SyncUnit::Bar => SyncUnit::Bar,
            _ => SyncUnit::Beat,
        },
    }
}

fn set_argument(track: &mut Track, handle: Handle, argument: usize) {
    if let Some(event) = track.queue.event_mut(handle) {
        event.argument = argument;
    }
}

fn schedule_concrete(
    track: &mut Track,
    event_type: EventType,
    function: FunctionId,
    argument: usize,
    frame: Frame,
    quantized: bool,
) -> InvokeOutcome {
    let handle = track.queue.schedule(event_type, function, Some(frame), quantized, None);
    set_argument(track, handle, argument);
    InvokeOutcome::Scheduled(handle)
}

fn schedule_quantized(
    track: &mut Track,
    event_type: EventType,
    function: FunctionId,
    argument: usize,
    ctx: &InvokeContext,
    quantize: QuantizeMode,
) -> InvokeOutcome {
    let delay = quantize_delay(track.active_loop(), quantize, track.config.subcycles);
    let frame = ctx.stream_frame + delay.unwrap_or(0);
    schedule_concrete(track, event_type, function, argument, frame, delay.is_some())
}

/// AutoRecord pre-computes its stop so the user doesn't have to end it
fn maybe_auto_record_stop(
    track: &mut Track,
    function: FunctionId,
    start_frame: Option<Frame>,
    ctx: &InvokeContext,
) {
    if function != FunctionId::AutoRecord {
        return;
    }
    let Some(length) = ctx.auto_record_frames else {
        // No tempo available; fall back to a manually ended recording
        return;
    };
    let frame = start_frame.map(|f| f + length);
    let sync_unit = frame.is_none().then(|| match ctx.config.sync_source {
        SyncSource::Internal => ctx.config.sync_unit,
        _ => SyncUnit::Bar,
    });
    track
        .queue
        .schedule(EventType::RecordStop, function, frame, false, sync_unit);
}

/// Summary of an event's execution, for the engine's bookkeeping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteResult {
    /// The loop's length changed (drift monitors must re-orient)
    pub length_changed: bool,
    /// The loop was reset
    pub was_reset: bool,
}

impl ExecuteResult {
    fn merge(&mut self, other: ExecuteResult) {
        self.length_changed |= other.length_changed;
        self.was_reset |= other.was_reset;
    }
}

/// Execute a due event and then its stacked children, in stacking order
///
/// The event is released back to the arena before its handler runs so a
/// handler that clears the queue (Reset) never double-releases it.
pub fn execute_event(track: &mut Track, handle: Handle, ctx: &InvokeContext) -> ExecuteResult {
    let Some(event) = track.queue.event(handle) else {
        track.queue.trace_invalid("stale event handle at execution", handle.index() as i64);
        return ExecuteResult::default();
    };
    let event_type = event.event_type;
    let function = event.function;
    let argument = event.argument;

    // Detach children before releasing the parent
    let mut children: [Option<Handle>; 8] = [None; 8];
    let mut child_count = 0;
    while let Some(child) = track.queue.take_first_child(handle) {
        if child_count < children.len() {
            children[child_count] = Some(child);
            child_count += 1;
        } else {
            track.queue.cancel(child);
        }
    }
    track.queue.release(handle);

    let mut result = dispatch(track, event_type, function, argument, ctx);

    for child in children.iter().take(child_count).flatten() {
        result.merge(execute_event(track, *child, ctx));
    }

    track.sync_atomics();
    result
}

fn dispatch(
    track: &mut Track,
    event_type: EventType,
    function: FunctionId,
    argument: usize,
    ctx: &InvokeContext,
) -> ExecuteResult {
    match event_type {
        EventType::Record => record::record_start(track),
        EventType::RecordStop => record::record_stop(track),
        EventType::Overdub => record::overdub_toggle(track),
        EventType::Replace => record::replace_toggle(track, MajorMode::Replace),
        EventType::Substitute => record::replace_toggle(track, MajorMode::Substitute),
        EventType::Rehearse => record::replace_toggle(track, MajorMode::Rehearse),
        EventType::Multiply => rounding::multiply_start(track),
        EventType::MultiplyEnd => rounding::multiply_end(track, function == FunctionId::Record),
        EventType::Insert => rounding::insert_start(track),
        EventType::InsertEnd => rounding::insert_end(track, function == FunctionId::Record),
        EventType::Mute => {
            let policy = track.config.mute_mode;
            mute::mute_toggle(track, policy)
        }
        EventType::Pause => mute::pause_toggle(track),
        EventType::PlayJump => switch::play_jump(track),
        EventType::Switch => switch::switch_loop(track, argument),
        EventType::Reset => {
            if function == FunctionId::GlobalReset {
                track.reset();
            } else {
                switch::reset_active_loop(track);
            }
            ExecuteResult { length_changed: true, was_reset: true }
        }
        EventType::Validate | EventType::ScriptWait => ExecuteResult::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackConfig;
    use crate::model::MinorModes;
    use crate::types::TrackId;

    fn track() -> Track {
        Track::new(TrackId::new(0), TrackConfig::default(), 32, 16)
    }

    fn ctx(config: &LooperConfig) -> InvokeContext<'_> {
        InvokeContext {
            stream_frame: 0,
            config,
            sync_available: false,
            auto_record_frames: None,
        }
    }

    fn run_due(track: &mut Track, ctx: &InvokeContext, horizon: Frame) -> ExecuteResult {
        let mut result = ExecuteResult::default();
        while let Some((handle, _)) = track.queue.pop_due(0, horizon) {
            result.merge(execute_event(track, handle, ctx));
        }
        result
    }

    #[test]
    fn test_table_rejects_content_functions_on_empty_loop() {
        for function in [
            FunctionId::Overdub,
            FunctionId::Multiply,
            FunctionId::Insert,
            FunctionId::Mute,
            FunctionId::Replace,
        ] {
            assert!(matches!(
                transition(MajorMode::Reset, function),
                TransitionAction::Reject(_)
            ));
        }
    }

    #[test]
    fn test_record_play_record_cycle() {
        let config = LooperConfig::default();
        let mut t = track();
        let c = ctx(&config);

        // Unsynchronized record starts immediately (degraded PendingPulse)
        assert!(matches!(
            invoke(&mut t, FunctionId::Record, 0, &c),
            InvokeOutcome::Scheduled(_)
        ));
        run_due(&mut t, &c, 1);
        assert_eq!(t.active_loop().mode, MajorMode::Record);

        // A second's worth of recording, then stop
        t.advance(48000);
        assert!(matches!(
            invoke(&mut t, FunctionId::Record, 0, &c),
            InvokeOutcome::Scheduled(_)
        ));
        let result = run_due(&mut t, &c, 48001);
        assert!(result.length_changed);
        assert_eq!(t.active_loop().mode, MajorMode::Play);
        assert_eq!(t.active_loop().frames, 48000);
        assert_eq!(t.active_loop().cycles, 1);
    }

    #[test]
    fn test_reinvoke_cancels_quantized_event() {
        let config = LooperConfig::default();
        let mut t = track();
        t.config.quantize = QuantizeMode::Cycle;
        let c = ctx(&config);

        // Build a loop first
        invoke(&mut t, FunctionId::Record, 0, &c);
        run_due(&mut t, &c, 1);
        t.advance(1000);
        invoke(&mut t, FunctionId::Record, 0, &c);
        run_due(&mut t, &c, 2000);

        // Quantized mute schedules...
        assert!(matches!(
            invoke(&mut t, FunctionId::Mute, 0, &c),
            InvokeOutcome::Scheduled(_)
        ));
        assert_eq!(t.queue.len(), 1);

        // ...and re-invoking cancels instead of stacking
        assert_eq!(invoke(&mut t, FunctionId::Mute, 0, &c), InvokeOutcome::Canceled);
        assert!(t.queue.is_empty());
    }

    #[test]
    fn test_overdub_survives_multiply() {
        let config = LooperConfig::default();
        let mut t = track();
        let c = ctx(&config);

        invoke(&mut t, FunctionId::Record, 0, &c);
        run_due(&mut t, &c, 1);
        t.advance(1000);
        invoke(&mut t, FunctionId::Record, 0, &c);
        run_due(&mut t, &c, 2000);

        invoke(&mut t, FunctionId::Overdub, 0, &c);
        run_due(&mut t, &c, 2000);
        assert!(t.active_loop().minor.overdub);

        invoke(&mut t, FunctionId::Multiply, 0, &c);
        run_due(&mut t, &c, 2000);
        assert_eq!(t.active_loop().mode, MajorMode::Multiply);
        assert!(t.active_loop().minor.overdub, "overdub is a minor mode, survives");
    }

    #[test]
    fn test_functions_stack_under_pending_switch() {
        let config = LooperConfig::default();
        let mut t = track();
        let c = ctx(&config);

        invoke(&mut t, FunctionId::Record, 0, &c);
        run_due(&mut t, &c, 1);
        t.advance(1000);
        invoke(&mut t, FunctionId::Record, 0, &c);
        run_due(&mut t, &c, 2000);

        // Switch quantizes to the loop boundary by default: it stays queued
        invoke(&mut t, FunctionId::Switch, 1, &c);
        let switch = t.queue.find(EventType::Switch).unwrap();

        // Functions invoked now stack under the switch
        assert!(matches!(
            invoke(&mut t, FunctionId::Overdub, 0, &c),
            InvokeOutcome::Stacked(_)
        ));
        assert!(t.queue.event(switch).unwrap().first_child.is_some());
    }

    #[test]
    fn test_synchronized_record_goes_pending() {
        let mut config = LooperConfig::default();
        config.sync_source = crate::types::SyncSource::Host;
        let mut t = track();
        let c = InvokeContext {
            stream_frame: 0,
            config: &config,
            sync_available: true,
            auto_record_frames: None,
        };

        let outcome = invoke(&mut t, FunctionId::Record, 0, &c);
        assert!(matches!(outcome, InvokeOutcome::Pending(_)));
        assert_eq!(t.active_loop().mode, MajorMode::Synchronize);

        // Re-invoking cancels the pending record and returns to Reset
        assert_eq!(invoke(&mut t, FunctionId::Record, 0, &c), InvokeOutcome::Canceled);
        assert_eq!(t.active_loop().mode, MajorMode::Reset);
    }

    #[test]
    fn test_pending_unit_degrades_to_deliverable_pulse() {
        // An external source only emits beats and bars; a loop-relative
        // configured unit must not leave the event waiting on a pulse that
        // can never arrive.
        let mut config = LooperConfig::default();
        config.sync_source = crate::types::SyncSource::Host;
        config.sync_unit = SyncUnit::Cycle;
        let mut t = track();
        let c = InvokeContext {
            stream_frame: 0,
            config: &config,
            sync_available: true,
            auto_record_frames: None,
        };

        let InvokeOutcome::Pending(handle) = invoke(&mut t, FunctionId::Record, 0, &c) else {
            panic!("record should wait on a pulse");
        };
        assert_eq!(t.queue.event(handle).unwrap().sync_unit, Some(SyncUnit::Beat));

        // The internal train carries loop-relative units directly
        config.sync_source = crate::types::SyncSource::Internal;
        let mut t = track();
        let c = InvokeContext {
            stream_frame: 0,
            config: &config,
            sync_available: true,
            auto_record_frames: None,
        };
        let InvokeOutcome::Pending(handle) = invoke(&mut t, FunctionId::Record, 0, &c) else {
            panic!("record should wait on a pulse");
        };
        assert_eq!(t.queue.event(handle).unwrap().sync_unit, Some(SyncUnit::Cycle));
    }

    #[test]
    fn test_global_reset_clears_minor_modes() {
        let config = LooperConfig::default();
        let mut t = track();
        let c = ctx(&config);

        invoke(&mut t, FunctionId::Record, 0, &c);
        run_due(&mut t, &c, 1);
        t.advance(1000);
        invoke(&mut t, FunctionId::Record, 0, &c);
        run_due(&mut t, &c, 2000);
        invoke(&mut t, FunctionId::Overdub, 0, &c);
        run_due(&mut t, &c, 2000);

        invoke(&mut t, FunctionId::GlobalReset, 0, &c);
        run_due(&mut t, &c, 2000);
        assert_eq!(t.active_loop().mode, MajorMode::Reset);
        assert_eq!(t.active_loop().minor, MinorModes::default());
        assert!(t.active_loop().is_empty());
    }
}
