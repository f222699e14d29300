//! Per-track event queue
//!
//! An ordered list of pending events threaded through the event arena by
//! index links. Events with concrete frames sort by frame (insertion order
//! preserved on ties); pending events sit at the tail until a pulse
//! activates them. The queue is mutated only from the audio-block pass and
//! the scripting-wait path, which runs synchronously inside that pass, so
//! there are no concurrent writers by construction.

use crate::pool::{Arena, ArenaStats, Handle};
use crate::trace::{TraceContext, TraceSender};
use crate::types::{Frame, SyncUnit};

use super::{Event, EventType};
use crate::function::FunctionId;

/// Ordered queue of scheduled events for one track
pub struct EventQueue {
    arena: Arena<Event>,
    head: Option<Handle>,
    track: usize,
    trace: Option<TraceSender>,
}

impl EventQueue {
    /// Create a queue with a pre-populated event arena
    pub fn new(track: usize, capacity: usize) -> Self {
        Self {
            arena: Arena::new("event", capacity),
            head: None,
            track,
            trace: None,
        }
    }

    /// Attach a trace sender
    pub fn set_trace(&mut self, trace: TraceSender) {
        self.arena.set_trace(trace.clone());
        self.trace = Some(trace);
    }

    fn ctx(&self) -> TraceContext {
        TraceContext::track(self.track)
    }

    /// Resolve an event handle
    pub fn event(&self, handle: Handle) -> Option<&Event> {
        self.arena.get(handle)
    }

    /// Mutable variant of [`EventQueue::event`]
    pub fn event_mut(&mut self, handle: Handle) -> Option<&mut Event> {
        self.arena.get_mut(handle)
    }

    /// Number of events currently queued (excluding stacked children)
    pub fn len(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.head;
        while let Some(h) = cursor {
            count += 1;
            cursor = self.arena.get(h).and_then(|e| e.next);
        }
        count
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Allocate and enqueue a new event
    ///
    /// `frame: None` makes a pending event that waits for `sync_unit`.
    pub fn schedule(
        &mut self,
        event_type: EventType,
        function: FunctionId,
        frame: Option<Frame>,
        quantized: bool,
        sync_unit: Option<SyncUnit>,
    ) -> Handle {
        let handle = self.arena.alloc();
        if let Some(event) = self.arena.get_mut(handle) {
            event.event_type = event_type;
            event.function = function;
            event.frame = frame;
            event.quantized = quantized;
            event.sync_unit = sync_unit;
        }
        self.insert(handle);
        handle
    }

    /// Insert an already-allocated event preserving frame order
    ///
    /// Never rejects; pending events (no frame) order after everything.
    fn insert(&mut self, handle: Handle) {
        let frame = match self.arena.get(handle) {
            Some(e) => e.frame,
            None => return,
        };
        let sort_key = frame.unwrap_or(Frame::MAX);

        // Find the last event whose key is <= ours (ties keep insertion order)
        let mut prev: Option<Handle> = None;
        let mut cursor = self.head;
        while let Some(h) = cursor {
            let key = self
                .arena
                .get(h)
                .map(|e| e.frame.unwrap_or(Frame::MAX))
                .unwrap_or(Frame::MAX);
            if key > sort_key {
                break;
            }
            prev = Some(h);
            cursor = self.arena.get(h).and_then(|e| e.next);
        }

        if let Some(event) = self.arena.get_mut(handle) {
            event.next = cursor;
        }
        match prev {
            Some(p) => {
                if let Some(prev_event) = self.arena.get_mut(p) {
                    prev_event.next = Some(handle);
                }
            }
            None => self.head = Some(handle),
        }
    }

    fn unlink(&mut self, handle: Handle) -> bool {
        let mut prev: Option<Handle> = None;
        let mut cursor = self.head;
        while let Some(h) = cursor {
            let next = self.arena.get(h).and_then(|e| e.next);
            if h == handle {
                match prev {
                    Some(p) => {
                        if let Some(prev_event) = self.arena.get_mut(p) {
                            prev_event.next = next;
                        }
                    }
                    None => self.head = next,
                }
                if let Some(event) = self.arena.get_mut(handle) {
                    event.next = None;
                }
                return true;
            }
            prev = cursor;
            cursor = next;
        }
        false
    }

    /// First queued event of the given type, in frame order
    pub fn find(&self, event_type: EventType) -> Option<Handle> {
        let mut cursor = self.head;
        while let Some(h) = cursor {
            let event = self.arena.get(h)?;
            if event.event_type == event_type {
                return Some(h);
            }
            cursor = event.next;
        }
        None
    }

    /// First queued event scheduled by the given function
    pub fn find_by_function(&self, function: FunctionId) -> Option<Handle> {
        let mut cursor = self.head;
        while let Some(h) = cursor {
            let event = self.arena.get(h)?;
            if event.function == function {
                return Some(h);
            }
            cursor = event.next;
        }
        None
    }

    /// Remove an event (and its stacked children) before execution
    pub fn cancel(&mut self, handle: Handle) {
        self.cancel_children(handle);
        // Detach from a parent's child list if stacked there
        if let Some(parent) = self.arena.get(handle).and_then(|e| e.parent) {
            self.detach_child(parent, handle);
        }
        self.unlink(handle);
        self.arena.release(handle);
    }

    /// Cancel every child stacked under a pending event, keeping the parent
    ///
    /// Used when a loop switch is itself canceled: the functions stacked
    /// under it must not fire against the wrong loop.
    pub fn cancel_children(&mut self, parent: Handle) {
        let mut child = self.arena.get(parent).and_then(|e| e.first_child);
        while let Some(c) = child {
            let sibling = self.arena.get(c).and_then(|e| e.sibling);
            self.cancel_children(c);
            self.arena.release(c);
            child = sibling;
        }
        if let Some(event) = self.arena.get_mut(parent) {
            event.first_child = None;
        }
    }

    fn detach_child(&mut self, parent: Handle, child: Handle) {
        let mut cursor = self.arena.get(parent).and_then(|e| e.first_child);
        let mut prev: Option<Handle> = None;
        while let Some(c) = cursor {
            let sibling = self.arena.get(c).and_then(|e| e.sibling);
            if c == child {
                match prev {
                    Some(p) => {
                        if let Some(prev_event) = self.arena.get_mut(p) {
                            prev_event.sibling = sibling;
                        }
                    }
                    None => {
                        if let Some(parent_event) = self.arena.get_mut(parent) {
                            parent_event.first_child = sibling;
                        }
                    }
                }
                return;
            }
            prev = cursor;
            cursor = sibling;
        }
    }

    /// Stack an event under a pending parent instead of the main queue
    ///
    /// Children execute only after the parent completes, in stacking order.
    pub fn stack_child(&mut self, parent: Handle, child: Handle) {
        self.unlink(child);
        if let Some(event) = self.arena.get_mut(child) {
            event.parent = Some(parent);
            event.sibling = None;
        }
        // Append at the tail of the child list
        let mut cursor = self.arena.get(parent).and_then(|e| e.first_child);
        match cursor {
            None => {
                if let Some(parent_event) = self.arena.get_mut(parent) {
                    parent_event.first_child = Some(child);
                }
            }
            Some(_) => {
                while let Some(c) = cursor {
                    let sibling = self.arena.get(c).and_then(|e| e.sibling);
                    if sibling.is_none() {
                        if let Some(last) = self.arena.get_mut(c) {
                            last.sibling = Some(child);
                        }
                        break;
                    }
                    cursor = sibling;
                }
            }
        }
    }

    /// Pop the first stacked child of an executed parent
    pub fn take_first_child(&mut self, parent: Handle) -> Option<Handle> {
        let child = self.arena.get(parent).and_then(|e| e.first_child)?;
        let sibling = self.arena.get(child).and_then(|e| e.sibling);
        if let Some(parent_event) = self.arena.get_mut(parent) {
            parent_event.first_child = sibling;
        }
        if let Some(child_event) = self.arena.get_mut(child) {
            child_event.parent = None;
            child_event.sibling = None;
        }
        Some(child)
    }

    /// Give concrete frames to pending events satisfied by this pulse
    ///
    /// A bar pulse satisfies both beat- and bar-waiting events; a beat
    /// pulse satisfies beat-waiting events only. Returns how many were
    /// activated.
    pub fn activate_pending(&mut self, pulse: SyncUnit, frame: Frame) -> usize {
        let mut to_activate = [None; 16];
        let mut count = 0;

        let mut cursor = self.head;
        while let Some(h) = cursor {
            let Some(event) = self.arena.get(h) else { break };
            let next = event.next;
            if event.is_pending() {
                let satisfied = match event.sync_unit {
                    Some(SyncUnit::Beat) => {
                        pulse == SyncUnit::Beat || pulse == SyncUnit::Bar
                    }
                    Some(wanted) => pulse == wanted,
                    None => false,
                };
                if satisfied && count < to_activate.len() {
                    to_activate[count] = Some(h);
                    count += 1;
                }
            }
            cursor = next;
        }

        for slot in to_activate.iter().take(count) {
            let Some(h) = *slot else { continue };
            self.unlink(h);
            if let Some(event) = self.arena.get_mut(h) {
                event.frame = Some(frame);
            }
            self.insert(h);
        }
        count
    }

    /// Pop the earliest event due within `[block_start, block_start+frames)`
    ///
    /// Returns the event and its intra-block offset. Events whose frame has
    /// already passed execute at offset zero; the engine tolerates lateness
    /// rather than dropping the action.
    pub fn pop_due(&mut self, block_start: Frame, block_frames: Frame) -> Option<(Handle, u32)> {
        let head = self.head?;
        let frame = self.arena.get(head)?.frame?;
        if frame >= block_start + block_frames {
            return None;
        }
        self.unlink(head);
        let offset = frame
            .saturating_sub(block_start)
            .min(block_frames.saturating_sub(1)) as u32;
        Some((head, offset))
    }

    /// Shift every concrete frame by a signed delta (loop length rebase)
    pub fn shift(&mut self, delta: i64) {
        let mut cursor = self.head;
        while let Some(h) = cursor {
            let Some(event) = self.arena.get_mut(h) else { break };
            if let Some(frame) = event.frame {
                event.frame = Some(if delta >= 0 {
                    frame.saturating_add(delta as u64)
                } else {
                    frame.saturating_sub((-delta) as u64)
                });
            }
            cursor = event.next;
        }
    }

    /// Return an executed event (children must already be released)
    pub fn release(&mut self, handle: Handle) {
        self.arena.release(handle);
    }

    /// Cancel everything queued (track reset)
    pub fn clear(&mut self) {
        while let Some(head) = self.head {
            self.cancel(head);
        }
    }

    /// Arena debug counters
    pub fn stats(&self) -> ArenaStats {
        self.arena.stats()
    }

    /// Trace that an operation hit an invalid target and became a no-op
    pub fn trace_invalid(&self, message: &'static str, arg: i64) {
        if let Some(trace) = &self.trace {
            trace.error(self.ctx(), message, arg, 0);
        }
    }

    /// Trace a noteworthy state change on this track
    pub fn trace_note(&self, message: &'static str, a: i64, b: i64) {
        if let Some(trace) = &self.trace {
            trace.info(self.ctx(), message, a, b);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> EventQueue {
        EventQueue::new(0, 16)
    }

    #[test]
    fn test_frame_order_insertion() {
        let mut q = queue();
        let late = q.schedule(EventType::Mute, FunctionId::Mute, Some(500), true, None);
        let early = q.schedule(EventType::Record, FunctionId::Record, Some(100), false, None);
        let mid = q.schedule(EventType::Overdub, FunctionId::Overdub, Some(300), true, None);

        let (a, _) = q.pop_due(0, 1000).unwrap();
        let (b, _) = q.pop_due(0, 1000).unwrap();
        let (c, _) = q.pop_due(0, 1000).unwrap();
        assert_eq!((a, b, c), (early, mid, late));
    }

    #[test]
    fn test_same_frame_keeps_insertion_order() {
        let mut q = queue();
        let first = q.schedule(EventType::Mute, FunctionId::Mute, Some(200), true, None);
        let second = q.schedule(EventType::Overdub, FunctionId::Overdub, Some(200), true, None);

        assert_eq!(q.pop_due(0, 1000).unwrap().0, first);
        assert_eq!(q.pop_due(0, 1000).unwrap().0, second);
    }

    #[test]
    fn test_pop_due_respects_block_window() {
        let mut q = queue();
        q.schedule(EventType::Mute, FunctionId::Mute, Some(600), true, None);

        assert!(q.pop_due(0, 256).is_none());
        assert!(q.pop_due(256, 256).is_none());
        let (_, offset) = q.pop_due(512, 256).unwrap();
        assert_eq!(offset, 88);
    }

    #[test]
    fn test_late_event_executes_at_offset_zero() {
        let mut q = queue();
        q.schedule(EventType::Mute, FunctionId::Mute, Some(100), false, None);
        let (_, offset) = q.pop_due(500, 256).unwrap();
        assert_eq!(offset, 0);
    }

    #[test]
    fn test_zero_frame_block_pops_late_event() {
        // Hosts may deliver empty blocks; a past-due event still pops, at
        // offset zero, instead of underflowing the clamp.
        let mut q = queue();
        q.schedule(EventType::Mute, FunctionId::Mute, Some(100), false, None);
        let (_, offset) = q.pop_due(500, 0).unwrap();
        assert_eq!(offset, 0);
    }

    #[test]
    fn test_pending_events_wait_for_pulse() {
        let mut q = queue();
        let pending =
            q.schedule(EventType::Record, FunctionId::Record, None, false, Some(SyncUnit::Bar));

        assert!(q.pop_due(0, 100000).is_none(), "pending events never fire by frame");

        // A beat pulse doesn't satisfy a bar wait
        assert_eq!(q.activate_pending(SyncUnit::Beat, 4000), 0);
        assert_eq!(q.activate_pending(SyncUnit::Bar, 4000), 1);

        let (h, _) = q.pop_due(4000, 256).unwrap();
        assert_eq!(h, pending);
    }

    #[test]
    fn test_bar_pulse_satisfies_beat_wait() {
        let mut q = queue();
        q.schedule(EventType::Record, FunctionId::Record, None, false, Some(SyncUnit::Beat));
        assert_eq!(q.activate_pending(SyncUnit::Bar, 1000), 1);
    }

    #[test]
    fn test_cancel_unlinks_and_releases() {
        let mut q = queue();
        let h = q.schedule(EventType::Mute, FunctionId::Mute, Some(500), true, None);
        assert_eq!(q.len(), 1);

        q.cancel(h);
        assert!(q.is_empty());
        assert_eq!(q.stats().in_use, 0);
        assert!(q.event(h).is_none(), "canceled handle is stale");
    }

    #[test]
    fn test_switch_stack_children() {
        let mut q = queue();
        let switch = q.schedule(EventType::Switch, FunctionId::Switch, None, false, Some(SyncUnit::Loop));
        let od = q.schedule(EventType::Overdub, FunctionId::Overdub, Some(100), false, None);
        let mute = q.schedule(EventType::Mute, FunctionId::Mute, Some(200), false, None);

        q.stack_child(switch, od);
        q.stack_child(switch, mute);
        assert_eq!(q.len(), 1, "stacked children leave the main queue");

        // Children come back in stacking order
        assert_eq!(q.take_first_child(switch), Some(od));
        assert_eq!(q.take_first_child(switch), Some(mute));
        assert_eq!(q.take_first_child(switch), None);
    }

    #[test]
    fn test_cancel_switch_cancels_stack() {
        let mut q = queue();
        let switch = q.schedule(EventType::Switch, FunctionId::Switch, None, false, Some(SyncUnit::Loop));
        let od = q.schedule(EventType::Overdub, FunctionId::Overdub, Some(100), false, None);
        q.stack_child(switch, od);

        q.cancel(switch);
        assert_eq!(q.stats().in_use, 0);
    }

    #[test]
    fn test_shift_rebases_frames() {
        let mut q = queue();
        q.schedule(EventType::Mute, FunctionId::Mute, Some(1000), true, None);
        q.shift(-400);
        let (_, offset) = q.pop_due(600, 256).unwrap();
        assert_eq!(offset, 0);
    }

    #[test]
    fn test_find_by_type_and_function() {
        let mut q = queue();
        let h = q.schedule(EventType::MultiplyEnd, FunctionId::Multiply, Some(800), true, None);
        assert_eq!(q.find(EventType::MultiplyEnd), Some(h));
        assert_eq!(q.find_by_function(FunctionId::Multiply), Some(h));
        assert_eq!(q.find(EventType::Record), None);
    }
}
