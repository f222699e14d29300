//! Generation-checked object arenas for the real-time path
//!
//! Events, layers and kernel requests are created and destroyed every audio
//! block, so they are recycled through fixed-capacity arenas pre-populated
//! at startup. A [`Handle`] carries the slot index plus the slot's
//! generation at allocation time; a stale handle (released, or released and
//! reused) simply fails the generation check instead of reading someone
//! else's object.
//!
//! Exhaustion is not fatal: the arena grows on the heap, traces a warning
//! and counts the violation. An audible glitch from a rare allocation is
//! preferable to dropping the user's action.

use crate::trace::{TraceContext, TraceSender};

/// Restore an object to its default state when it returns to the arena
pub trait PoolReset {
    fn pool_reset(&mut self);
}

/// A generation-checked reference to an arena slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    /// Slot index (for display/trace only; never dereference without the arena)
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

struct Slot<T> {
    value: T,
    generation: u32,
    occupied: bool,
}

/// Arena statistics for debug counters and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaStats {
    /// Total slots, including heap-fallback growth
    pub capacity: usize,
    /// Slots currently handed out
    pub in_use: usize,
    /// Allocations that had to grow past the initial capacity
    pub fallback_allocs: u64,
    /// Releases rejected by the generation check
    pub stale_releases: u64,
}

/// Fixed-capacity freelist arena with generation-checked handles
pub struct Arena<T: PoolReset + Default> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    name: &'static str,
    trace: Option<TraceSender>,
    in_use: usize,
    fallback_allocs: u64,
    stale_releases: u64,
}

impl<T: PoolReset + Default> Arena<T> {
    /// Create an arena pre-populated with `capacity` slots
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        let mut free = Vec::with_capacity(capacity);
        for i in 0..capacity {
            slots.push(Slot {
                value: T::default(),
                generation: 0,
                occupied: false,
            });
            free.push((capacity - 1 - i) as u32);
        }
        Self {
            slots,
            free,
            name,
            trace: None,
            in_use: 0,
            fallback_allocs: 0,
            stale_releases: 0,
        }
    }

    /// Attach a trace sender so exhaustion and stale releases are reported
    pub fn set_trace(&mut self, trace: TraceSender) {
        self.trace = Some(trace);
    }

    /// Allocate a slot, growing (and tracing a warning) on exhaustion
    pub fn alloc(&mut self) -> Handle {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                // Violates the no-allocation rule; tolerated and counted
                self.fallback_allocs += 1;
                if let Some(trace) = &self.trace {
                    trace.warn(
                        TraceContext::global(),
                        "pool exhausted, heap fallback",
                        self.slots.len() as i64,
                        self.fallback_allocs as i64,
                    );
                }
                self.slots.push(Slot {
                    value: T::default(),
                    generation: 0,
                    occupied: false,
                });
                (self.slots.len() - 1) as u32
            }
        };

        let slot = &mut self.slots[index as usize];
        slot.occupied = true;
        self.in_use += 1;
        Handle {
            index,
            generation: slot.generation,
        }
    }

    /// Resolve a handle, failing the generation check on stale handles
    pub fn get(&self, handle: Handle) -> Option<&T> {
        let slot = self.slots.get(handle.index as usize)?;
        (slot.occupied && slot.generation == handle.generation).then_some(&slot.value)
    }

    /// Mutable variant of [`Arena::get`]
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        (slot.occupied && slot.generation == handle.generation).then_some(&mut slot.value)
    }

    /// Return a slot to the arena
    ///
    /// Stale or double releases fail the generation check; they are traced
    /// as programming errors but never panic on the audio thread.
    pub fn release(&mut self, handle: Handle) -> bool {
        let Some(slot) = self.slots.get_mut(handle.index as usize) else {
            self.note_stale_release(handle);
            return false;
        };
        if !slot.occupied || slot.generation != handle.generation {
            self.note_stale_release(handle);
            return false;
        }

        slot.value.pool_reset();
        slot.occupied = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.in_use -= 1;
        true
    }

    fn note_stale_release(&mut self, handle: Handle) {
        self.stale_releases += 1;
        if let Some(trace) = &self.trace {
            trace.error(
                TraceContext::global(),
                "stale pool release",
                handle.index as i64,
                handle.generation as i64,
            );
        }
        let _ = self.name;
    }

    /// Current debug counters
    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            capacity: self.slots.len(),
            in_use: self.in_use,
            fallback_allocs: self.fallback_allocs,
            stale_releases: self.stale_releases,
        }
    }

    /// Arena name (for diagnostics)
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Iterate over occupied slots with their handles
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.occupied.then_some((
                Handle {
                    index: i as u32,
                    generation: slot.generation,
                },
                &slot.value,
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Probe {
        value: u32,
    }

    impl PoolReset for Probe {
        fn pool_reset(&mut self) {
            self.value = 0;
        }
    }

    #[test]
    fn test_alloc_release_roundtrip() {
        let mut arena: Arena<Probe> = Arena::new("probe", 4);
        let h = arena.alloc();
        arena.get_mut(h).unwrap().value = 42;
        assert_eq!(arena.get(h).unwrap().value, 42);

        assert!(arena.release(h));
        assert!(arena.get(h).is_none(), "stale handle must not resolve");
    }

    #[test]
    fn test_release_resets_state() {
        let mut arena: Arena<Probe> = Arena::new("probe", 1);
        let h = arena.alloc();
        arena.get_mut(h).unwrap().value = 7;
        arena.release(h);

        // Same slot comes back clean under a new generation
        let h2 = arena.alloc();
        assert_eq!(h.index(), h2.index());
        assert_eq!(arena.get(h2).unwrap().value, 0);
    }

    #[test]
    fn test_double_release_is_counted_not_fatal() {
        let mut arena: Arena<Probe> = Arena::new("probe", 2);
        let h = arena.alloc();
        assert!(arena.release(h));
        assert!(!arena.release(h));
        assert_eq!(arena.stats().stale_releases, 1);
        assert_eq!(arena.stats().in_use, 0);
    }

    #[test]
    fn test_exhaustion_falls_back_to_heap() {
        let mut arena: Arena<Probe> = Arena::new("probe", 2);
        let _a = arena.alloc();
        let _b = arena.alloc();
        let c = arena.alloc();

        let stats = arena.stats();
        assert_eq!(stats.fallback_allocs, 1);
        assert_eq!(stats.capacity, 3);
        assert!(arena.get(c).is_some());
    }

    #[test]
    fn test_pool_conservation() {
        // Balanced alloc/release sequences: allocated never exceeds initial
        // capacity plus fallbacks, in_use never goes negative.
        let mut arena: Arena<Probe> = Arena::new("probe", 8);
        let mut handles = Vec::new();

        for round in 0..50 {
            for _ in 0..(round % 8) + 1 {
                handles.push(arena.alloc());
            }
            for h in handles.drain(..) {
                assert!(arena.release(h));
            }
            let stats = arena.stats();
            assert_eq!(stats.in_use, 0);
            assert!(stats.capacity as u64 <= 8 + stats.fallback_allocs);
        }
    }
}
