//! Event scheduling
//!
//! Per-track queues of pending actions tied to audio-frame positions.
//! Events live in a generation-checked arena owned by the queue; ordering
//! and parent/child stacking are plain index links with no ownership
//! implied, so a canceled stack can never leave a dangling reference.

mod event;
mod queue;
mod schedule;

pub use event::*;
pub use queue::*;
pub use schedule::*;
