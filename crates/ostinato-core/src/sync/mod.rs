//! Transport synchronization
//!
//! Turns the host's per-block transport description into discrete sync
//! pulses, measures drift between loops and the pulse train, and applies
//! the pulses to each track's pending events.

mod drift;
mod host;
mod synchronizer;

pub use drift::*;
pub use host::*;
pub use synchronizer::*;
