//! Loop data model
//!
//! The per-track state the scheduler mutates: major/minor modes, layers,
//! the loop cursors and lengths, and the lock-free atomics mirror the UI
//! reads without touching the audio thread's data.

mod layer;
mod loop_state;
mod mode;
mod track;

pub use layer::*;
pub use loop_state::*;
pub use mode::*;
pub use track::*;
