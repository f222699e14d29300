//! The real-time engine surface
//!
//! [`LoopKernel`] is the object an embedding host drives from its audio
//! callback; [`LooperCommand`] is how everything outside that callback
//! talks to it.

mod command;
mod kernel;

pub use command::*;
pub use kernel::*;
