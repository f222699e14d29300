//! Ostinato Core - real-time control core for the live looper
//!
//! This crate decides, sample-block by sample-block, what each loop is doing
//! (recording, overdubbing, multiplying, muted...), schedules mode transitions
//! at musically meaningful boundaries, and keeps loop timing locked to an
//! external transport despite clock jitter and drift. Audio I/O, DSP and the
//! UI are external collaborators.

pub mod config;
pub mod engine;
pub mod event;
pub mod function;
pub mod kernel;
pub mod model;
pub mod pool;
pub mod script;
pub mod sync;
pub mod trace;
pub mod types;

pub use types::*;
