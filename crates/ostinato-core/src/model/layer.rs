//! Layers - one record or play pass over the loop
//!
//! The control core doesn't own sample data (the DSP side does); a layer
//! here is the structural record the scheduler needs: which span of the
//! loop it covers, how many cycles it holds, and the feedback level applied
//! when it was built. Layers are recycled through an arena because every
//! overdub pass retires one and starts another.

use crate::pool::PoolReset;
use crate::types::Frame;

/// Structural description of one recorded pass
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    /// Frame within the loop where this layer's content begins
    pub start_frame: Frame,
    /// Length of the layer in frames (0 while still recording)
    pub frames: Frame,
    /// Cycles contained (grows during multiply/insert)
    pub cycles: u32,
    /// Feedback level applied to the prior layer when this one was recorded
    pub feedback: f32,
    /// Marked as a structural checkpoint (undo boundary)
    pub checkpoint: bool,
}

impl Default for Layer {
    fn default() -> Self {
        Self {
            start_frame: 0,
            frames: 0,
            cycles: 1,
            feedback: 1.0,
            checkpoint: false,
        }
    }
}

impl PoolReset for Layer {
    fn pool_reset(&mut self) {
        *self = Self::default();
    }
}

impl Layer {
    /// Begin a recording pass at the given frame
    pub fn begin(&mut self, start_frame: Frame) {
        self.start_frame = start_frame;
        self.frames = 0;
        self.cycles = 1;
    }

    /// Close the pass at the given length
    pub fn finish(&mut self, frames: Frame, cycles: u32) {
        self.frames = frames;
        self.cycles = cycles.max(1);
    }
}
