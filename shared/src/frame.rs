//! One tick's worth of inputs for every seat in a match

use crate::input::FrameInput;
use serde::{Deserialize, Serialize};

/// Tick index. `-1` means "nothing committed yet".
pub type FrameIndex = i64;

/// Sentinel for a counter that has not started.
pub const NOT_STARTED: FrameIndex = -1;

/// Confirmed or speculative inputs for a single tick.
///
/// Equality is deep value equality over the whole vector; comparing a
/// predicted frame with its confirmed counterpart decides whether a
/// rollback is needed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameData {
    pub frame: FrameIndex,
    pub inputs: Vec<FrameInput>,
}

impl FrameData {
    /// A frame of `width` zeroed inputs.
    pub fn empty(frame: FrameIndex, width: usize) -> Self {
        Self {
            frame,
            inputs: vec![FrameInput::default(); width],
        }
    }

    pub fn from_raw(frame: FrameIndex, words: &[u32]) -> Self {
        Self {
            frame,
            inputs: words.iter().copied().map(FrameInput::from_raw).collect(),
        }
    }

    pub fn width(&self) -> usize {
        self.inputs.len()
    }

    /// Copy of this frame's inputs retagged with another index.
    pub fn retagged(&self, frame: FrameIndex) -> Self {
        Self {
            frame,
            inputs: self.inputs.clone(),
        }
    }

    pub fn input(&self, slot: usize) -> Option<FrameInput> {
        self.inputs.get(slot).copied()
    }

    /// Replaces the word at `slot`; out-of-range slots are ignored.
    pub fn set_input(&mut self, slot: usize, input: FrameInput) {
        if let Some(word) = self.inputs.get_mut(slot) {
            *word = input;
        }
    }

    pub fn raw_words(&self) -> Vec<u32> {
        self.inputs.iter().map(|input| input.raw()).collect()
    }
}
