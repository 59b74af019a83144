//! Fixed-capacity store of confirmed frames
//!
//! Slots are addressed by `frame mod capacity` and only ever hold frames the
//! authority has committed. Reads past the authority frame are answered by
//! synthesizing a fresh frame from the latest confirmed input vector
//! (hold-last-input), never by handing out the stored entry.

use crate::frame::{FrameData, FrameIndex, NOT_STARTED};
use std::borrow::Cow;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RingError {
    #[error("commit out of order: expected frame {expected}, got {got}")]
    OutOfOrder {
        expected: FrameIndex,
        got: FrameIndex,
    },

    #[error("frame {frame} has {got} inputs, ring expects {expected}")]
    WidthMismatch {
        frame: FrameIndex,
        expected: usize,
        got: usize,
    },

    #[error("frame {frame} was overwritten (authority {authority}, capacity {capacity})")]
    Overrun {
        frame: FrameIndex,
        authority: FrameIndex,
        capacity: usize,
    },
}

#[derive(Debug, Clone)]
pub struct FrameRing {
    slots: Vec<Option<FrameData>>,
    width: usize,
    authority_frame: FrameIndex,
}

impl FrameRing {
    /// `capacity` must be non-zero; `width` is the number of seats per frame.
    pub fn new(capacity: usize, width: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: vec![None; capacity],
            width,
            authority_frame: NOT_STARTED,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn authority_frame(&self) -> FrameIndex {
        self.authority_frame
    }

    fn slot_index(&self, frame: FrameIndex) -> usize {
        frame.rem_euclid(self.slots.len() as FrameIndex) as usize
    }

    fn stored(&self, frame: FrameIndex) -> Option<&FrameData> {
        if frame < 0 {
            return None;
        }
        self.slots[self.slot_index(frame)]
            .as_ref()
            .filter(|data| data.frame == frame)
    }

    /// Confirmed entry for `frame`, or `None` if the authority has not reached it.
    pub fn try_get_confirmed(&self, frame: FrameIndex) -> Option<&FrameData> {
        if frame > self.authority_frame {
            return None;
        }
        self.stored(frame)
    }

    /// Borrowed confirmed entry for `frame <= authority`, otherwise an owned
    /// frame carrying the latest confirmed inputs retagged with `frame`.
    pub fn get_or_synthesize(&self, frame: FrameIndex) -> Result<Cow<'_, FrameData>, RingError> {
        if frame <= self.authority_frame {
            return self.stored(frame).map(Cow::Borrowed).ok_or(RingError::Overrun {
                frame,
                authority: self.authority_frame,
                capacity: self.capacity(),
            });
        }

        let synthesized = match self.stored(self.authority_frame) {
            Some(latest) => latest.retagged(frame),
            None => FrameData::empty(frame, self.width),
        };
        Ok(Cow::Owned(synthesized))
    }

    /// Stores `data` and advances the authority frame to it.
    pub fn commit(&mut self, data: FrameData) -> Result<(), RingError> {
        let expected = self.authority_frame + 1;
        if data.frame != expected {
            return Err(RingError::OutOfOrder {
                expected,
                got: data.frame,
            });
        }
        if data.width() != self.width {
            return Err(RingError::WidthMismatch {
                frame: data.frame,
                expected: self.width,
                got: data.width(),
            });
        }

        let index = self.slot_index(data.frame);
        self.authority_frame = data.frame;
        self.slots[index] = Some(data);
        Ok(())
    }

    /// Confirmed frames from `from` up to the authority frame still held by the ring.
    pub fn confirmed_since(&self, from: FrameIndex) -> Vec<FrameData> {
        let oldest = (self.authority_frame - self.capacity() as FrameIndex + 1).max(0);
        (from.max(oldest)..=self.authority_frame)
            .filter_map(|frame| self.stored(frame).cloned())
            .collect()
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.authority_frame = NOT_STARTED;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::FrameInput;

    fn frame(index: FrameIndex, words: &[u32]) -> FrameData {
        FrameData::from_raw(index, words)
    }

    #[test]
    fn test_empty_ring_synthesizes_zeroes() {
        let ring = FrameRing::new(8, 2);
        assert_eq!(ring.authority_frame(), NOT_STARTED);

        let synthesized = ring.get_or_synthesize(0).unwrap();
        assert!(matches!(synthesized, Cow::Owned(_)));
        assert_eq!(*synthesized, FrameData::empty(0, 2));
    }

    #[test]
    fn test_commit_advances_authority() {
        let mut ring = FrameRing::new(8, 2);
        ring.commit(frame(0, &[1, 2])).unwrap();
        ring.commit(frame(1, &[3, 4])).unwrap();

        assert_eq!(ring.authority_frame(), 1);
        assert_eq!(ring.try_get_confirmed(0), Some(&frame(0, &[1, 2])));
        assert_eq!(ring.try_get_confirmed(1), Some(&frame(1, &[3, 4])));
        assert_eq!(ring.try_get_confirmed(2), None);
    }

    #[test]
    fn test_get_confirmed_returns_stored_entry() {
        let mut ring = FrameRing::new(8, 2);
        ring.commit(frame(0, &[1, 2])).unwrap();

        let stored = ring.get_or_synthesize(0).unwrap();
        match stored {
            Cow::Borrowed(data) => {
                assert!(std::ptr::eq(data, ring.try_get_confirmed(0).unwrap()));
            }
            Cow::Owned(_) => panic!("confirmed frame should be borrowed"),
        }
    }

    #[test]
    fn test_synthesized_frame_is_not_aliased() {
        let mut ring = FrameRing::new(8, 2);
        ring.commit(frame(0, &[1, 2])).unwrap();

        let mut synthesized = ring.get_or_synthesize(5).unwrap().into_owned();
        assert_eq!(synthesized.frame, 5);
        assert_eq!(synthesized.raw_words(), vec![1, 2]);

        synthesized.set_input(0, FrameInput::from_raw(99));
        assert_eq!(ring.try_get_confirmed(0), Some(&frame(0, &[1, 2])));
    }

    #[test]
    fn test_out_of_order_commit_is_rejected() {
        let mut ring = FrameRing::new(8, 1);
        ring.commit(frame(0, &[1])).unwrap();
        let err = ring.commit(frame(2, &[1])).unwrap_err();
        assert_eq!(err, RingError::OutOfOrder { expected: 1, got: 2 });
        assert_eq!(ring.authority_frame(), 0);
    }

    #[test]
    fn test_width_mismatch_is_rejected() {
        let mut ring = FrameRing::new(8, 2);
        let err = ring.commit(frame(0, &[1])).unwrap_err();
        assert!(matches!(err, RingError::WidthMismatch { expected: 2, got: 1, .. }));
    }

    #[test]
    fn test_overwritten_frame_reports_overrun() {
        let mut ring = FrameRing::new(4, 1);
        for i in 0..6 {
            ring.commit(frame(i, &[i as u32])).unwrap();
        }

        assert_eq!(ring.try_get_confirmed(1), None);
        let err = ring.get_or_synthesize(1).unwrap_err();
        assert_eq!(
            err,
            RingError::Overrun {
                frame: 1,
                authority: 5,
                capacity: 4
            }
        );
        assert_eq!(ring.try_get_confirmed(5), Some(&frame(5, &[5])));
    }

    #[test]
    fn test_confirmed_since_is_bounded_by_capacity() {
        let mut ring = FrameRing::new(4, 1);
        for i in 0..6 {
            ring.commit(frame(i, &[i as u32])).unwrap();
        }
        let frames: Vec<FrameIndex> = ring.confirmed_since(0).iter().map(|f| f.frame).collect();
        assert_eq!(frames, vec![2, 3, 4, 5]);

        let frames: Vec<FrameIndex> = ring.confirmed_since(4).iter().map(|f| f.frame).collect();
        assert_eq!(frames, vec![4, 5]);
        assert!(ring.confirmed_since(6).is_empty());
    }

    #[test]
    fn test_clear_resets_authority() {
        let mut ring = FrameRing::new(4, 1);
        ring.commit(frame(0, &[1])).unwrap();
        ring.clear();
        assert_eq!(ring.authority_frame(), NOT_STARTED);
        assert_eq!(ring.try_get_confirmed(0), None);
        ring.commit(frame(0, &[2])).unwrap();
    }
}
