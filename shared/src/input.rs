//! Packed per-player input word
//!
//! Every input that crosses the wire is a single `u32`:
//!
//! ```text
//!  31            20 19      12 11       4 3    0
//! +----------------+----------+----------+------+
//! |    reserved    |  button  |   yaw    | slot |
//! +----------------+----------+----------+------+
//! ```
//!
//! Slot values 0..=14 address a player seat; 15 marks "no slot" (spectator
//! or unassigned) and widens to [`NO_SLOT`] when read back.

use serde::{Deserialize, Serialize};

/// Widened value returned by [`FrameInput::slot`] for the 4-bit sentinel.
pub const NO_SLOT: u8 = 255;

/// Highest addressable player slot.
pub const MAX_SLOT: u8 = 14;

const SLOT_SENTINEL: u32 = 0xF;
const SLOT_SHIFT: u32 = 0;
const SLOT_MASK: u32 = 0xF;
const YAW_SHIFT: u32 = 4;
const YAW_MASK: u32 = 0xFF;
const BUTTON_SHIFT: u32 = 12;
const BUTTON_MASK: u32 = 0xFF;

/// Bits that carry data; anything above is reserved and must stay zero.
pub const USED_BITS: u32 = 0x000F_FFFF;

/// One player's input for one tick, packed into a 32-bit word.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameInput(u32);

impl FrameInput {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn new(slot: u8, yaw: u8, button: u8) -> Self {
        Self(0).with_slot(slot).with_yaw(yaw).with_button(button)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Seat index, or [`NO_SLOT`] when the sentinel is stored.
    pub const fn slot(self) -> u8 {
        let slot = (self.0 >> SLOT_SHIFT) & SLOT_MASK;
        if slot == SLOT_SENTINEL {
            NO_SLOT
        } else {
            slot as u8
        }
    }

    pub const fn yaw(self) -> u8 {
        ((self.0 >> YAW_SHIFT) & YAW_MASK) as u8
    }

    pub const fn button(self) -> u8 {
        ((self.0 >> BUTTON_SHIFT) & BUTTON_MASK) as u8
    }

    /// Any slot above [`MAX_SLOT`] is stored as the sentinel.
    pub const fn with_slot(self, slot: u8) -> Self {
        let bits = if slot > MAX_SLOT {
            SLOT_SENTINEL
        } else {
            slot as u32
        };
        Self((self.0 & !(SLOT_MASK << SLOT_SHIFT)) | (bits << SLOT_SHIFT))
    }

    pub const fn with_yaw(self, yaw: u8) -> Self {
        Self((self.0 & !(YAW_MASK << YAW_SHIFT)) | ((yaw as u32) << YAW_SHIFT))
    }

    pub const fn with_button(self, button: u8) -> Self {
        Self((self.0 & !(BUTTON_MASK << BUTTON_SHIFT)) | ((button as u32) << BUTTON_SHIFT))
    }

    #[inline]
    pub const fn is_pressed(self, mask: u8) -> bool {
        self.button() & mask != 0
    }

    /// True when no reserved bit is set.
    pub const fn is_well_formed(self) -> bool {
        self.0 & !USED_BITS == 0
    }
}

impl From<u32> for FrameInput {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl From<FrameInput> for u32 {
    fn from(input: FrameInput) -> Self {
        input.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack_is_identity() {
        for slot in 0..=MAX_SLOT {
            for yaw in (0..=255u8).step_by(17) {
                for button in (0..=255u8).step_by(15) {
                    let input = FrameInput::new(slot, yaw, button);
                    assert_eq!(input.slot(), slot);
                    assert_eq!(input.yaw(), yaw);
                    assert_eq!(input.button(), button);
                }
            }
        }
    }

    #[test]
    fn test_sentinel_widens_to_no_slot() {
        let input = FrameInput::new(15, 10, 20);
        assert_eq!(input.slot(), NO_SLOT);
        assert_eq!(input.yaw(), 10);
        assert_eq!(input.button(), 20);

        let input = FrameInput::new(NO_SLOT, 0, 0);
        assert_eq!(input.slot(), NO_SLOT);
        assert_eq!(input.raw(), 0xF);
    }

    #[test]
    fn test_setters_leave_other_fields_intact() {
        let input = FrameInput::new(3, 200, 0b1010_0101);

        let changed = input.with_yaw(7);
        assert_eq!(changed.slot(), 3);
        assert_eq!(changed.yaw(), 7);
        assert_eq!(changed.button(), 0b1010_0101);

        let changed = input.with_button(0xFF).with_slot(9);
        assert_eq!(changed.slot(), 9);
        assert_eq!(changed.yaw(), 200);
        assert_eq!(changed.button(), 0xFF);
    }

    #[test]
    fn test_setters_do_not_touch_reserved_bits() {
        let input = FrameInput::from_raw(0xABC0_0000).with_slot(1).with_yaw(2).with_button(3);
        assert_eq!(input.raw() & !USED_BITS, 0xABC0_0000);
        assert!(!input.is_well_formed());
        assert!(FrameInput::new(14, 255, 255).is_well_formed());
    }

    #[test]
    fn test_raw_word_round_trip() {
        let input = FrameInput::from(5u32);
        assert_eq!(u32::from(input), 5);
        assert_eq!(input.slot(), 5);
        assert_eq!(input.yaw(), 0);
        assert_eq!(FrameInput::default().raw(), 0);
    }

    #[test]
    fn test_is_pressed() {
        let input = FrameInput::new(0, 0, 0b0000_0110);
        assert!(input.is_pressed(0b0000_0010));
        assert!(!input.is_pressed(0b0000_0001));
    }
}
