//! Fixed-size binary input frames.
//!
//! Every frame sent by a remote player is exactly [`FRAME_LEN`] bytes,
//! little-endian:
//!
//! | Offset | Size | Field                                          |
//! |--------|------|------------------------------------------------|
//! | 0      | 32   | keyboard bitmap, bit `i` of byte `i >> 3` = vk |
//! | 32     | 4    | mouse button mask (left, right, middle)        |
//! | 36     | 4    | mouse delta-x (signed)                         |
//! | 40     | 4    | mouse delta-y (signed)                         |
//! | 44     | 4    | wheel delta in notches (signed)                |
//! | 48     | 8    | sender timestamp, ms since the epoch           |

use thiserror::Error;

/// Length of one encoded input frame.
pub const FRAME_LEN: usize = 56;

/// Length of the keyboard bitmap at the start of a frame.
pub const KEY_BITMAP_LEN: usize = 32;

const WORDS: usize = KEY_BITMAP_LEN / 8;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("input frame must be {FRAME_LEN} bytes, got {0}")]
    BadLength(usize),
}

/// Pressed/released state of all 256 virtual keys.
///
/// Stored as four little-endian words so diffs are computed a word at a
/// time instead of a bit at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyBitmap {
    words: [u64; WORDS],
}

impl KeyBitmap {
    pub const EMPTY: KeyBitmap = KeyBitmap { words: [0; WORDS] };

    pub fn from_bytes(bytes: &[u8; KEY_BITMAP_LEN]) -> Self {
        let mut words = [0u64; WORDS];
        for (i, word) in words.iter_mut().enumerate() {
            let mut chunk = [0u8; 8];
            chunk.copy_from_slice(&bytes[i * 8..i * 8 + 8]);
            *word = u64::from_le_bytes(chunk);
        }
        Self { words }
    }

    pub fn to_bytes(&self) -> [u8; KEY_BITMAP_LEN] {
        let mut out = [0u8; KEY_BITMAP_LEN];
        for (i, word) in self.words.iter().enumerate() {
            out[i * 8..i * 8 + 8].copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    pub fn is_down(&self, vk: u8) -> bool {
        let vk = vk as usize;
        self.words[vk >> 6] & (1u64 << (vk & 63)) != 0
    }

    pub fn set(&mut self, vk: u8, down: bool) {
        let vk = vk as usize;
        let bit = 1u64 << (vk & 63);
        if down {
            self.words[vk >> 6] |= bit;
        } else {
            self.words[vk >> 6] &= !bit;
        }
    }

    /// Number of keys currently held.
    pub fn count_down(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    /// Keys whose state differs between `self` and `next`, in ascending
    /// virtual-key order.
    pub fn changes<'a>(&self, next: &'a KeyBitmap) -> KeyChanges<'a> {
        let mut diff = [0u64; WORDS];
        for (i, d) in diff.iter_mut().enumerate() {
            *d = self.words[i] ^ next.words[i];
        }
        KeyChanges {
            diff,
            word: 0,
            next,
        }
    }
}

/// A single key transition produced by [`KeyBitmap::changes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyChange {
    pub vk: u8,
    pub down: bool,
}

/// Iterator over changed keys; walks set bits of the XOR lowest first.
pub struct KeyChanges<'a> {
    diff: [u64; WORDS],
    word: usize,
    next: &'a KeyBitmap,
}

impl Iterator for KeyChanges<'_> {
    type Item = KeyChange;

    fn next(&mut self) -> Option<KeyChange> {
        while self.word < WORDS {
            let bits = self.diff[self.word];
            if bits == 0 {
                self.word += 1;
                continue;
            }
            let bit = bits.trailing_zeros() as usize;
            // Clear the lowest set bit.
            self.diff[self.word] = bits & (bits - 1);
            let vk = (self.word * 64 + bit) as u8;
            return Some(KeyChange {
                vk,
                down: self.next.is_down(vk),
            });
        }
        None
    }
}

/// Mouse buttons carried in the frame's button mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    pub const ALL: [MouseButton; 3] = [MouseButton::Left, MouseButton::Right, MouseButton::Middle];

    pub fn mask(self) -> u32 {
        match self {
            MouseButton::Left => 0b001,
            MouseButton::Right => 0b010,
            MouseButton::Middle => 0b100,
        }
    }
}

/// One decoded input frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputFrame {
    pub keys: KeyBitmap,
    pub buttons: u32,
    pub dx: i32,
    pub dy: i32,
    pub wheel: i32,
    pub timestamp_ms: u64,
}

impl InputFrame {
    /// A frame with every key and button up and no motion.
    pub fn released(timestamp_ms: u64) -> Self {
        Self {
            keys: KeyBitmap::EMPTY,
            buttons: 0,
            dx: 0,
            dy: 0,
            wheel: 0,
            timestamp_ms,
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self, FrameError> {
        let data: &[u8; FRAME_LEN] = data
            .try_into()
            .map_err(|_| FrameError::BadLength(data.len()))?;

        let mut keys = [0u8; KEY_BITMAP_LEN];
        keys.copy_from_slice(&data[..KEY_BITMAP_LEN]);

        Ok(Self {
            keys: KeyBitmap::from_bytes(&keys),
            buttons: read_u32(data, 32),
            dx: read_u32(data, 36) as i32,
            dy: read_u32(data, 40) as i32,
            wheel: read_u32(data, 44) as i32,
            timestamp_ms: u64::from_le_bytes([
                data[48], data[49], data[50], data[51], data[52], data[53], data[54], data[55],
            ]),
        })
    }

    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut out = [0u8; FRAME_LEN];
        out[..KEY_BITMAP_LEN].copy_from_slice(&self.keys.to_bytes());
        out[32..36].copy_from_slice(&self.buttons.to_le_bytes());
        out[36..40].copy_from_slice(&self.dx.to_le_bytes());
        out[40..44].copy_from_slice(&self.dy.to_le_bytes());
        out[44..48].copy_from_slice(&self.wheel.to_le_bytes());
        out[48..56].copy_from_slice(&self.timestamp_ms.to_le_bytes());
        out
    }
}

fn read_u32(data: &[u8; FRAME_LEN], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bitmap(keys: &[u8]) -> KeyBitmap {
        let mut b = KeyBitmap::EMPTY;
        for &k in keys {
            b.set(k, true);
        }
        b
    }

    #[test]
    fn bitmap_bit_layout_matches_wire() {
        let mut bytes = [0u8; KEY_BITMAP_LEN];
        // vk 0x41 ('A') lives in byte 8, bit 1
        bytes[0x41 >> 3] |= 1 << (0x41 & 7);
        let b = KeyBitmap::from_bytes(&bytes);
        assert!(b.is_down(0x41));
        assert_eq!(b.count_down(), 1);
        assert_eq!(b.to_bytes(), bytes);
    }

    #[test]
    fn changes_are_ascending_and_tagged() {
        let prev = bitmap(&[0x10, 0x41, 0xFF]);
        let next = bitmap(&[0x41, 0x42, 0x90]);
        let changes: Vec<_> = prev.changes(&next).collect();
        assert_eq!(
            changes,
            vec![
                KeyChange { vk: 0x10, down: false },
                KeyChange { vk: 0x42, down: true },
                KeyChange { vk: 0x90, down: true },
                KeyChange { vk: 0xFF, down: false },
            ]
        );
    }

    #[test]
    fn no_changes_for_identical_bitmaps() {
        let b = bitmap(&[1, 2, 3, 200]);
        assert_eq!(b.changes(&b).count(), 0);
    }

    #[test]
    fn parse_rejects_wrong_length() {
        assert_eq!(InputFrame::parse(&[0u8; 55]), Err(FrameError::BadLength(55)));
        assert_eq!(InputFrame::parse(&[0u8; 57]), Err(FrameError::BadLength(57)));
        assert_eq!(InputFrame::parse(&[]), Err(FrameError::BadLength(0)));
    }

    #[test]
    fn parse_reads_signed_fields() {
        let mut raw = [0u8; FRAME_LEN];
        raw[32..36].copy_from_slice(&0b101u32.to_le_bytes());
        raw[36..40].copy_from_slice(&(-7i32).to_le_bytes());
        raw[40..44].copy_from_slice(&12i32.to_le_bytes());
        raw[44..48].copy_from_slice(&(-2i32).to_le_bytes());
        raw[48..56].copy_from_slice(&1_700_000_000_123u64.to_le_bytes());

        let frame = InputFrame::parse(&raw).unwrap();
        assert_eq!(frame.buttons, 0b101);
        assert_eq!(frame.dx, -7);
        assert_eq!(frame.dy, 12);
        assert_eq!(frame.wheel, -2);
        assert_eq!(frame.timestamp_ms, 1_700_000_000_123);
        assert_eq!(frame.keys, KeyBitmap::EMPTY);
        assert_eq!(frame.encode(), raw);
    }
}
