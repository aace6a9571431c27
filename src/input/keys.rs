//! Virtual-key to scan-code translation.
//!
//! Input is injected by scan code so games that read raw keyboard state see
//! the same physical key the player pressed. Keys that share a scan code
//! with another key (right Ctrl and left Ctrl, the navigation cluster and the
//! numpad) need the extended flag, otherwise the wrong key registers.

/// A translated key: set-1 scan code plus the extended-key flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanCode {
    pub code: u16,
    pub extended: bool,
}

/// Virtual keys injected with the extended flag.
///
/// Navigation cluster, right Ctrl/Alt, and the numpad operators. Right Ctrl
/// and right Alt are VK 0xA3/0xA5. 0x1D/0x38 (and 0x9D/0xB8 on release) are
/// the Ctrl/Alt scan codes, not VKs; VK 0x38 is the '8' key.
pub const EXTENDED_KEYS: [u8; 16] = [
    0x21, // Page Up
    0x22, // Page Down
    0x23, // End
    0x24, // Home
    0x25, // Left
    0x26, // Up
    0x27, // Right
    0x28, // Down
    0x2D, // Insert
    0x2E, // Delete
    0x6A, // Numpad *
    0x6B, // Numpad +
    0x6D, // Numpad -
    0x6F, // Numpad /
    0xA3, // Right Ctrl
    0xA5, // Right Alt
];

pub fn is_extended(vk: u8) -> bool {
    EXTENDED_KEYS.contains(&vk)
}

/// Translate a virtual key code using the US layout scan code table.
///
/// Returns `None` for keys with no fixed mapping; callers may fall back to
/// asking the OS.
pub fn translate(vk: u8) -> Option<ScanCode> {
    scan_code(vk).map(|code| ScanCode {
        code,
        extended: is_extended(vk),
    })
}

fn scan_code(vk: u8) -> Option<u16> {
    let code = match vk {
        0x08 => 0x0E, // Backspace
        0x09 => 0x0F, // Tab
        0x0D => 0x1C, // Enter
        0x10 => 0x2A, // Shift
        0x11 => 0x1D, // Ctrl
        0x12 => 0x38, // Alt
        0x14 => 0x3A, // Caps Lock
        0x1B => 0x01, // Escape
        0x20 => 0x39, // Space
        0x21 => 0x49,
        0x22 => 0x51,
        0x23 => 0x4F,
        0x24 => 0x47,
        0x25 => 0x4B,
        0x26 => 0x48,
        0x27 => 0x4D,
        0x28 => 0x50,
        0x2D => 0x52,
        0x2E => 0x53,
        // '0' sits after '9' on the top row.
        0x30 => 0x0B,
        0x31..=0x39 => 0x02 + (vk - 0x31) as u16,
        0x41 => 0x1E, // A
        0x42 => 0x30,
        0x43 => 0x2E,
        0x44 => 0x20,
        0x45 => 0x12,
        0x46 => 0x21,
        0x47 => 0x22,
        0x48 => 0x23,
        0x49 => 0x17,
        0x4A => 0x24,
        0x4B => 0x25,
        0x4C => 0x26,
        0x4D => 0x32,
        0x4E => 0x31,
        0x4F => 0x18,
        0x50 => 0x19,
        0x51 => 0x10,
        0x52 => 0x13,
        0x53 => 0x1F,
        0x54 => 0x14,
        0x55 => 0x16,
        0x56 => 0x2F,
        0x57 => 0x11,
        0x58 => 0x2D,
        0x59 => 0x15,
        0x5A => 0x2C, // Z
        0x60 => 0x52, // Numpad 0
        0x61 => 0x4F,
        0x62 => 0x50,
        0x63 => 0x51,
        0x64 => 0x4B,
        0x65 => 0x4C,
        0x66 => 0x4D,
        0x67 => 0x47,
        0x68 => 0x48,
        0x69 => 0x49, // Numpad 9
        0x6A => 0x37,
        0x6B => 0x4E,
        0x6D => 0x4A,
        0x6E => 0x53,
        0x6F => 0x35,
        0x70..=0x79 => 0x3B + (vk - 0x70) as u16, // F1-F10
        0x7A => 0x57,                            // F11
        0x7B => 0x58,                            // F12
        0x90 => 0x45,                            // Num Lock
        0x91 => 0x46,                            // Scroll Lock
        0xA0 => 0x2A,
        0xA1 => 0x36,
        0xA2 => 0x1D,
        0xA3 => 0x1D,
        0xA4 => 0x38,
        0xA5 => 0x38,
        0xBA => 0x27, // ;
        0xBB => 0x0D, // =
        0xBC => 0x33, // ,
        0xBD => 0x0C, // -
        0xBE => 0x34, // .
        0xBF => 0x35, // /
        0xC0 => 0x29, // `
        0xDB => 0x1A, // [
        0xDC => 0x2B, // \
        0xDD => 0x1B, // ]
        0xDE => 0x28, // '
        _ => return None,
    };
    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrows_are_extended() {
        for vk in 0x25..=0x28 {
            assert!(translate(vk).unwrap().extended, "vk {vk:#x}");
        }
    }

    #[test]
    fn right_and_left_ctrl_share_scan_code() {
        let left = translate(0xA2).unwrap();
        let right = translate(0xA3).unwrap();
        assert_eq!(left.code, right.code);
        assert!(!left.extended);
        assert!(right.extended);
    }

    #[test]
    fn navigation_cluster_distinct_from_numpad_by_flag() {
        // Home and Numpad 7 share 0x47
        let home = translate(0x24).unwrap();
        let np7 = translate(0x67).unwrap();
        assert_eq!(home.code, np7.code);
        assert!(home.extended);
        assert!(!np7.extended);
    }

    #[test]
    fn digit_eight_is_not_extended() {
        // 0x38 is Alt's scan code but '8' as a virtual key.
        assert!(!is_extended(0x38));
        assert!(!translate(0x38).unwrap().extended);
        assert!(is_extended(0xA5));
    }

    #[test]
    fn top_row_digits() {
        assert_eq!(translate(0x31).unwrap().code, 0x02);
        assert_eq!(translate(0x39).unwrap().code, 0x0A);
        assert_eq!(translate(0x30).unwrap().code, 0x0B);
    }

    #[test]
    fn function_keys() {
        assert_eq!(translate(0x70).unwrap().code, 0x3B);
        assert_eq!(translate(0x79).unwrap().code, 0x44);
        assert_eq!(translate(0x7B).unwrap().code, 0x58);
    }

    #[test]
    fn letters_are_not_extended() {
        for vk in 0x41..=0x5A {
            let sc = translate(vk).unwrap();
            assert!(!sc.extended);
        }
    }

    #[test]
    fn unmapped_key() {
        assert_eq!(translate(0x07), None);
        assert_eq!(translate(0xFF), None);
    }
}
