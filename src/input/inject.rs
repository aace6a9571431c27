//! OS input injection.

use thiserror::Error;

use super::frame::MouseButton;

/// Wheel units per notch on the reference platform.
pub const WHEEL_DELTA: i32 = 120;

#[derive(Error, Debug)]
pub enum InjectError {
    #[error("input was not accepted by the OS (sent {sent} of {expected} events)")]
    Rejected { sent: u32, expected: u32 },

    #[error("no scan code mapping for virtual key {0:#04x}")]
    UnmappedKey(u8),
}

/// Capability for pushing synthetic input into the OS.
pub trait InputInjector: Send + Sync {
    fn inject_key(&self, vk: u8, down: bool) -> Result<(), InjectError>;

    fn inject_mouse_move(&self, dx: i32, dy: i32) -> Result<(), InjectError>;

    fn inject_mouse_button(&self, button: MouseButton, down: bool) -> Result<(), InjectError>;

    /// `delta` is already scaled to platform wheel units.
    fn inject_wheel(&self, delta: i32) -> Result<(), InjectError>;
}

/// Injector for hosts without an input backend; every event is traced.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingInjector;

impl InputInjector for TracingInjector {
    fn inject_key(&self, vk: u8, down: bool) -> Result<(), InjectError> {
        let scan = super::keys::translate(vk);
        tracing::trace!(vk, down, ?scan, "key");
        Ok(())
    }

    fn inject_mouse_move(&self, dx: i32, dy: i32) -> Result<(), InjectError> {
        tracing::trace!(dx, dy, "mouse move");
        Ok(())
    }

    fn inject_mouse_button(&self, button: MouseButton, down: bool) -> Result<(), InjectError> {
        tracing::trace!(?button, down, "mouse button");
        Ok(())
    }

    fn inject_wheel(&self, delta: i32) -> Result<(), InjectError> {
        tracing::trace!(delta, "wheel");
        Ok(())
    }
}

/// The injector for the current platform.
pub fn platform_injector() -> Box<dyn InputInjector> {
    #[cfg(windows)]
    {
        Box::new(win::SendInputInjector)
    }
    #[cfg(not(windows))]
    {
        Box::new(TracingInjector)
    }
}

#[cfg(windows)]
pub use win::SendInputInjector;

#[cfg(windows)]
mod win {
    use windows::Win32::UI::Input::KeyboardAndMouse::{
        MapVirtualKeyW, SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, INPUT_MOUSE, KEYBDINPUT,
        KEYBD_EVENT_FLAGS, KEYEVENTF_EXTENDEDKEY, KEYEVENTF_KEYUP, KEYEVENTF_SCANCODE,
        MAPVK_VK_TO_VSC, MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP, MOUSEEVENTF_MIDDLEDOWN,
        MOUSEEVENTF_MIDDLEUP, MOUSEEVENTF_MOVE, MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP,
        MOUSEEVENTF_WHEEL, MOUSEINPUT, MOUSE_EVENT_FLAGS, VIRTUAL_KEY,
    };

    use super::{InjectError, InputInjector};
    use crate::input::frame::MouseButton;
    use crate::input::keys::{self, ScanCode};

    /// Injects input with `SendInput`, keyboard events by scan code.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct SendInputInjector;

    fn send(input: INPUT) -> Result<(), InjectError> {
        // SAFETY: `input` is a fully initialised INPUT and the size matches.
        let sent = unsafe { SendInput(&[input], std::mem::size_of::<INPUT>() as i32) };
        if sent == 1 {
            Ok(())
        } else {
            Err(InjectError::Rejected { sent, expected: 1 })
        }
    }

    fn mouse(dx: i32, dy: i32, data: i32, flags: MOUSE_EVENT_FLAGS) -> Result<(), InjectError> {
        send(INPUT {
            r#type: INPUT_MOUSE,
            Anonymous: INPUT_0 {
                mi: MOUSEINPUT {
                    dx,
                    dy,
                    mouseData: data,
                    dwFlags: flags,
                    time: 0,
                    dwExtraInfo: 0,
                },
            },
        })
    }

    fn resolve(vk: u8) -> Result<ScanCode, InjectError> {
        if let Some(sc) = keys::translate(vk) {
            return Ok(sc);
        }
        // SAFETY: plain lookup, no pointers involved.
        let code = unsafe { MapVirtualKeyW(vk as u32, MAPVK_VK_TO_VSC) };
        if code == 0 {
            return Err(InjectError::UnmappedKey(vk));
        }
        Ok(ScanCode {
            code: code as u16,
            extended: keys::is_extended(vk),
        })
    }

    impl InputInjector for SendInputInjector {
        fn inject_key(&self, vk: u8, down: bool) -> Result<(), InjectError> {
            let sc = resolve(vk)?;
            let mut flags: KEYBD_EVENT_FLAGS = KEYEVENTF_SCANCODE;
            if !down {
                flags |= KEYEVENTF_KEYUP;
            }
            if sc.extended {
                flags |= KEYEVENTF_EXTENDEDKEY;
            }
            send(INPUT {
                r#type: INPUT_KEYBOARD,
                Anonymous: INPUT_0 {
                    ki: KEYBDINPUT {
                        wVk: VIRTUAL_KEY(0),
                        wScan: sc.code,
                        dwFlags: flags,
                        time: 0,
                        dwExtraInfo: 0,
                    },
                },
            })
        }

        fn inject_mouse_move(&self, dx: i32, dy: i32) -> Result<(), InjectError> {
            mouse(dx, dy, 0, MOUSEEVENTF_MOVE)
        }

        fn inject_mouse_button(&self, button: MouseButton, down: bool) -> Result<(), InjectError> {
            let flags = match (button, down) {
                (MouseButton::Left, true) => MOUSEEVENTF_LEFTDOWN,
                (MouseButton::Left, false) => MOUSEEVENTF_LEFTUP,
                (MouseButton::Right, true) => MOUSEEVENTF_RIGHTDOWN,
                (MouseButton::Right, false) => MOUSEEVENTF_RIGHTUP,
                (MouseButton::Middle, true) => MOUSEEVENTF_MIDDLEDOWN,
                (MouseButton::Middle, false) => MOUSEEVENTF_MIDDLEUP,
            };
            mouse(0, 0, 0, flags)
        }

        fn inject_wheel(&self, delta: i32) -> Result<(), InjectError> {
            mouse(0, 0, delta, MOUSEEVENTF_WHEEL)
        }
    }
}
