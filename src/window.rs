//! Locating and focusing the game's top-level window.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WindowError {
    #[error("no window appeared for pid {pid} within {timeout:?}")]
    NotFound { pid: u32, timeout: Duration },

    #[error("failed to focus window {0:?}")]
    Focus(WindowHandle),
}

/// Opaque OS window handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub isize);

pub trait WindowLocator: Send + Sync {
    fn find_top_level_window(&self, pid: u32) -> Option<WindowHandle>;

    fn bring_to_foreground(&self, window: WindowHandle) -> Result<(), WindowError>;
}

/// Poll for `pid`'s window every `interval` until `timeout` elapses.
pub async fn wait_for_window(
    locator: &dyn WindowLocator,
    pid: u32,
    timeout: Duration,
    interval: Duration,
) -> Result<WindowHandle, WindowError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(window) = locator.find_top_level_window(pid) {
            return Ok(window);
        }
        if tokio::time::Instant::now() + interval > deadline {
            return Err(WindowError::NotFound { pid, timeout });
        }
        tokio::time::sleep(interval).await;
    }
}

/// Locator for hosts without a window system: the process id stands in for
/// its window so the rest of the pipeline can run headless.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessLocator;

impl WindowLocator for HeadlessLocator {
    fn find_top_level_window(&self, pid: u32) -> Option<WindowHandle> {
        Some(WindowHandle(pid as isize))
    }

    fn bring_to_foreground(&self, _window: WindowHandle) -> Result<(), WindowError> {
        Ok(())
    }
}

pub fn platform_locator() -> Box<dyn WindowLocator> {
    #[cfg(windows)]
    {
        Box::new(win::Win32Locator)
    }
    #[cfg(not(windows))]
    {
        Box::new(HeadlessLocator)
    }
}

#[cfg(windows)]
pub use win::Win32Locator;

#[cfg(windows)]
mod win {
    use windows::core::BOOL;
    use windows::Win32::Foundation::{HWND, LPARAM};
    use windows::Win32::UI::WindowsAndMessaging::{
        EnumWindows, GetWindowThreadProcessId, IsWindowVisible, SetForegroundWindow,
    };

    use super::{WindowError, WindowHandle, WindowLocator};

    /// Finds visible top-level windows via `EnumWindows`.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct Win32Locator;

    struct Search {
        pid: u32,
        found: Option<HWND>,
    }

    unsafe extern "system" fn visit(hwnd: HWND, lparam: LPARAM) -> BOOL {
        // SAFETY: lparam is the `Search` passed to EnumWindows below, alive
        // for the whole enumeration.
        let search = unsafe { &mut *(lparam.0 as *mut Search) };
        let mut owner = 0u32;
        unsafe { GetWindowThreadProcessId(hwnd, Some(&mut owner)) };
        if owner == search.pid && unsafe { IsWindowVisible(hwnd) }.as_bool() {
            search.found = Some(hwnd);
            return BOOL(0);
        }
        BOOL(1)
    }

    impl WindowLocator for Win32Locator {
        fn find_top_level_window(&self, pid: u32) -> Option<WindowHandle> {
            let mut search = Search { pid, found: None };
            // Stopping early makes EnumWindows report an error; only the
            // search result matters.
            let _ = unsafe { EnumWindows(Some(visit), LPARAM(&mut search as *mut Search as isize)) };
            search.found.map(|hwnd| WindowHandle(hwnd.0 as isize))
        }

        fn bring_to_foreground(&self, window: WindowHandle) -> Result<(), WindowError> {
            let ok = unsafe { SetForegroundWindow(HWND(window.0 as *mut _)) };
            if ok.as_bool() {
                Ok(())
            } else {
                Err(WindowError::Focus(window))
            }
        }
    }
}
