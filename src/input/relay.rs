//! Replays decoded input frames into the OS as key, button, move and wheel events.

use std::time::{SystemTime, UNIX_EPOCH};

use super::frame::{FrameError, InputFrame, KeyBitmap, MouseButton};
use super::inject::{InputInjector, WHEEL_DELTA};

/// Input older than this is reported, never dropped.
pub const DEFAULT_LATENCY_WARN_MS: u64 = 100;

/// Replays remote input frames into the OS as a minimal event sequence.
///
/// Only the previous keyboard bitmap and button mask are retained; each
/// frame is diffed against them so unchanged keys produce no events.
#[derive(Debug)]
pub struct InputRelay {
    prev_keys: KeyBitmap,
    prev_buttons: u32,
    latency_warn_ms: u64,
}

impl Default for InputRelay {
    fn default() -> Self {
        Self::new(DEFAULT_LATENCY_WARN_MS)
    }
}

impl InputRelay {
    pub fn new(latency_warn_ms: u64) -> Self {
        Self {
            prev_keys: KeyBitmap::EMPTY,
            prev_buttons: 0,
            latency_warn_ms,
        }
    }

    pub fn held_keys(&self) -> &KeyBitmap {
        &self.prev_keys
    }

    pub fn held_buttons(&self) -> u32 {
        self.prev_buttons
    }

    /// Decode and apply one binary message. Malformed frames are dropped
    /// without touching the retained state.
    pub fn handle_bytes(
        &mut self,
        data: &[u8],
        injector: &dyn InputInjector,
    ) -> Result<usize, FrameError> {
        let frame = InputFrame::parse(data).inspect_err(|e| {
            tracing::warn!(error = %e, "dropping malformed input frame");
        })?;
        Ok(self.apply_at(&frame, injector, now_ms()))
    }

    pub fn apply(&mut self, frame: &InputFrame, injector: &dyn InputInjector) -> usize {
        self.apply_at(frame, injector, now_ms())
    }

    /// Apply `frame` as if received at `now_ms`. Returns the number of
    /// events emitted.
    pub fn apply_at(&mut self, frame: &InputFrame, injector: &dyn InputInjector, now_ms: u64) -> usize {
        let mut emitted = 0;

        for change in self.prev_keys.changes(&frame.keys) {
            if let Err(e) = injector.inject_key(change.vk, change.down) {
                tracing::warn!(vk = change.vk, down = change.down, error = %e, "key injection failed");
            }
            emitted += 1;
        }
        self.prev_keys = frame.keys;

        let changed = frame.buttons ^ self.prev_buttons;
        for button in MouseButton::ALL {
            if changed & button.mask() != 0 {
                let down = frame.buttons & button.mask() != 0;
                if let Err(e) = injector.inject_mouse_button(button, down) {
                    tracing::warn!(?button, down, error = %e, "button injection failed");
                }
                emitted += 1;
            }
        }
        self.prev_buttons = frame.buttons;

        if frame.dx != 0 || frame.dy != 0 {
            if let Err(e) = injector.inject_mouse_move(frame.dx, frame.dy) {
                tracing::warn!(error = %e, "mouse move injection failed");
            }
            emitted += 1;
        }

        if frame.wheel != 0 {
            let delta = frame.wheel.saturating_mul(WHEEL_DELTA);
            if let Err(e) = injector.inject_wheel(delta) {
                tracing::warn!(error = %e, "wheel injection failed");
            }
            emitted += 1;
        }

        let latency = now_ms.saturating_sub(frame.timestamp_ms);
        if latency > self.latency_warn_ms {
            tracing::warn!(latency_ms = latency, timestamp_ms = frame.timestamp_ms, "high input latency");
        }

        emitted
    }

    /// Release every key and button the peer left held.
    pub fn release_all(&mut self, injector: &dyn InputInjector) -> usize {
        let now = now_ms();
        self.apply_at(&InputFrame::released(now), injector, now)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
