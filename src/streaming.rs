//! Media capture pipelines for the game's video and the host's audio.

use std::sync::Arc;

use crate::config::StreamingConfig;
use crate::process::{LaunchCommand, ManagedProcess, ProcessError, ProcessLauncher};
use crate::window::WindowHandle;

pub trait MediaStreamer: Send + Sync {
    fn start_video(&self, window: WindowHandle) -> Result<Box<dyn ManagedProcess>, ProcessError>;

    fn start_audio(&self) -> Result<Box<dyn ManagedProcess>, ProcessError>;
}

/// Runs `gst-launch-1.0` pipelines ending in `webrtcsink`, each with its own
/// signalling server.
pub struct GstStreamer {
    launcher: Arc<dyn ProcessLauncher>,
    config: StreamingConfig,
    video_signalling_port: u16,
    audio_signalling_port: u16,
}

impl GstStreamer {
    pub fn new(
        launcher: Arc<dyn ProcessLauncher>,
        config: StreamingConfig,
        video_signalling_port: u16,
        audio_signalling_port: u16,
    ) -> Self {
        Self {
            launcher,
            config,
            video_signalling_port,
            audio_signalling_port,
        }
    }

    /// Window capture → NV12 → low-latency H.264 → WebRTC.
    pub fn video_command(&self, window: WindowHandle) -> LaunchCommand {
        let c = &self.config;
        LaunchCommand::new(&c.gst_launch).args([
            "d3d11screencapturesrc".to_string(),
            "show-cursor=true".to_string(),
            format!("window-handle={}", window.0),
            "!".into(),
            "videoconvert".into(),
            "!".into(),
            format!("video/x-raw,format=NV12,framerate={}/1", c.framerate),
            "!".into(),
            "nvh264enc".into(),
            "tune=ultra-low-latency".into(),
            "preset=p1".into(),
            "rc-mode=cbr".into(),
            format!("bitrate={}", c.video_bitrate),
            "gop-size=1".into(),
            "zerolatency=true".into(),
            format!("vbv-buffer-size={}", c.video_bitrate),
            "aud=false".into(),
            "!".into(),
            "video/x-h264,stream-format=avc,alignment=au".into(),
            "!".into(),
            "queue".into(),
            "max-size-buffers=0".into(),
            "max-size-time=0".into(),
            "max-size-bytes=0".into(),
            "leaky=upstream".into(),
            "!".into(),
            "webrtcsink".into(),
            "run-signalling-server=true".into(),
            format!("signalling-server-port={}", self.video_signalling_port),
        ])
    }

    /// Loopback capture → Opus → WebRTC.
    pub fn audio_command(&self) -> LaunchCommand {
        let c = &self.config;
        LaunchCommand::new(&c.gst_launch).args([
            "wasapisrc".to_string(),
            "loopback=true".into(),
            "low-latency=true".into(),
            "!".into(),
            "audioconvert".into(),
            "!".into(),
            "audioresample".into(),
            "!".into(),
            "audio/x-raw,rate=48000,channels=2,format=S16LE".into(),
            "!".into(),
            "opusenc".into(),
            format!("bitrate={}", c.audio_bitrate),
            "!".into(),
            "queue".into(),
            "max-size-buffers=1".into(),
            "max-size-time=0".into(),
            "max-size-bytes=0".into(),
            "leaky=downstream".into(),
            "!".into(),
            "webrtcsink".into(),
            "run-signalling-server=true".into(),
            format!("signalling-server-port={}", self.audio_signalling_port),
        ])
    }
}

impl MediaStreamer for GstStreamer {
    fn start_video(&self, window: WindowHandle) -> Result<Box<dyn ManagedProcess>, ProcessError> {
        self.launcher.launch(&self.video_command(window))
    }

    fn start_audio(&self) -> Result<Box<dyn ManagedProcess>, ProcessError> {
        self.launcher.launch(&self.audio_command())
    }
}
