//! Process-wide agent state shared by the broker loop and session handlers.

use std::sync::Arc;

use tokio::sync::{watch, Mutex, MutexGuard};

use crate::process::ManagedProcess;

/// The processes belonging to the provisioned session, if any.
///
/// `game` is `Some` exactly while a session is provisioned. During cleanup
/// the game is cleared before the streams.
#[derive(Debug, Default)]
pub struct ProcessSlots {
    pub game: Option<Box<dyn ManagedProcess>>,
    pub video: Option<Box<dyn ManagedProcess>>,
    pub audio: Option<Box<dyn ManagedProcess>>,
}

impl ProcessSlots {
    pub fn is_running(&self) -> bool {
        self.game.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.game.is_none() && self.video.is_none() && self.audio.is_none()
    }

    /// Stop and clear the game process.
    pub async fn terminate_game(&mut self) {
        terminate_slot("game", &mut self.game).await;
    }

    /// Stop and clear both capture pipelines.
    pub async fn terminate_streams(&mut self) {
        terminate_slot("video", &mut self.video).await;
        terminate_slot("audio", &mut self.audio).await;
    }

    /// Stop and clear every held process. Failures are logged; every slot is
    /// cleared regardless.
    pub async fn terminate_all(&mut self) {
        self.terminate_game().await;
        self.terminate_streams().await;
    }
}

async fn terminate_slot(name: &str, slot: &mut Option<Box<dyn ManagedProcess>>) {
    if let Some(mut proc) = slot.take() {
        let pid = proc.id();
        match proc.terminate().await {
            Ok(()) => tracing::info!(process = name, ?pid, "process terminated"),
            Err(e) => tracing::error!(process = name, ?pid, error = %e, "failed to terminate process"),
        }
    }
}

/// Shared agent state: the lock over [`ProcessSlots`] and the
/// "connection established" signal.
///
/// Cloning is cheap; all clones refer to the same state.
#[derive(Debug, Clone)]
pub struct AgentState {
    slots: Arc<Mutex<ProcessSlots>>,
    connected: Arc<watch::Sender<bool>>,
}

impl Default for AgentState {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentState {
    pub fn new() -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            slots: Arc::new(Mutex::new(ProcessSlots::default())),
            connected: Arc::new(connected),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, ProcessSlots> {
        self.slots.lock().await
    }

    pub fn mark_connected(&self) {
        self.connected.send_replace(true);
    }

    pub fn clear_connected(&self) {
        self.connected.send_replace(false);
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Resolve once the signal is set.
    pub async fn connected(&self) {
        let mut rx = self.connected.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|set| *set).await;
    }

    /// Whether a session currently holds provisioned processes.
    pub async fn is_session_running(&self) -> bool {
        self.slots.lock().await.is_running()
    }
}
