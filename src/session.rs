//! Per-connection session state machine.
//!
//! ```text
//! AwaitingStart -> Validating -> Provisioning -> Active -> CleaningUp -> Closed
//! ```
//!
//! Connections rejected before `Provisioning` close without cleanup; once
//! provisioning has touched the shared process slots, cleanup runs exactly
//! once on every exit path, including panics.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{FutureExt, SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::MutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::Timings;
use crate::game::{GameMetadata, InstallError, LaunchError, MetadataError, SaveError};
use crate::input::InputRelay;
use crate::process::ProcessError;
use crate::protocol::{ControlMessage, Reply, SessionRequest, StartMessage};
use crate::services::Services;
use crate::state::{AgentState, ProcessSlots};
use crate::window::{wait_for_window, WindowError};

type WsTx = SplitSink<WebSocket, Message>;
type WsRx = SplitStream<WebSocket>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    AwaitingStart,
    Validating,
    Provisioning,
    Active,
    CleaningUp,
    Closed,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Timed out waiting for the start message.")]
    StartTimeout,

    #[error("Connection closed before the session started.")]
    Disconnected,

    #[error("Session endpoint is closed.")]
    ListenerClosed,

    #[error("First message must be a start message.")]
    NotStart,

    #[error("Malformed start message: {0}")]
    Malformed(String),

    #[error("Session parameters do not match this endpoint.")]
    Mismatch,

    #[error("A session is already running.")]
    AlreadyRunning,

    #[error("Failed to install game: {0}")]
    Install(#[from] InstallError),

    #[error("Invalid game metadata: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Failed to load save data: {0}")]
    Save(#[from] SaveError),

    #[error("Failed to launch game: {0}")]
    Launch(#[from] LaunchError),

    #[error("Failed to start process: {0}")]
    Process(#[from] ProcessError),

    #[error("Game window did not appear: {0}")]
    Window(#[from] WindowError),

    #[error("Control channel error: {0}")]
    Transport(#[from] axum::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Text sent to the peer in `{"result":"err","msg":...}`.
    pub fn reply_message(&self) -> String {
        self.to_string()
    }
}

/// Everything a connection handler needs, shared by all connections on one
/// session listener.
#[derive(Clone)]
pub struct SessionContext {
    /// The admission request this listener was opened for.
    pub request: SessionRequest,
    pub state: AgentState,
    pub services: Services,
    pub timings: Timings,
    /// Cancelled when the listener closes.
    pub listener: CancellationToken,
    /// Cancelled when the agent shuts down.
    pub shutdown: CancellationToken,
}

/// What provisioning produced, needed again at cleanup.
#[derive(Debug, Default)]
struct Provisioned {
    game_dir: Option<PathBuf>,
    metadata: Option<GameMetadata>,
}

struct PhaseTracker(SessionPhase);

impl PhaseTracker {
    fn enter(&mut self, next: SessionPhase) {
        tracing::debug!(from = ?self.0, to = ?next, "session phase");
        self.0 = next;
    }
}

/// Drive one websocket connection through the session state machine.
pub async fn run(socket: WebSocket, ctx: SessionContext) {
    let span = tracing::info_span!(
        "session",
        id = %ctx.request.id,
        user = %ctx.request.user,
        game = %ctx.request.game,
    );
    run_inner(socket, ctx).instrument(span).await
}

async fn run_inner(socket: WebSocket, ctx: SessionContext) {
    let (mut tx, mut rx) = socket.split();
    let mut phase = PhaseTracker(SessionPhase::AwaitingStart);

    let start = match await_start(&mut rx, &ctx, &mut phase).await {
        Ok(start) => start,
        Err(e) => {
            tracing::warn!(error = %e, phase = ?phase.0, "rejecting connection");
            reject(&mut tx, &e).await;
            phase.enter(SessionPhase::Closed);
            return;
        }
    };

    let mut slots = ctx.state.lock().await;
    if slots.is_running() {
        drop(slots);
        let e = SessionError::AlreadyRunning;
        tracing::warn!("connection rejected, a session is already running");
        reject(&mut tx, &e).await;
        phase.enter(SessionPhase::Closed);
        return;
    }
    if ctx.listener.is_cancelled() {
        drop(slots);
        reject(&mut tx, &SessionError::ListenerClosed).await;
        phase.enter(SessionPhase::Closed);
        return;
    }

    // From here on, cleanup must run.
    ctx.state.mark_connected();
    phase.enter(SessionPhase::Provisioning);
    tracing::info!("provisioning session");

    let mut relay = InputRelay::new(ctx.timings.latency_warn_ms);
    let mut provisioned = Provisioned::default();

    let outcome = AssertUnwindSafe(provision(&mut slots, &ctx, &start, &mut provisioned))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(SessionError::Internal("provisioning panicked".into())));

    let started = match outcome {
        Ok(()) => match send_reply(&mut tx, &Reply::Ok).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "failed to confirm session start");
                false
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "provisioning failed");
            let _ = send_reply(&mut tx, &Reply::err(e.reply_message())).await;
            false
        }
    };

    if started {
        // No other connection can provision while the game slot is held.
        drop(slots);
        phase.enter(SessionPhase::Active);
        tracing::info!("session active");

        let relayed = AssertUnwindSafe(relay_input(&mut rx, &mut relay, &ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(SessionError::Internal("input relay panicked".into())));
        match relayed {
            Ok(()) => tracing::info!("peer disconnected"),
            Err(e) => tracing::warn!(error = %e, "session ended with error"),
        }

        slots = ctx.state.lock().await;
    }

    phase.enter(SessionPhase::CleaningUp);
    cleanup(&mut slots, &ctx, &start, &provisioned, &mut relay).await;

    // Close the endpoint before releasing the lock so no late connection
    // can provision on it.
    ctx.listener.cancel();
    drop(slots);
    let _ = tx.close().await;
    phase.enter(SessionPhase::Closed);
    tracing::info!("session closed");
}

async fn await_start(
    rx: &mut WsRx,
    ctx: &SessionContext,
    phase: &mut PhaseTracker,
) -> Result<StartMessage, SessionError> {
    let deadline = tokio::time::Instant::now() + ctx.timings.start_timeout();

    let text = loop {
        let msg = tokio::select! {
            _ = ctx.listener.cancelled() => return Err(SessionError::ListenerClosed),
            r = tokio::time::timeout_at(deadline, rx.next()) => match r {
                Err(_) => return Err(SessionError::StartTimeout),
                Ok(None) => return Err(SessionError::Disconnected),
                Ok(Some(Err(e))) => return Err(e.into()),
                Ok(Some(Ok(msg))) => msg,
            },
        };
        match msg {
            Message::Text(text) => break text,
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => return Err(SessionError::Disconnected),
            Message::Binary(_) => return Err(SessionError::NotStart),
        }
    };

    phase.enter(SessionPhase::Validating);
    let start = match ControlMessage::parse(text.as_str()) {
        Ok(ControlMessage::Start(start)) => start,
        Ok(ControlMessage::Unknown) => return Err(SessionError::NotStart),
        Err(e) => return Err(SessionError::Malformed(e.to_string())),
    };

    if !start.matches(&ctx.request) {
        tracing::warn!(
            sent_id = %start.id,
            sent_user = %start.user,
            sent_game = %start.game,
            "start message does not match admitted request"
        );
        return Err(SessionError::Mismatch);
    }
    Ok(start)
}

/// Install, import saves, launch, find the window and start streaming.
/// Process handles are stored in `slots` as soon as they exist so cleanup
/// sees partial progress.
async fn provision(
    slots: &mut MutexGuard<'_, ProcessSlots>,
    ctx: &SessionContext,
    start: &StartMessage,
    provisioned: &mut Provisioned,
) -> Result<(), SessionError> {
    let services = &ctx.services;

    let (game_dir, metadata) = {
        let installer = services.installer.clone();
        let saves = services.saves.clone();
        let (game, user) = (start.game.clone(), start.user.clone());
        blocking(move || -> Result<_, SessionError> {
            let game_dir = installer.install(&game)?;
            let metadata = GameMetadata::load_for_game(&game_dir)?;
            let save = saves.download(&game, &user)?;
            metadata.import_save(save.as_ref().map(|dir| dir.path()))?;
            Ok((game_dir, metadata))
        })
        .await?
    };
    provisioned.game_dir = Some(game_dir.clone());
    provisioned.metadata = Some(metadata.clone());

    let launcher = services.launchers.get(&start.game)?;
    let command = launcher.command(&game_dir, &metadata);
    slots.game = Some(services.processes.launch(&command)?);
    let pid = slots
        .game
        .as_ref()
        .and_then(|g| g.id())
        .ok_or_else(|| SessionError::Internal("game exited immediately".into()))?;
    tracing::info!(pid, "game started");

    let window = wait_for_window(
        services.windows.as_ref(),
        pid,
        ctx.timings.window_timeout(),
        ctx.timings.window_poll(),
    )
    .await?;
    if let Err(e) = services.windows.bring_to_foreground(window) {
        tracing::warn!(error = %e, "could not focus game window");
    }

    slots.video = Some(services.streamer.start_video(window)?);
    slots.audio = Some(services.streamer.start_audio()?);
    tracing::info!(?window, "streaming started");
    Ok(())
}

async fn relay_input(
    rx: &mut WsRx,
    relay: &mut InputRelay,
    ctx: &SessionContext,
) -> Result<(), SessionError> {
    let injector = ctx.services.injector.as_ref();
    loop {
        let msg = tokio::select! {
            _ = ctx.shutdown.cancelled() => {
                tracing::info!("agent shutting down, ending session");
                return Ok(());
            }
            msg = rx.next() => msg,
        };
        match msg {
            Some(Ok(Message::Binary(data))) => {
                // Malformed frames are logged by the relay and skipped.
                let _ = relay.handle_bytes(&data, injector);
            }
            Some(Ok(Message::Text(text))) => {
                tracing::info!(message = %text.as_str(), "control message");
            }
            Some(Ok(Message::Close(_))) | None => return Ok(()),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

/// Release held input, stop the game, save, stop the streams.
async fn cleanup(
    slots: &mut MutexGuard<'_, ProcessSlots>,
    ctx: &SessionContext,
    start: &StartMessage,
    provisioned: &Provisioned,
    relay: &mut InputRelay,
) {
    let released = relay.release_all(ctx.services.injector.as_ref());
    if released > 0 {
        tracing::info!(released, "released held input");
    }

    slots.terminate_game().await;

    if let Some(metadata) = provisioned.metadata.clone() {
        let saves = ctx.services.saves.clone();
        let (game, user) = (start.game.clone(), start.user.clone());
        let saved = blocking(move || -> Result<(), SessionError> {
            let export = metadata.export_save()?;
            saves.upload(&game, &user, export.path())?;
            Ok(())
        })
        .await;
        if let Err(e) = saved {
            tracing::error!(error = %e, "failed to store save");
        }
    }

    slots.terminate_streams().await;
    tracing::debug!(game_dir = ?provisioned.game_dir, "cleanup complete");
}

/// Run filesystem-bound provisioning work on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, SessionError>
where
    F: FnOnce() -> Result<T, SessionError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SessionError::Internal(format!("blocking task failed: {e}")))?
}

async fn send_reply(tx: &mut WsTx, reply: &Reply) -> Result<(), SessionError> {
    tx.send(Message::Text(reply.to_json().into())).await?;
    Ok(())
}

async fn reject(tx: &mut WsTx, error: &SessionError) {
    if let Err(e) = send_reply(tx, &Reply::err(error.reply_message())).await {
        tracing::debug!(error = %e, "could not deliver rejection");
    }
    let _ = tx.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_session_message_is_exact() {
        assert_eq!(
            SessionError::AlreadyRunning.reply_message(),
            "A session is already running."
        );
    }

    #[test]
    fn provisioning_errors_carry_cause() {
        let e: SessionError = InstallError::NotInRepository("baba".into()).into();
        assert_eq!(
            e.reply_message(),
            "Failed to install game: game baba is not in the repository"
        );
    }

    #[test]
    fn phase_tracker_records_transitions() {
        let mut p = PhaseTracker(SessionPhase::AwaitingStart);
        p.enter(SessionPhase::Validating);
        assert_eq!(p.0, SessionPhase::Validating);
    }
}
