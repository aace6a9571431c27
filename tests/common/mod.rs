#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use cloudplay_agent::config::{AgentConfig, Timings};
use cloudplay_agent::game::{
    ExecutableLauncher, GameInstaller, InstallError, LauncherRegistry, SaveError, SaveStore,
};
use cloudplay_agent::input::{InjectError, InputInjector, MouseButton};
use cloudplay_agent::listener::SessionListener;
use cloudplay_agent::process::{LaunchCommand, ManagedProcess, ProcessError, ProcessLauncher};
use cloudplay_agent::protocol::{EndpointInfo, SessionRequest};
use cloudplay_agent::queue::{QueueError, WorkQueue};
use cloudplay_agent::services::Services;
use cloudplay_agent::session::SessionContext;
use cloudplay_agent::state::AgentState;
use cloudplay_agent::streaming::MediaStreamer;
use cloudplay_agent::window::{WindowError, WindowHandle, WindowLocator};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Everything observable the fakes did, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Key { vk: u8, down: bool },
    Button { button: MouseButton, down: bool },
    Move { dx: i32, dy: i32 },
    Wheel(i32),
    Launched(String),
    Terminated(String),
    SaveUploaded { game: String, user: String },
}

#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub fn push(&self, event: Event) {
        self.0.lock().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().clone()
    }

    pub fn launched(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Launched(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn terminated(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Terminated(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn keys(&self) -> Vec<(u8, bool)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Key { vk, down } => Some((vk, down)),
                _ => None,
            })
            .collect()
    }

    pub fn position(&self, event: &Event) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    /// Poll until `pred` holds or a second passes.
    pub async fn wait_until(&self, pred: impl Fn(&[Event]) -> bool) -> bool {
        for _ in 0..100 {
            if pred(&self.0.lock()) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

// ── Input ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct RecordingInjector {
    pub log: EventLog,
}

impl InputInjector for RecordingInjector {
    fn inject_key(&self, vk: u8, down: bool) -> Result<(), InjectError> {
        self.log.push(Event::Key { vk, down });
        Ok(())
    }

    fn inject_mouse_move(&self, dx: i32, dy: i32) -> Result<(), InjectError> {
        self.log.push(Event::Move { dx, dy });
        Ok(())
    }

    fn inject_mouse_button(&self, button: MouseButton, down: bool) -> Result<(), InjectError> {
        self.log.push(Event::Button { button, down });
        Ok(())
    }

    fn inject_wheel(&self, delta: i32) -> Result<(), InjectError> {
        self.log.push(Event::Wheel(delta));
        Ok(())
    }
}

// ── Processes ──────────────────────────────────────────────────────

#[derive(Debug)]
pub struct FakeProcess {
    name: String,
    pid: u32,
    log: EventLog,
}

#[async_trait]
impl ManagedProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn terminate(&mut self) -> Result<(), ProcessError> {
        self.log.push(Event::Terminated(self.name.clone()));
        Ok(())
    }
}

/// Records launches; every process it starts is named `game`.
#[derive(Debug, Default)]
pub struct FakeProcessLauncher {
    log: EventLog,
    next_pid: AtomicU32,
    pub commands: Mutex<Vec<LaunchCommand>>,
}

impl FakeProcessLauncher {
    fn spawn(&self, name: &str) -> Box<dyn ManagedProcess> {
        self.log.push(Event::Launched(name.to_string()));
        Box::new(FakeProcess {
            name: name.to_string(),
            pid: 1000 + self.next_pid.fetch_add(1, Ordering::SeqCst),
            log: self.log.clone(),
        })
    }
}

impl ProcessLauncher for FakeProcessLauncher {
    fn launch(&self, command: &LaunchCommand) -> Result<Box<dyn ManagedProcess>, ProcessError> {
        self.commands.lock().push(command.clone());
        Ok(self.spawn("game"))
    }
}

pub struct FakeStreamer {
    processes: Arc<FakeProcessLauncher>,
    fail_audio: bool,
}

impl MediaStreamer for FakeStreamer {
    fn start_video(&self, _window: WindowHandle) -> Result<Box<dyn ManagedProcess>, ProcessError> {
        Ok(self.processes.spawn("video"))
    }

    fn start_audio(&self) -> Result<Box<dyn ManagedProcess>, ProcessError> {
        if self.fail_audio {
            return Err(ProcessError::Spawn {
                program: "gst-launch-1.0".into(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            });
        }
        Ok(self.processes.spawn("audio"))
    }
}

// ── Game files ─────────────────────────────────────────────────────

/// Installs every game as a directory holding a minimal `metadata.json`.
pub struct FakeInstaller {
    root: PathBuf,
    save_root: PathBuf,
    delay: Duration,
}

impl GameInstaller for FakeInstaller {
    fn install(&self, game: &str) -> Result<PathBuf, InstallError> {
        if game == "missing" {
            return Err(InstallError::NotInRepository(game.to_string()));
        }
        // Blocks the calling thread, like extracting a large package.
        std::thread::sleep(self.delay);
        let dir = self.root.join(game);
        let copy = |source: std::io::Error| InstallError::Extract {
            game: game.to_string(),
            source: source.into(),
        };
        std::fs::create_dir_all(&dir).map_err(copy)?;
        std::fs::create_dir_all(&self.save_root).map_err(copy)?;
        let metadata = serde_json::json!({
            "exe_location": "game.exe",
            "save_root": self.save_root,
            "save_patterns": [{ "pattern_root": "", "pattern": "*.sav" }],
        });
        std::fs::write(dir.join("metadata.json"), metadata.to_string()).map_err(copy)?;
        Ok(dir)
    }
}

#[derive(Default)]
pub struct FakeSaveStore {
    log: EventLog,
}

impl SaveStore for FakeSaveStore {
    fn download(&self, _game: &str, _user: &str) -> Result<Option<TempDir>, SaveError> {
        Ok(None)
    }

    fn upload(&self, game: &str, user: &str, _archive: &Path) -> Result<(), SaveError> {
        self.log.push(Event::SaveUploaded {
            game: game.to_string(),
            user: user.to_string(),
        });
        Ok(())
    }
}

/// Finds a window for every pid once `delay` has passed since the first
/// lookup, or never.
pub struct FakeWindows {
    appears: bool,
    delay: Duration,
    first_lookup: Mutex<Option<Instant>>,
}

impl WindowLocator for FakeWindows {
    fn find_top_level_window(&self, pid: u32) -> Option<WindowHandle> {
        let first = *self.first_lookup.lock().get_or_insert_with(Instant::now);
        (self.appears && first.elapsed() >= self.delay).then_some(WindowHandle(pid as isize))
    }

    fn bring_to_foreground(&self, _window: WindowHandle) -> Result<(), WindowError> {
        Ok(())
    }
}

// ── Queue ──────────────────────────────────────────────────────────

pub struct MemoryQueue {
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<SessionRequest, QueueError>>>,
    pub replies: Mutex<Vec<(String, EndpointInfo)>>,
    pub fail_publish: std::sync::atomic::AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedSender<Result<SessionRequest, QueueError>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Arc::new(Self {
            rx: tokio::sync::Mutex::new(rx),
            replies: Mutex::new(Vec::new()),
            fail_publish: std::sync::atomic::AtomicBool::new(false),
        });
        (queue, tx)
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn pop_next_session_request(&self) -> Result<SessionRequest, QueueError> {
        match self.rx.lock().await.recv().await {
            Some(item) => item,
            None => std::future::pending().await,
        }
    }

    async fn publish_reply(&self, session_id: &str, info: &EndpointInfo) -> Result<(), QueueError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("publish disabled".into()));
        }
        self.replies
            .lock()
            .push((session_id.to_string(), info.clone()));
        Ok(())
    }
}

// ── Harness ────────────────────────────────────────────────────────

pub fn request(id: &str, user: &str, game: &str) -> SessionRequest {
    SessionRequest {
        id: id.into(),
        user: user.into(),
        game: game.into(),
    }
}

pub fn start_message(id: &str, user: &str, game: &str) -> String {
    serde_json::json!({ "type": "start", "user": user, "game": game, "id": id }).to_string()
}

pub fn fast_timings() -> Timings {
    Timings {
        start_timeout_ms: 500,
        connect_grace_ms: 500,
        window_timeout_ms: 300,
        window_poll_ms: 20,
        queue_backoff_ms: 50,
        ..Timings::default()
    }
}

/// A port that was free a moment ago.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

pub fn test_config(port: u16) -> AgentConfig {
    AgentConfig {
        bind_host: "127.0.0.1".into(),
        public_host: Some("localhost".into()),
        ws_port: port,
        timings: fast_timings(),
        ..AgentConfig::default()
    }
}

/// Knobs for the fakes a harness is built from.
#[derive(Debug, Clone)]
pub struct Fakes {
    pub window_appears: bool,
    pub window_delay: Duration,
    pub install_delay: Duration,
    pub fail_audio: bool,
}

impl Default for Fakes {
    fn default() -> Self {
        Self {
            window_appears: true,
            window_delay: Duration::ZERO,
            install_delay: Duration::ZERO,
            fail_audio: false,
        }
    }
}

pub struct Harness {
    pub log: EventLog,
    pub state: AgentState,
    pub services: Services,
    pub processes: Arc<FakeProcessLauncher>,
    _dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_window(true)
    }

    /// `appears: false` makes every window wait time out.
    pub fn with_window(appears: bool) -> Self {
        Self::with(Fakes {
            window_appears: appears,
            ..Fakes::default()
        })
    }

    pub fn with(fakes: Fakes) -> Self {
        let dir = TempDir::new().unwrap();
        let log = EventLog::default();
        let processes = Arc::new(FakeProcessLauncher {
            log: log.clone(),
            ..Default::default()
        });
        let services = Services {
            installer: Arc::new(FakeInstaller {
                root: dir.path().join("games"),
                save_root: dir.path().join("live-saves"),
                delay: fakes.install_delay,
            }),
            saves: Arc::new(FakeSaveStore { log: log.clone() }),
            launchers: LauncherRegistry::new().with_fallback(Arc::new(ExecutableLauncher)),
            processes: processes.clone(),
            windows: Arc::new(FakeWindows {
                appears: fakes.window_appears,
                delay: fakes.window_delay,
                first_lookup: Mutex::new(None),
            }),
            streamer: Arc::new(FakeStreamer {
                processes: processes.clone(),
                fail_audio: fakes.fail_audio,
            }),
            injector: Arc::new(RecordingInjector { log: log.clone() }),
        };
        Self {
            log,
            state: AgentState::new(),
            services,
            processes,
            _dir: dir,
        }
    }

    /// Open a session listener on an ephemeral port for `request`.
    pub async fn listen(&self, request: SessionRequest) -> (SessionListener, String) {
        let ctx = SessionContext {
            request,
            state: self.state.clone(),
            services: self.services.clone(),
            timings: fast_timings(),
            listener: CancellationToken::new(),
            shutdown: CancellationToken::new(),
        };
        let listener = SessionListener::bind("127.0.0.1:0", ctx).await.unwrap();
        let url = format!("ws://{}/", listener.local_addr());
        (listener, url)
    }
}

// ── Client helpers ─────────────────────────────────────────────────

pub async fn connect(url: &str) -> Client {
    let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws
}

pub async fn send_text(ws: &mut Client, text: String) {
    ws.send(Message::text(text)).await.unwrap();
}

pub async fn send_binary(ws: &mut Client, data: Vec<u8>) {
    ws.send(Message::binary(data)).await.unwrap();
}

/// Next text message, or `None` if the server closed first.
pub async fn recv_text(ws: &mut Client) -> Option<String> {
    let deadline = Duration::from_secs(3);
    loop {
        let msg = tokio::time::timeout(deadline, ws.next())
            .await
            .expect("timed out waiting for server message")?;
        match msg {
            Ok(Message::Text(text)) => return Some(text.as_str().to_string()),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

pub async fn recv_json(ws: &mut Client) -> serde_json::Value {
    let text = recv_text(ws).await.expect("server closed before replying");
    serde_json::from_str(&text).unwrap()
}

pub async fn closed_within(listener: SessionListener, secs: u64) {
    tokio::time::timeout(Duration::from_secs(secs), listener.closed())
        .await
        .expect("listener did not close");
}
