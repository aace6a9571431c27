//! The external capabilities a session is provisioned through.

use std::sync::Arc;

use crate::config::AgentConfig;
use crate::game::{
    ExecutableLauncher, GameInstaller, LauncherRegistry, LocalRepoInstaller, LocalSaveStore,
    SaveStore,
};
use crate::input::{platform_injector, InputInjector};
use crate::process::{OsProcessLauncher, ProcessLauncher};
use crate::streaming::{GstStreamer, MediaStreamer};
use crate::window::{platform_locator, WindowLocator};

/// Everything a session needs from the outside world. Tests build this
/// from fakes.
#[derive(Clone)]
pub struct Services {
    pub installer: Arc<dyn GameInstaller>,
    pub saves: Arc<dyn SaveStore>,
    pub launchers: LauncherRegistry,
    pub processes: Arc<dyn ProcessLauncher>,
    pub windows: Arc<dyn WindowLocator>,
    pub streamer: Arc<dyn MediaStreamer>,
    pub injector: Arc<dyn InputInjector>,
}

impl Services {
    /// Real implementations for this host, wired from `config`.
    pub fn from_config(config: &AgentConfig) -> Self {
        let processes: Arc<dyn ProcessLauncher> = Arc::new(OsProcessLauncher);
        Self {
            installer: Arc::new(LocalRepoInstaller::new(
                &config.games_repo_path,
                &config.working_folder_path,
            )),
            saves: Arc::new(LocalSaveStore::new(&config.saves_path)),
            launchers: LauncherRegistry::from_manifest(
                config.games.iter().map(|(game, entry)| (game, &entry.launcher)),
            )
            .with_fallback(Arc::new(ExecutableLauncher)),
            streamer: Arc::new(GstStreamer::new(
                processes.clone(),
                config.streaming.clone(),
                config.video_signalling_port,
                config.audio_signalling_port,
            )),
            processes,
            windows: Arc::from(platform_locator()),
            injector: Arc::from(platform_injector()),
        }
    }
}
