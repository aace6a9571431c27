//! Per-game launch strategies, resolved from a fixed registry.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::metadata::GameMetadata;
use crate::process::LaunchCommand;

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("no launcher registered for game {0}")]
    UnknownGame(String),
}

/// Builds the command that starts a game.
pub trait GameLauncher: Send + Sync {
    fn command(&self, game_dir: &Path, metadata: &GameMetadata) -> LaunchCommand;
}

/// Runs the descriptor's executable from its own directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExecutableLauncher;

impl GameLauncher for ExecutableLauncher {
    fn command(&self, game_dir: &Path, metadata: &GameMetadata) -> LaunchCommand {
        let exe = metadata.executable(game_dir);
        let cwd = exe.parent().unwrap_or(game_dir).to_path_buf();
        LaunchCommand::new(exe)
            .args(metadata.args.iter().cloned())
            .current_dir(cwd)
    }
}

/// Runs the descriptor's executable as a PowerShell script.
#[derive(Debug, Default, Clone, Copy)]
pub struct PowerShellLauncher;

impl GameLauncher for PowerShellLauncher {
    fn command(&self, game_dir: &Path, metadata: &GameMetadata) -> LaunchCommand {
        let script = metadata.executable(game_dir);
        let cwd = script.parent().unwrap_or(game_dir).to_path_buf();
        LaunchCommand::new("powershell.exe")
            .arg("-File")
            .arg(script.to_string_lossy())
            .args(metadata.args.iter().cloned())
            .current_dir(cwd)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LauncherKind {
    #[default]
    Executable,
    Powershell,
}

impl LauncherKind {
    fn build(self) -> Arc<dyn GameLauncher> {
        match self {
            LauncherKind::Executable => Arc::new(ExecutableLauncher),
            LauncherKind::Powershell => Arc::new(PowerShellLauncher),
        }
    }
}

/// Maps game identifiers to launchers. Populated once at startup.
#[derive(Clone, Default)]
pub struct LauncherRegistry {
    launchers: HashMap<String, Arc<dyn GameLauncher>>,
    fallback: Option<Arc<dyn GameLauncher>>,
}

impl std::fmt::Debug for LauncherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut games: Vec<_> = self.launchers.keys().collect();
        games.sort();
        f.debug_struct("LauncherRegistry")
            .field("games", &games)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl LauncherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a `game -> kind` manifest.
    pub fn from_manifest<'a>(
        entries: impl IntoIterator<Item = (&'a String, &'a LauncherKind)>,
    ) -> Self {
        let mut registry = Self::new();
        for (game, kind) in entries {
            registry.register(game.clone(), kind.build());
        }
        registry
    }

    pub fn register(&mut self, game: impl Into<String>, launcher: Arc<dyn GameLauncher>) {
        self.launchers.insert(game.into(), launcher);
    }

    /// Launcher used for games missing from the manifest.
    pub fn with_fallback(mut self, launcher: Arc<dyn GameLauncher>) -> Self {
        self.fallback = Some(launcher);
        self
    }

    pub fn get(&self, game: &str) -> Result<Arc<dyn GameLauncher>, LaunchError> {
        self.launchers
            .get(game)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| LaunchError::UnknownGame(game.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn md(exe: &str) -> GameMetadata {
        GameMetadata {
            exe_location: exe.into(),
            args: vec!["-windowed".into()],
            save_root: "/saves".into(),
            save_patterns: vec![],
        }
    }

    #[test]
    fn executable_runs_from_its_directory() {
        let cmd = ExecutableLauncher.command(Path::new("/games/superhot"), &md("bin/SH.exe"));
        assert_eq!(cmd.program, PathBuf::from("/games/superhot/bin/SH.exe"));
        assert_eq!(cmd.working_dir, Some(PathBuf::from("/games/superhot/bin")));
        assert_eq!(cmd.args, vec!["-windowed".to_string()]);
    }

    #[test]
    fn powershell_wraps_script() {
        let cmd = PowerShellLauncher.command(Path::new("/games/test"), &md("test.ps1"));
        assert_eq!(cmd.program, PathBuf::from("powershell.exe"));
        assert_eq!(cmd.args[0], "-File");
        assert!(cmd.args[1].ends_with("test.ps1"));
    }

    #[test]
    fn registry_lookup() {
        let manifest: HashMap<String, LauncherKind> = [
            ("superhot".to_string(), LauncherKind::Executable),
            ("test".to_string(), LauncherKind::Powershell),
        ]
        .into_iter()
        .collect();
        let registry = LauncherRegistry::from_manifest(&manifest);

        let cmd = registry
            .get("test")
            .unwrap()
            .command(Path::new("/g"), &md("t.ps1"));
        assert_eq!(cmd.program, PathBuf::from("powershell.exe"));
        assert!(matches!(registry.get("baba"), Err(LaunchError::UnknownGame(_))));
    }

    #[test]
    fn fallback_covers_unlisted_games() {
        let registry = LauncherRegistry::new().with_fallback(Arc::new(ExecutableLauncher));
        assert!(registry.get("anything").is_ok());
    }
}
