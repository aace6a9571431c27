use std::path::PathBuf;

use thiserror::Error;

use super::archive;

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("game {0} is not in the repository")]
    NotInRepository(String),

    #[error("invalid game name: {0}")]
    InvalidName(String),

    #[error("failed to install {game}: {source}")]
    Extract {
        game: String,
        #[source]
        source: zip::result::ZipError,
    },
}

/// Makes a game's files available locally.
pub trait GameInstaller: Send + Sync {
    /// Install `game` and return its local directory. Installing an already
    /// installed game only checks that it exists.
    ///
    /// May block on filesystem work; call it off the async runtime.
    fn install(&self, game: &str) -> Result<PathBuf, InstallError>;
}

/// Installs games from a repository directory holding one `<game>.zip`
/// per title, extracting them into a working folder.
#[derive(Debug, Clone)]
pub struct LocalRepoInstaller {
    repo: PathBuf,
    working_folder: PathBuf,
}

impl LocalRepoInstaller {
    pub fn new(repo: impl Into<PathBuf>, working_folder: impl Into<PathBuf>) -> Self {
        Self {
            repo: repo.into(),
            working_folder: working_folder.into(),
        }
    }

    pub fn is_installed(&self, game: &str) -> bool {
        self.working_folder.join(game).exists()
    }
}

impl GameInstaller for LocalRepoInstaller {
    fn install(&self, game: &str) -> Result<PathBuf, InstallError> {
        validate_game_name(game)?;

        let dest = self.working_folder.join(game);
        if dest.exists() {
            tracing::debug!(game, path = %dest.display(), "game already installed");
            return Ok(dest);
        }

        let package = self.repo.join(format!("{game}.zip"));
        if !package.is_file() {
            return Err(InstallError::NotInRepository(game.to_string()));
        }

        // Extract into a sibling staging directory and rename, so a failed
        // extraction never looks like an installed game.
        let staging = self.working_folder.join(format!(".{game}.partial"));
        if staging.exists() {
            let _ = std::fs::remove_dir_all(&staging);
        }
        let result = archive::extract(&package, &staging)
            .and_then(|()| std::fs::rename(&staging, &dest).map_err(Into::into));
        if let Err(source) = result {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(InstallError::Extract {
                game: game.to_string(),
                source,
            });
        }

        tracing::info!(game, path = %dest.display(), "game installed");
        Ok(dest)
    }
}

/// Game names become directory names; reject anything that could escape
/// the repository.
pub fn validate_game_name(game: &str) -> Result<(), InstallError> {
    let ok = !game.is_empty()
        && game.len() <= 64
        && !game.starts_with('.')
        && game
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.');
    if ok {
        Ok(())
    } else {
        Err(InstallError::InvalidName(game.to_string()))
    }
}
