use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use thiserror::Error;

use super::archive;
use super::install::{validate_game_name, InstallError};

#[derive(Error, Debug)]
pub enum SaveError {
    #[error("invalid save key: {0}")]
    InvalidKey(String),

    #[error("invalid user id: {0:?}")]
    InvalidUser(String),

    #[error("save store i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("save archive is unreadable: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl From<InstallError> for SaveError {
    fn from(e: InstallError) -> Self {
        SaveError::InvalidKey(e.to_string())
    }
}

/// Remote storage for save state, keyed by (game, user).
///
/// Both operations may block on filesystem or network work.
pub trait SaveStore: Send + Sync {
    /// Fetch the stored save and unpack it into a temporary directory, or
    /// `None` if the user has never saved this game.
    fn download(&self, game: &str, user: &str) -> Result<Option<TempDir>, SaveError>;

    /// Store the zip archive at `archive` as the user's save for `game`.
    fn upload(&self, game: &str, user: &str, archive: &Path) -> Result<(), SaveError>;
}

/// Saves stored as zip archives at `<root>/<game>/<user>.zip`.
#[derive(Debug, Clone)]
pub struct LocalSaveStore {
    root: PathBuf,
}

impl LocalSaveStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn slot(&self, game: &str, user: &str) -> Result<PathBuf, SaveError> {
        validate_game_name(game)?;
        let key = user_key(user).ok_or_else(|| SaveError::InvalidUser(user.to_string()))?;
        Ok(self.root.join(game).join(format!("{key}.zip")))
    }
}

impl SaveStore for LocalSaveStore {
    fn download(&self, game: &str, user: &str) -> Result<Option<TempDir>, SaveError> {
        let slot = self.slot(game, user)?;
        if !slot.is_file() {
            return Ok(None);
        }
        let dir = tempfile::Builder::new().prefix("save-import-").tempdir()?;
        archive::extract(&slot, dir.path())?;
        tracing::debug!(game, user, path = %slot.display(), "save downloaded");
        Ok(Some(dir))
    }

    fn upload(&self, game: &str, user: &str, archive: &Path) -> Result<(), SaveError> {
        let slot = self.slot(game, user)?;
        // Refuse anything that is not a readable archive before replacing
        // the stored save.
        zip::ZipArchive::new(std::fs::File::open(archive)?)?;

        if let Some(parent) = slot.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let staging = slot.with_extension("zip.uploading");
        std::fs::copy(archive, &staging)?;
        std::fs::rename(&staging, &slot)?;
        tracing::info!(game, user, path = %slot.display(), "save uploaded");
        Ok(())
    }
}

/// File-name-safe key for an opaque user id.
///
/// Letters, digits and `-_.@` pass through; every other byte becomes
/// `%XX`, as does a leading dot. Distinct ids always give distinct keys.
fn user_key(user: &str) -> Option<String> {
    if user.is_empty() {
        return None;
    }
    let mut key = String::with_capacity(user.len());
    for (i, b) in user.bytes().enumerate() {
        let plain = b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'@' | b'.');
        if plain && !(i == 0 && b == b'.') {
            key.push(b as char);
        } else {
            let _ = write!(key, "%{b:02X}");
        }
    }
    Some(key)
}
