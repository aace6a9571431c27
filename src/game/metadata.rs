//! Per-game descriptor: where the executable lives and which files make up
//! the save state.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::archive;

/// Name of the descriptor file inside an installed game's directory.
pub const METADATA_FILE: &str = "metadata.json";

/// File name of an exported save archive.
pub const SAVE_EXPORT_FILE: &str = "save_export.zip";

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("failed to read game metadata {0}: {1}")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("failed to parse game metadata {0}: {1}")]
    Parse(PathBuf, #[source] serde_json::Error),

    #[error("cannot expand save root {root}: {reason}")]
    SaveRoot { root: String, reason: String },

    #[error("invalid save pattern {0}: {1}")]
    Pattern(String, #[source] glob::PatternError),

    #[error("save file i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to archive save: {0}")]
    Archive(#[from] zip::result::ZipError),
}

/// A deflated save archive in its own temporary directory, removed on drop.
#[derive(Debug)]
pub struct SaveArchive {
    _dir: tempfile::TempDir,
    path: PathBuf,
}

impl SaveArchive {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A glob, evaluated relative to `save_root/pattern_root`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavePattern {
    pub pattern_root: String,
    pub pattern: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameMetadata {
    /// Executable path relative to the game directory.
    pub exe_location: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Directory holding save files; environment variables are expanded.
    pub save_root: String,
    #[serde(default)]
    pub save_patterns: Vec<SavePattern>,
}

impl GameMetadata {
    /// Load `<game_dir>/metadata.json`.
    pub fn load_for_game(game_dir: &Path) -> Result<Self, MetadataError> {
        Self::load(&game_dir.join(METADATA_FILE))
    }

    pub fn load(path: &Path) -> Result<Self, MetadataError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| MetadataError::Read(path.to_path_buf(), e))?;
        let mut metadata: Self = serde_json::from_str(&contents)
            .map_err(|e| MetadataError::Parse(path.to_path_buf(), e))?;
        metadata.save_root = expand_root(&metadata.save_root)?;
        Ok(metadata)
    }

    pub fn executable(&self, game_dir: &Path) -> PathBuf {
        game_dir.join(&self.exe_location)
    }

    pub fn save_root(&self) -> &Path {
        Path::new(&self.save_root)
    }

    /// Replace the live save files with those in `source`.
    ///
    /// Files matching any pattern are deleted first, so importing `None`
    /// leaves the game with a fresh save.
    pub fn import_save(&self, source: Option<&Path>) -> Result<(), MetadataError> {
        let root = self.save_root();

        for pat in &self.save_patterns {
            let pat_root = root.join(&pat.pattern_root);
            std::fs::create_dir_all(&pat_root)?;
            for file in matching_files(&pat_root, &pat.pattern)? {
                std::fs::remove_file(&file)?;
            }
        }

        let Some(source) = source else {
            return Ok(());
        };

        let mut copied = 0usize;
        for pat in &self.save_patterns {
            for file in matching_files(&source.join(&pat.pattern_root), &pat.pattern)? {
                let Ok(rel) = file.strip_prefix(source) else {
                    continue;
                };
                let dest = root.join(rel);
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(&file, &dest)?;
                copied += 1;
            }
        }
        tracing::debug!(copied, root = %root.display(), "save imported");
        Ok(())
    }

    /// Archive the live save files, each stored under its path relative to
    /// the save root.
    pub fn export_save(&self) -> Result<SaveArchive, MetadataError> {
        let root = self.save_root();
        let dir = tempfile::Builder::new().prefix("save-export-").tempdir()?;
        let path = dir.path().join(SAVE_EXPORT_FILE);

        let mut files = Vec::new();
        for pat in &self.save_patterns {
            files.extend(matching_files(&root.join(&pat.pattern_root), &pat.pattern)?);
        }
        let collected = archive::pack(root, files.iter().map(|f| f.as_path()), &path)?;
        tracing::debug!(collected, root = %root.display(), "save exported");
        Ok(SaveArchive { _dir: dir, path })
    }
}

fn expand_root(root: &str) -> Result<String, MetadataError> {
    shellexpand::full(root)
        .map(|s| s.into_owned())
        .map_err(|e| MetadataError::SaveRoot {
            root: root.to_string(),
            reason: e.to_string(),
        })
}

/// Regular files under `dir` matching `pattern`.
fn matching_files(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, MetadataError> {
    let full = format!(
        "{}/{}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        pattern
    );
    let paths = glob::glob(&full).map_err(|e| MetadataError::Pattern(full.clone(), e))?;
    Ok(paths
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .collect())
}
