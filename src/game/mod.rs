//! Game assets, launch strategies and save state.

mod archive;
pub mod install;
pub mod launcher;
pub mod metadata;
pub mod saves;

pub use install::{GameInstaller, InstallError, LocalRepoInstaller};
pub use launcher::{
    ExecutableLauncher, GameLauncher, LaunchError, LauncherKind, LauncherRegistry,
    PowerShellLauncher,
};
pub use metadata::{GameMetadata, MetadataError, SaveArchive, SavePattern};
pub use saves::{LocalSaveStore, SaveError, SaveStore};
