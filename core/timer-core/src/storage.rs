//! Path management for the shared container.
//!
//! Both processes locate the container the same way: the
//! `AMBIENT_TIMER_CONTAINER` environment variable when set, otherwise
//! `~/.ambient-timer/group`. Tests use [`ContainerPaths::with_root`].
//!
//! Nothing here creates directories except [`ContainerPaths::provision`],
//! which only the main process calls. A missing container in the extension
//! is a provisioning bug and must surface as a failed read, not a silently
//! created empty directory.

use std::path::{Path, PathBuf};

use crate::error::{Result, TimerError};

pub const CONTAINER_ENV: &str = "AMBIENT_TIMER_CONTAINER";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerPaths {
    root: PathBuf,
}

impl ContainerPaths {
    /// Resolves the container from the environment. `None` when neither the
    /// override nor a home directory is available.
    pub fn from_env() -> Option<Self> {
        if let Some(root) = std::env::var_os(CONTAINER_ENV).filter(|raw| !raw.is_empty()) {
            return Some(Self::with_root(PathBuf::from(root)));
        }
        dirs::home_dir().map(|home| Self::with_root(home.join(".ambient-timer").join("group")))
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    /// Creates the container and its log directory.
    pub fn provision(&self) -> Result<()> {
        fs_err::create_dir_all(self.logs_dir())
            .map_err(|err| TimerError::io("provisioning shared container", err))
    }

    /// Current timer record, written by the main process only.
    pub fn state_file(&self) -> PathBuf {
        self.root.join("timer-state.json")
    }

    /// Single-slot relay action written by the extension.
    pub fn action_file(&self) -> PathBuf {
        self.root.join("timer-action.json")
    }

    /// Surface registration maintained by the file-backed host.
    pub fn surface_file(&self) -> PathBuf {
        self.root.join("surface.json")
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("ambient-timer.toml")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Control socket of the timer daemon.
    pub fn socket_file(&self) -> PathBuf {
        self.root.join("daemon.sock")
    }
}
