//! One-shot detection of whether we run inside the Flatpak sandbox.
use std::path::{Path, PathBuf};

/// Marker file the sandbox places in the per-user runtime directory.
pub const SANDBOX_MARKER: &str = "flatpak-info";

/// Result of sandbox detection; computed once and passed to whoever needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sandbox {
    inside: bool,
    runtime_dir: PathBuf,
}

impl Sandbox {
    pub fn detect(runtime_dir: impl Into<PathBuf>) -> Self {
        let runtime_dir = runtime_dir.into();
        let inside = runtime_dir.join(SANDBOX_MARKER).exists();
        tracing::debug!(inside, runtime_dir = %runtime_dir.display(), "sandbox detection");
        Sandbox {
            inside,
            runtime_dir,
        }
    }

    pub fn new(inside: bool, runtime_dir: impl Into<PathBuf>) -> Self {
        Sandbox {
            inside,
            runtime_dir: runtime_dir.into(),
        }
    }

    pub fn inside(&self) -> bool {
        self.inside
    }

    pub fn runtime_dir(&self) -> &Path {
        &self.runtime_dir
    }

    /// Directory for launcher state. Inside the sandbox this must be visible to the
    /// host, so it lives under `<runtime dir>/app/<app id>`.
    pub fn state_root(&self, app_id: &str) -> PathBuf {
        if self.inside {
            self.runtime_dir.join("app").join(app_id)
        } else {
            std::env::temp_dir()
        }
    }
}
