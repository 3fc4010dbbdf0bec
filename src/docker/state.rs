//! Per-launch state directory holding the container id file.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::errors::LaunchError;

pub const STATE_DIR_PREFIX: &str = "hostexec.";
pub const CID_FILE_NAME: &str = "cid";

/// A private temporary directory with the id file path inside it.
///
/// The directory and the id file are removed by `cleanup` or on drop, whichever comes
/// first; removal failures are logged and otherwise ignored.
#[derive(Debug)]
pub struct ContainerState {
    dir: Option<TempDir>,
    path: PathBuf,
    cidfile: PathBuf,
}

impl ContainerState {
    /// Create `hostexec.XXXXXX` under `root`. `root` itself must already exist.
    pub fn create(root: &Path) -> Result<Self, LaunchError> {
        let dir = tempfile::Builder::new()
            .prefix(STATE_DIR_PREFIX)
            .rand_bytes(6)
            .tempdir_in(root)
            .map_err(|source| LaunchError::TempDir {
                dir: root.join(format!("{STATE_DIR_PREFIX}XXXXXX")),
                source,
            })?;
        let path = dir.path().to_path_buf();
        let cidfile = path.join(CID_FILE_NAME);
        tracing::debug!(dir = %path.display(), "created container state directory");
        Ok(ContainerState {
            dir: Some(dir),
            path,
            cidfile,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.path
    }

    pub fn cidfile(&self) -> &Path {
        &self.cidfile
    }

    /// The id exactly as the runtime wrote it.
    pub async fn read_container_id(&self) -> Result<String, LaunchError> {
        tokio::fs::read_to_string(&self.cidfile)
            .await
            .map_err(LaunchError::ContainerId)
    }

    /// Remove the id file and the directory. Safe to call any number of times.
    pub fn cleanup(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        match fs::remove_file(&self.cidfile) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                let file = self.cidfile.display();
                tracing::debug!(error = %e, %file, "failed to remove id file")
            }
        }
        if let Err(e) = dir.close() {
            if e.kind() != io::ErrorKind::NotFound {
                let dir = self.path.display();
                tracing::debug!(error = %e, %dir, "failed to remove state directory");
            }
        }
    }
}

impl Drop for ContainerState {
    fn drop(&mut self) {
        self.cleanup();
    }
}
