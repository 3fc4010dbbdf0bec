//! Error mapping guide:
//! - `HostCommandError` covers a single broker launch: descriptor setup and the broker call itself.
//! - `LaunchError` covers the docker-launch state machine; every variant maps to exit code 1.
//! - Display texts are the one-line diagnostics printed by the binaries; keep them stable.
use std::io;
use std::path::PathBuf;

/// Failure while preparing or issuing a host command.
#[derive(Debug, thiserror::Error)]
pub enum HostCommandError {
    /// Descriptor, pipe or pty allocation failed before anything was sent.
    #[error("{what}: {source}")]
    Setup {
        what: String,
        #[source]
        source: io::Error,
    },
    /// The broker was unreachable or rejected the request.
    #[error("{0}")]
    Broker(String),
    /// The exit notification stream ended before our process was reported.
    #[error("exit notification channel closed before process {0} exited")]
    Disconnected(u32),
}

impl HostCommandError {
    pub fn setup(what: impl Into<String>, source: io::Error) -> Self {
        HostCommandError::Setup {
            what: what.into(),
            source,
        }
    }
}

/// Failure of one step of the container launcher.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("First argument must be the file descriptor to wait on")]
    MissingWaitFd,
    #[error("Invalid file descriptor to wait on: {0}")]
    InvalidWaitFd(String),
    #[error("Can't create temporary directory {} for container ID: {source}", .dir.display())]
    TempDir {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Could not get connection to bus: {0}")]
    Bus(String),
    #[error("Can't execute {step} on host: {source}")]
    HostCommand {
        step: &'static str,
        #[source]
        source: HostCommandError,
    },
    #[error("Can't execute {step}: {source}")]
    Spawn {
        step: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("Error reading from fd: {0}")]
    WaitFd(#[source] io::Error),
    #[error("Can't load the container ID: {0}")]
    ContainerId(#[source] io::Error),
    #[error("Error waiting for {step}: {source}")]
    Wait {
        step: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("{step} exited with status {code}")]
    Status { step: &'static str, code: u8 },
}

impl LaunchError {
    /// Every launcher failure exits with 1.
    pub fn exit_code(&self) -> u8 {
        1
    }
}
