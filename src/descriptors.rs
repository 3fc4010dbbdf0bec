//! Choose and allocate the three descriptors a host command inherits.
//!
//! Three shapes are produced:
//! - pipes (default): the broker gets one end of each pipe, we forward the other end
//!   against our own stdio. Handing the broker our real stdio would make older
//!   brokers try to take over the controlling terminal.
//! - pty: one freshly allocated pseudo-terminal; its slave is opened once per slot
//!   and the master stays with us.
//! - discard-stdout: the stdout slot is `/dev/null`.
//!
//! Every descriptor is an `OwnedFd`, so an error half-way through closes whatever
//! was already opened.
use std::fs::OpenOptions;
use std::os::fd::{AsFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;

use nix::fcntl::OFlag;
use nix::pty::{grantpt, posix_openpt, ptsname_r, unlockpt};

use crate::errors::HostCommandError;

const DEV_NULL: &str = "/dev/null";

/// Per-invocation descriptor options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandFlags {
    pub use_pty: bool,
    pub stdout_to_dev_null: bool,
}

impl CommandFlags {
    pub const NONE: CommandFlags = CommandFlags {
        use_pty: false,
        stdout_to_dev_null: false,
    };

    pub fn pty() -> Self {
        CommandFlags {
            use_pty: true,
            ..Self::NONE
        }
    }

    pub fn discard_stdout() -> Self {
        CommandFlags {
            stdout_to_dev_null: true,
            ..Self::NONE
        }
    }
}

/// Descriptors presented to the remote command as fds 0, 1 and 2.
#[derive(Debug)]
pub struct DescriptorSet {
    pub stdin: OwnedFd,
    pub stdout: OwnedFd,
    pub stderr: OwnedFd,
}

impl DescriptorSet {
    /// `(target fd, descriptor)` pairs in slot order.
    pub fn slots(&self) -> [(u32, BorrowedFd<'_>); 3] {
        [
            (0, self.stdin.as_fd()),
            (1, self.stdout.as_fd()),
            (2, self.stderr.as_fd()),
        ]
    }
}

/// Our side of the descriptors, driven by the stream forwarder.
#[derive(Debug)]
pub enum LocalEnds {
    Pipes {
        /// Write end feeding the remote stdin.
        stdin: OwnedFd,
        /// Read end of the remote stdout; absent when stdout goes to `/dev/null`.
        stdout: Option<OwnedFd>,
        /// Read end of the remote stderr.
        stderr: OwnedFd,
    },
    Pty {
        master: OwnedFd,
    },
}

#[derive(Debug)]
pub struct Prepared {
    pub remote: DescriptorSet,
    pub local: LocalEnds,
}

pub fn prepare(flags: CommandFlags) -> Result<Prepared, HostCommandError> {
    let dev_null = if flags.stdout_to_dev_null {
        Some(open_dev_null()?)
    } else {
        None
    };

    if flags.use_pty {
        prepare_pty(dev_null)
    } else {
        prepare_pipes(dev_null)
    }
}

fn open_dev_null() -> Result<OwnedFd, HostCommandError> {
    OpenOptions::new()
        .write(true)
        .open(DEV_NULL)
        .map(OwnedFd::from)
        .map_err(|e| HostCommandError::setup(format!("Error opening {DEV_NULL}"), e))
}

fn prepare_pty(dev_null: Option<OwnedFd>) -> Result<Prepared, HostCommandError> {
    let setup = |e: nix::errno::Errno| {
        HostCommandError::setup("Error opening PTY master device", e.into())
    };
    let pty = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_CLOEXEC).map_err(setup)?;
    grantpt(&pty).map_err(setup)?;
    unlockpt(&pty).map_err(setup)?;
    let slave_path = ptsname_r(&pty).map_err(setup)?;
    // SAFETY: into_raw_fd hands over sole ownership of the master descriptor.
    let master = unsafe { OwnedFd::from_raw_fd(pty.into_raw_fd()) };

    let stdin = open_slave(&slave_path, false)?;
    let stdout = match dev_null {
        Some(fd) => fd,
        None => open_slave(&slave_path, true)?,
    };
    let stderr = open_slave(&slave_path, true)?;

    tracing::debug!(slave = %slave_path, "allocated pty for host command");
    Ok(Prepared {
        remote: DescriptorSet {
            stdin,
            stdout,
            stderr,
        },
        local: LocalEnds::Pty { master },
    })
}

fn open_slave(path: &str, write: bool) -> Result<OwnedFd, HostCommandError> {
    let mode = if write { libc::O_WRONLY } else { libc::O_RDONLY };
    OpenOptions::new()
        .read(!write)
        .write(write)
        .custom_flags(libc::O_NOCTTY)
        .open(path)
        .map(OwnedFd::from)
        .map_err(|e| HostCommandError::setup(format!("Error opening slave fd (mode={mode})"), e))
}

fn prepare_pipes(dev_null: Option<OwnedFd>) -> Result<Prepared, HostCommandError> {
    let pipe = || {
        nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(|e| {
            HostCommandError::setup("Error opening pipes for channels", e.into())
        })
    };

    let (stdin_read, stdin_write) = pipe()?;
    let (remote_stdout, local_stdout) = match dev_null {
        Some(fd) => (fd, None),
        None => {
            let (read, write) = pipe()?;
            (write, Some(read))
        }
    };
    let (stderr_read, stderr_write) = pipe()?;

    Ok(Prepared {
        remote: DescriptorSet {
            stdin: stdin_read,
            stdout: remote_stdout,
            stderr: stderr_write,
        },
        local: LocalEnds::Pipes {
            stdin: stdin_write,
            stdout: local_stdout,
            stderr: stderr_read,
        },
    })
}
