use std::os::fd::{FromRawFd, OwnedFd, RawFd};

use clap::Parser;
use nix::fcntl::{fcntl, FcntlArg};

use crate::descriptors::CommandFlags;
use crate::errors::LaunchError;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "run-host",
    version,
    about = "Run a command on the host from inside a Flatpak sandbox"
)]
pub struct RunHostCli {
    /// Attach the command to a new pseudo-terminal
    #[arg(long)]
    pub pty: bool,

    /// Command and arguments to run on the host
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl RunHostCli {
    pub fn flags(&self) -> CommandFlags {
        if self.pty {
            CommandFlags::pty()
        } else {
            CommandFlags::NONE
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "docker-launch",
    version,
    about = "Run a container and force-remove it once a file descriptor becomes readable"
)]
pub struct DockerLaunchCli {
    /// Attach the container runtime to a pseudo-terminal (sandbox only)
    #[arg(long)]
    pub pty: bool,

    /// File descriptor to wait on; the first byte or end-of-file starts teardown
    #[arg(value_name = "FD")]
    pub wait_fd: Option<String>,

    /// Arguments appended to `<runtime> run --cidfile=<path>`, never parsed by us
    #[arg(skip)]
    pub runtime_args: Vec<String>,
}

impl DockerLaunchCli {
    /// Only `[--pty] FD` is ours; everything after FD belongs to the runtime verbatim,
    /// including its `-h`, `--help` or `--pty`.
    pub fn parse_args(argv: impl IntoIterator<Item = String>) -> Result<Self, u8> {
        let mut argv: Vec<String> = argv.into_iter().collect();
        let pty_flag = argv.get(1).is_some_and(|a| a == "--pty");
        let head_len = (2 + usize::from(pty_flag)).min(argv.len());
        let runtime_args = argv.split_off(head_len);
        let mut cli: DockerLaunchCli = parse_or_exit_code(argv)?;
        cli.runtime_args = runtime_args;
        Ok(cli)
    }
}

/// Take ownership of the inherited descriptor named by the FD argument.
pub fn take_wait_fd(arg: Option<&str>) -> Result<OwnedFd, LaunchError> {
    let arg = arg.ok_or(LaunchError::MissingWaitFd)?;
    let fd: RawFd = arg
        .trim()
        .parse()
        .ok()
        .filter(|fd| *fd >= 0)
        .ok_or_else(|| LaunchError::InvalidWaitFd(arg.to_string()))?;
    fcntl(fd, FcntlArg::F_GETFD).map_err(|e| LaunchError::InvalidWaitFd(format!("{fd}: {e}")))?;
    // SAFETY: the descriptor is open and was handed to us; nothing else in this process owns it.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Parse `argv`, printing help, version or usage errors ourselves so failures exit 1.
pub fn parse_or_exit_code<P: Parser>(argv: impl IntoIterator<Item = String>) -> Result<P, u8> {
    match P::try_parse_from(argv) {
        Ok(cli) => Ok(cli),
        Err(e) => {
            let _ = e.print();
            Err(if e.use_stderr() { 1 } else { 0 })
        }
    }
}
