//! Run a container, wait for a completion token, then force-remove it.
//!
//! ```text
//! Init -> Starting -> Running -> Waiting -> StoppingContainer -> Done
//!   \________\___________\__________\______________\___________> Failed
//! ```
//! `Waiting` ends on whichever comes first: the runtime process exits, or the wait
//! descriptor yields its first byte (or end-of-file). The state directory is removed
//! on every path.
use std::io;
use std::os::fd::OwnedFd;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use futures::future::LocalBoxFuture;
use futures::FutureExt;
use tokio::io::AsyncReadExt;

use super::runtime::{container_runtime_path, rm_args, run_args};
use super::state::ContainerState;
use crate::broker::{Broker, CommandRequest, HostCommandClient};
use crate::descriptors::CommandFlags;
use crate::errors::LaunchError;
use crate::exit::WaitStatus;
use crate::forward::CallerStdio;
use crate::terminal::enter_raw_mode;

pub const RUN_STEP: &str = "docker-run";
pub const RM_STEP: &str = "docker-rm";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchState {
    Init,
    Starting,
    Running,
    Waiting,
    StoppingContainer,
    Done,
    Failed,
}

/// Where the container runtime actually runs.
#[allow(async_fn_in_trait)]
pub trait ContainerRunner {
    /// Start `argv`; the returned future resolves once it has exited.
    async fn start(
        &self,
        argv: &[String],
        use_pty: bool,
    ) -> Result<LocalBoxFuture<'static, ()>, LaunchError>;

    /// Run `argv` to completion with its output discarded and return its exit code.
    async fn run_quiet(&self, argv: &[String]) -> Result<u8, LaunchError>;
}

fn split_argv<'a>(
    argv: &'a [String],
    step: &'static str,
) -> Result<(&'a str, &'a [String]), LaunchError> {
    match argv.split_first() {
        Some((program, args)) => Ok((program.as_str(), args)),
        None => Err(LaunchError::Spawn {
            step,
            source: io::Error::new(io::ErrorKind::InvalidInput, "empty command line"),
        }),
    }
}

/// Runs the container runtime as our own child process.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalRunner;

impl ContainerRunner for LocalRunner {
    async fn start(
        &self,
        argv: &[String],
        _use_pty: bool,
    ) -> Result<LocalBoxFuture<'static, ()>, LaunchError> {
        let (program, args) = split_argv(argv, RUN_STEP)?;
        let spawn_err = |source| LaunchError::Spawn {
            step: RUN_STEP,
            source,
        };
        let path = container_runtime_path(program).map_err(spawn_err)?;
        let mut child = tokio::process::Command::new(path)
            .args(args)
            .stdin(Stdio::inherit())
            .spawn()
            .map_err(spawn_err)?;
        Ok(async move {
            match child.wait().await {
                Ok(status) => tracing::debug!(%status, "container runtime exited"),
                Err(e) => tracing::warn!(error = %e, "waiting for container runtime failed"),
            }
        }
        .boxed_local())
    }

    async fn run_quiet(&self, argv: &[String]) -> Result<u8, LaunchError> {
        let (program, args) = split_argv(argv, RM_STEP)?;
        let path = container_runtime_path(program).map_err(|source| LaunchError::Spawn {
            step: RM_STEP,
            source,
        })?;
        let child = tokio::process::Command::new(path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                step: RM_STEP,
                source,
            })?;
        let output = child
            .wait_with_output()
            .await
            .map_err(|source| LaunchError::Wait {
                step: RM_STEP,
                source,
            })?;
        Ok(WaitStatus(output.status.into_raw() as u32).to_exit_code())
    }
}

/// Runs the container runtime on the host through the broker.
pub struct BrokerRunner<B> {
    client: HostCommandClient<B>,
    cwd: PathBuf,
    term: Option<String>,
    drain: Duration,
    stdio: Box<dyn Fn() -> CallerStdio>,
}

impl<B: Broker + 'static> BrokerRunner<B> {
    pub fn new(
        client: HostCommandClient<B>,
        cwd: impl Into<PathBuf>,
        term: Option<String>,
        drain: Duration,
    ) -> Self {
        BrokerRunner {
            client,
            cwd: cwd.into(),
            term,
            drain,
            stdio: Box::new(CallerStdio::process),
        }
    }

    /// Wire the runtime's stdio to `stdio()` instead of our own process stdio.
    pub fn with_stdio(mut self, stdio: impl Fn() -> CallerStdio + 'static) -> Self {
        self.stdio = Box::new(stdio);
        self
    }

    fn request(&self, argv: &[String], flags: CommandFlags) -> CommandRequest {
        CommandRequest::new(argv.to_vec(), flags, &self.cwd, self.term.as_deref())
    }
}

impl<B: Broker + 'static> ContainerRunner for BrokerRunner<B> {
    async fn start(
        &self,
        argv: &[String],
        use_pty: bool,
    ) -> Result<LocalBoxFuture<'static, ()>, LaunchError> {
        let flags = if use_pty {
            CommandFlags::pty()
        } else {
            CommandFlags::NONE
        };
        let command = self
            .client
            .launch(&self.request(argv, flags), (self.stdio)())
            .await
            .map_err(|source| LaunchError::HostCommand {
                step: RUN_STEP,
                source,
            })?;
        let drain = self.drain;
        Ok(async move {
            match command.wait(drain).await {
                Ok(status) => {
                    tracing::debug!(status = status.0, "container runtime exited on host")
                }
                Err(e) => tracing::warn!(error = %e, "lost track of container runtime on host"),
            }
        }
        .boxed_local())
    }

    async fn run_quiet(&self, argv: &[String]) -> Result<u8, LaunchError> {
        let stdio = CallerStdio {
            stdin: Box::new(tokio::io::empty()),
            stdout: Box::new(tokio::io::sink()),
            stderr: Box::new(tokio::io::stderr()),
        };
        let host_err = |source| LaunchError::HostCommand {
            step: RM_STEP,
            source,
        };
        let command = self
            .client
            .launch(&self.request(argv, CommandFlags::discard_stdout()), stdio)
            .await
            .map_err(host_err)?;
        let status = command.wait(self.drain).await.map_err(host_err)?;
        Ok(status.to_exit_code())
    }
}

/// What to launch and where to keep its state.
#[derive(Debug)]
pub struct LaunchOptions {
    /// Teardown starts on the first byte or end-of-file read from this descriptor.
    pub wait_fd: OwnedFd,
    /// Parent of the private state directory; must exist.
    pub state_root: PathBuf,
    pub container_runtime: String,
    pub runtime_args: Vec<String>,
    pub use_pty: bool,
    /// Put the caller's terminal in raw mode for the lifetime of the launch.
    pub raw_terminal: bool,
}

async fn read_token(fd: OwnedFd) -> io::Result<()> {
    let mut file = tokio::fs::File::from_std(std::fs::File::from(fd));
    let mut buf = [0u8; 1];
    loop {
        match file.read(&mut buf).await {
            Ok(n) => {
                tracing::debug!(bytes = n, "wait descriptor fired");
                return Ok(());
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Drives one container launch. Must run inside a `tokio::task::LocalSet`.
///
/// Process-wide signal handling (the `Init` step) is the caller's job; see
/// `signals::ignore_termination_signals`.
pub struct Launcher<'r, R> {
    runner: &'r R,
    state: LaunchState,
}

impl<'r, R: ContainerRunner> Launcher<'r, R> {
    pub fn new(runner: &'r R) -> Self {
        Launcher {
            runner,
            state: LaunchState::Init,
        }
    }

    pub fn state(&self) -> LaunchState {
        self.state
    }

    fn enter(&mut self, next: LaunchState) {
        tracing::debug!(from = ?self.state, to = ?next, "launcher state");
        self.state = next;
    }

    pub async fn run(&mut self, opts: LaunchOptions) -> Result<(), LaunchError> {
        let res = self.drive(opts).await;
        match &res {
            Ok(()) => self.enter(LaunchState::Done),
            Err(e) => {
                tracing::debug!(error = %e, "launch failed");
                self.enter(LaunchState::Failed);
            }
        }
        res
    }

    async fn drive(&mut self, opts: LaunchOptions) -> Result<(), LaunchError> {
        self.enter(LaunchState::Starting);
        let mut container = ContainerState::create(&opts.state_root)?;
        let mut token = tokio::task::spawn_local(read_token(opts.wait_fd));

        let argv = run_args(
            &opts.container_runtime,
            container.cidfile(),
            &opts.runtime_args,
        );
        let _raw = if opts.raw_terminal {
            enter_raw_mode()
        } else {
            None
        };
        let exited = self.runner.start(&argv, opts.use_pty).await?;
        self.enter(LaunchState::Running);

        self.enter(LaunchState::Waiting);
        tokio::select! {
            _ = exited => {
                tracing::debug!("container runtime exited before the wait descriptor fired");
            }
            res = &mut token => match res {
                Ok(read) => read.map_err(LaunchError::WaitFd)?,
                Err(join) => return Err(LaunchError::WaitFd(io::Error::other(join))),
            },
        }
        token.abort();

        self.enter(LaunchState::StoppingContainer);
        let id = container.read_container_id().await?;
        let code = self
            .runner
            .run_quiet(&rm_args(&opts.container_runtime, &id))
            .await?;
        if code != 0 {
            return Err(LaunchError::Status {
                step: RM_STEP,
                code,
            });
        }
        container.cleanup();
        Ok(())
    }
}
