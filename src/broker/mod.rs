//! Client side of the host-command broker.
//!
//! A launch runs in two phases: `HostCommandClient::launch` subscribes to exit
//! notifications, sends the request with our descriptors attached and returns a
//! `RemoteCommand`; `RemoteCommand::wait` consumes the handle and resolves once the
//! broker reports that pid. A dispatcher task filters the notification stream by
//! pid and drops the subscription after the first match.
//!
//! Everything here runs on a single thread inside a `tokio::task::LocalSet`.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use nix::sys::signal::Signal;
use tokio::sync::oneshot;

use crate::descriptors::{self, CommandFlags, DescriptorSet};
use crate::errors::HostCommandError;
use crate::exit::WaitStatus;
use crate::forward::{CallerStdio, Endpoints, Forwarders};

pub mod dbus;

/// Ask the broker to start the command with an empty environment plus `env`.
pub const HOST_COMMAND_FLAGS_CLEAR_ENV: u32 = 1 << 0;

/// Environment variables forwarded to the host command.
pub const FORWARDED_ENV: &[&str] = &["TERM"];

/// One "process exited" broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitNotification {
    pub pid: u32,
    pub status: u32,
}

/// Wire-level arguments of a host command request.
#[derive(Debug)]
pub struct HostCommandCall<'a> {
    pub cwd: &'a Path,
    pub argv: &'a [String],
    pub fds: &'a DescriptorSet,
    pub env: &'a BTreeMap<String, String>,
    pub flags: u32,
}

/// The broker as seen by the client.
#[allow(async_fn_in_trait)]
pub trait Broker {
    /// Subscribe to exit notifications; dropping the stream unsubscribes.
    async fn subscribe_exits(
        &self,
    ) -> Result<BoxStream<'static, ExitNotification>, HostCommandError>;

    /// Start a command on the host and return its pid.
    async fn host_command(&self, call: HostCommandCall<'_>) -> Result<u32, HostCommandError>;

    /// Deliver `signum` to a host command (or its process group).
    async fn host_command_signal(
        &self,
        pid: u32,
        signum: i32,
        to_process_group: bool,
    ) -> Result<(), HostCommandError>;
}

/// An immutable description of what to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub argv: Vec<String>,
    pub flags: CommandFlags,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
}

impl CommandRequest {
    /// Build a request, forwarding `TERM` when the caller has one.
    pub fn new(
        argv: Vec<String>,
        flags: CommandFlags,
        cwd: impl Into<PathBuf>,
        term: Option<&str>,
    ) -> Self {
        let mut env = BTreeMap::new();
        if let Some(term) = term {
            env.insert(FORWARDED_ENV[0].to_string(), term.to_string());
        }
        CommandRequest {
            argv,
            flags,
            cwd: cwd.into(),
            env,
        }
    }
}

/// A command running under the broker. Consumed by `wait`, so at most one exit is
/// ever observed per launch.
#[derive(Debug)]
pub struct RemoteCommand {
    pid: u32,
    exit: oneshot::Receiver<WaitStatus>,
    forwarders: Forwarders,
}

impl RemoteCommand {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Wait for the exit notification, then let output forwarding drain for up to `drain`.
    pub async fn wait(self, drain: Duration) -> Result<WaitStatus, HostCommandError> {
        let RemoteCommand {
            pid,
            exit,
            forwarders,
        } = self;
        let status = exit.await.map_err(|_| HostCommandError::Disconnected(pid))?;
        tracing::debug!(pid, status = status.0, "host command exited");
        forwarders.drain(drain).await;
        Ok(status)
    }
}

pub struct HostCommandClient<B> {
    broker: Rc<B>,
}

impl<B> Clone for HostCommandClient<B> {
    fn clone(&self) -> Self {
        HostCommandClient {
            broker: Rc::clone(&self.broker),
        }
    }
}

impl<B: Broker> HostCommandClient<B> {
    pub fn new(broker: Rc<B>) -> Self {
        HostCommandClient { broker }
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Start `request` on the host, wiring its stdio to `stdio`.
    ///
    /// On error nothing stays registered: the exit subscription and every prepared
    /// descriptor are dropped before returning.
    pub async fn launch(
        &self,
        request: &CommandRequest,
        stdio: CallerStdio,
    ) -> Result<RemoteCommand, HostCommandError> {
        let prepared = descriptors::prepare(request.flags)?;
        let endpoints = Endpoints::new(prepared.local)
            .map_err(|e| HostCommandError::setup("Error setting up stream forwarding", e))?;

        let exits = self.broker.subscribe_exits().await?;
        let call = HostCommandCall {
            cwd: &request.cwd,
            argv: &request.argv,
            fds: &prepared.remote,
            env: &request.env,
            flags: HOST_COMMAND_FLAGS_CLEAR_ENV,
        };
        let pid = self.broker.host_command(call).await?;
        // The broker holds its own copies now; ours would keep the pipes open.
        drop(prepared.remote);
        tracing::debug!(pid, argv = ?request.argv, "host command started");

        let (tx, rx) = oneshot::channel();
        tokio::task::spawn_local(dispatch_exit(pid, exits, tx));
        let forwarders = endpoints.spawn(stdio);

        Ok(RemoteCommand {
            pid,
            exit: rx,
            forwarders,
        })
    }

    pub async fn signal(
        &self,
        pid: u32,
        signal: Signal,
        to_process_group: bool,
    ) -> Result<(), HostCommandError> {
        tracing::debug!(pid, ?signal, to_process_group, "forwarding signal to host command");
        self.broker
            .host_command_signal(pid, signal as i32, to_process_group)
            .await
    }
}

/// Resolve `tx` with the first notification for `pid`; the subscription goes away with `exits`.
async fn dispatch_exit(
    pid: u32,
    mut exits: BoxStream<'static, ExitNotification>,
    tx: oneshot::Sender<WaitStatus>,
) {
    while let Some(note) = exits.next().await {
        if note.pid == pid {
            let _ = tx.send(WaitStatus(note.status));
            return;
        }
        tracing::trace!(pid = note.pid, "ignoring exit of another host command");
    }
    tracing::debug!(pid, "exit notification stream ended early");
}
