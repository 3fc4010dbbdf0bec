#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::channel::mpsc;
use futures::future::LocalBoxFuture;
use futures::stream::BoxStream;
use futures::FutureExt;
use futures::StreamExt;
use tokio::io::AsyncWrite;

use hostexec::broker::{Broker, ExitNotification, HostCommandCall};
use hostexec::docker::ContainerRunner;
use hostexec::errors::{HostCommandError, LaunchError};
use hostexec::forward::CallerStdio;

/// In-memory sink standing in for the caller's stdout or stderr.
#[derive(Clone, Default)]
pub struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> Vec<u8> {
        self.0.borrow().clone()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl AsyncWrite for SharedBuf {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.0.borrow_mut().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Empty stdin, captured stdout and stderr.
pub fn capture_stdio() -> (CallerStdio, SharedBuf, SharedBuf) {
    let out = SharedBuf::default();
    let err = SharedBuf::default();
    let stdio = CallerStdio {
        stdin: Box::new(tokio::io::empty()),
        stdout: Box::new(out.clone()),
        stderr: Box::new(err.clone()),
    };
    (stdio, out, err)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub cwd: PathBuf,
    pub argv: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub flags: u32,
    pub fd_targets: Vec<u32>,
    pub stdin_is_tty: bool,
    pub stdout_is_dev_null: bool,
}

fn is_dev_null(fd: BorrowedFd<'_>) -> bool {
    let Ok(dup) = fd.try_clone_to_owned() else {
        return false;
    };
    match (File::from(dup).metadata(), std::fs::metadata("/dev/null")) {
        (Ok(ours), Ok(null)) => ours.rdev() == null.rdev() && ours.ino() == null.ino(),
        _ => false,
    }
}

/// What the fake broker does with a host command request.
#[derive(Debug, Clone)]
pub enum Behaviour {
    /// Write `stdout` to the command's stdout, then report `status` (or the next queued
    /// status). A notification for an unrelated pid is broadcast first.
    Exit { stdout: Vec<u8>, status: u32 },
    /// Reject the request with this message.
    Reject(String),
    /// Accept and report nothing until `emit_exit` is called.
    Hold,
}

pub const FOREIGN_PID_OFFSET: u32 = 1000;

pub struct FakeBroker {
    behaviour: Behaviour,
    next_pid: Cell<u32>,
    subscribers: RefCell<Vec<mpsc::UnboundedSender<ExitNotification>>>,
    /// Written to the `--cidfile=` path of any command that carries one.
    container_id: Option<String>,
    statuses: RefCell<VecDeque<u32>>,
    /// Signal requests still to be rejected.
    pub fail_signals: Cell<usize>,
    pub calls: RefCell<Vec<RecordedCall>>,
    pub signals: RefCell<Vec<(u32, i32, bool)>>,
}

impl FakeBroker {
    pub fn new(behaviour: Behaviour) -> Self {
        FakeBroker {
            behaviour,
            next_pid: Cell::new(4242),
            subscribers: RefCell::new(Vec::new()),
            container_id: None,
            statuses: RefCell::new(VecDeque::new()),
            fail_signals: Cell::new(0),
            calls: RefCell::new(Vec::new()),
            signals: RefCell::new(Vec::new()),
        }
    }

    pub fn exiting(stdout: &[u8], status: u32) -> Self {
        FakeBroker::new(Behaviour::Exit {
            stdout: stdout.to_vec(),
            status,
        })
    }

    pub fn with_container_id(mut self, id: &str) -> Self {
        self.container_id = Some(id.to_string());
        self
    }

    /// Exit statuses handed out to successive commands before falling back to the default.
    pub fn with_statuses(self, statuses: &[u32]) -> Self {
        self.statuses.borrow_mut().extend(statuses.iter().copied());
        self
    }

    /// Subscriptions whose stream has not been dropped yet.
    pub fn active_subscriptions(&self) -> usize {
        self.subscribers
            .borrow()
            .iter()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    pub fn emit_exit(&self, pid: u32, status: u32) {
        for tx in self.subscribers.borrow().iter() {
            let _ = tx.unbounded_send(ExitNotification { pid, status });
        }
    }

    fn allocate_pid(&self) -> u32 {
        let pid = self.next_pid.get();
        self.next_pid.set(pid + 1);
        pid
    }
}

impl Broker for FakeBroker {
    async fn subscribe_exits(
        &self,
    ) -> Result<BoxStream<'static, ExitNotification>, HostCommandError> {
        let (tx, rx) = mpsc::unbounded();
        self.subscribers.borrow_mut().push(tx);
        Ok(rx.boxed())
    }

    async fn host_command(&self, call: HostCommandCall<'_>) -> Result<u32, HostCommandError> {
        self.calls.borrow_mut().push(RecordedCall {
            cwd: call.cwd.to_path_buf(),
            argv: call.argv.to_vec(),
            env: call.env.clone(),
            flags: call.flags,
            fd_targets: call.fds.slots().iter().map(|(target, _)| *target).collect(),
            stdin_is_tty: nix::unistd::isatty(call.fds.stdin.as_raw_fd()).unwrap_or(false),
            stdout_is_dev_null: is_dev_null(call.fds.stdout.as_fd()),
        });

        if let Some(id) = &self.container_id {
            if let Some(cidfile) = call.argv.iter().find_map(|a| a.strip_prefix("--cidfile=")) {
                std::fs::write(cidfile, id).map_err(|e| HostCommandError::setup("cidfile", e))?;
            }
        }

        match &self.behaviour {
            Behaviour::Reject(msg) => Err(HostCommandError::Broker(msg.clone())),
            Behaviour::Hold => Ok(self.allocate_pid()),
            Behaviour::Exit { stdout, status } => {
                let pid = self.allocate_pid();
                let fd = call
                    .fds
                    .stdout
                    .try_clone()
                    .map_err(|e| HostCommandError::setup("dup stdout", e))?;
                let mut out = File::from(fd);
                out.write_all(stdout)
                    .map_err(|e| HostCommandError::setup("write stdout", e))?;
                drop(out);
                let status = self.statuses.borrow_mut().pop_front().unwrap_or(*status);
                self.emit_exit(pid + FOREIGN_PID_OFFSET, 9);
                self.emit_exit(pid, status);
                Ok(pid)
            }
        }
    }

    async fn host_command_signal(
        &self,
        pid: u32,
        signum: i32,
        to_process_group: bool,
    ) -> Result<(), HostCommandError> {
        self.signals.borrow_mut().push((pid, signum, to_process_group));
        let failures = self.fail_signals.get();
        if failures > 0 {
            self.fail_signals.set(failures - 1);
            return Err(HostCommandError::Broker("signal rejected".to_string()));
        }
        Ok(())
    }
}

/// How the fake container runtime behaves.
#[derive(Debug, Clone)]
pub struct RunnerScript {
    /// Written to the `--cidfile` path on start; `None` leaves the file missing.
    pub container_id: Option<String>,
    /// Resolve the exit future right away instead of never.
    pub exits_immediately: bool,
    pub fail_start: bool,
    pub rm_code: u8,
}

impl Default for RunnerScript {
    fn default() -> Self {
        RunnerScript {
            container_id: Some("c0ffee1234".to_string()),
            exits_immediately: false,
            fail_start: false,
            rm_code: 0,
        }
    }
}

#[derive(Default)]
pub struct FakeRunner {
    pub script: RunnerScript,
    pub started: RefCell<Vec<(Vec<String>, bool)>>,
    pub quiet: RefCell<Vec<Vec<String>>>,
}

impl FakeRunner {
    pub fn new(script: RunnerScript) -> Self {
        FakeRunner {
            script,
            ..FakeRunner::default()
        }
    }
}

impl ContainerRunner for FakeRunner {
    async fn start(
        &self,
        argv: &[String],
        use_pty: bool,
    ) -> Result<LocalBoxFuture<'static, ()>, LaunchError> {
        self.started.borrow_mut().push((argv.to_vec(), use_pty));
        if self.script.fail_start {
            return Err(LaunchError::Spawn {
                step: "docker-run",
                source: io::Error::new(io::ErrorKind::NotFound, "no runtime"),
            });
        }
        if let Some(id) = &self.script.container_id {
            let cidfile = argv
                .iter()
                .find_map(|a| a.strip_prefix("--cidfile="))
                .expect("cidfile argument");
            std::fs::write(cidfile, id).expect("write cidfile");
        }
        if self.script.exits_immediately {
            Ok(futures::future::ready(()).boxed_local())
        } else {
            Ok(futures::future::pending().boxed_local())
        }
    }

    async fn run_quiet(&self, argv: &[String]) -> Result<u8, LaunchError> {
        self.quiet.borrow_mut().push(argv.to_vec());
        Ok(self.script.rm_code)
    }
}

pub fn argv(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}
