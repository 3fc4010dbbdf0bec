//! Local signal handling: relaying to a host command, or ignoring during teardown.
use std::io;

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use tokio::signal::unix::{signal as watch_signal, SignalKind};
use tokio::task::JoinHandle;

use crate::broker::{Broker, HostCommandClient};

/// Forward `signal` to the host command, or to its whole process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalWatch {
    pub signal: Signal,
    pub to_process_group: bool,
}

/// Which local signals are relayed, and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalPolicy {
    watches: Vec<SignalWatch>,
}

impl SignalPolicy {
    pub fn new(watches: Vec<SignalWatch>) -> Self {
        SignalPolicy { watches }
    }

    /// HUP and INT go to the process group so job-control style interrupts reach the
    /// command's children; TERM only goes to the command itself.
    pub fn interactive() -> Self {
        SignalPolicy::new(vec![
            SignalWatch {
                signal: Signal::SIGHUP,
                to_process_group: true,
            },
            SignalWatch {
                signal: Signal::SIGINT,
                to_process_group: true,
            },
            SignalWatch {
                signal: Signal::SIGTERM,
                to_process_group: false,
            },
        ])
    }

    pub fn watches(&self) -> &[SignalWatch] {
        &self.watches
    }
}

impl Default for SignalPolicy {
    fn default() -> Self {
        SignalPolicy::interactive()
    }
}

/// Installed relays; dropping it stops relaying (the handlers stay installed).
#[derive(Debug)]
pub struct SignalRelay {
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for SignalRelay {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Install a handler per watch and forward every delivery to host command `pid`.
///
/// Relaying is repeatable: each delivery produces one broker request. A failed
/// request is reported and relaying carries on.
pub fn relay<B>(
    client: &HostCommandClient<B>,
    pid: u32,
    policy: &SignalPolicy,
) -> io::Result<SignalRelay>
where
    B: Broker + 'static,
{
    let mut tasks = Vec::with_capacity(policy.watches().len());
    for watch in policy.watches().iter().copied() {
        let mut deliveries = watch_signal(SignalKind::from_raw(watch.signal as i32))?;
        let client = client.clone();
        tasks.push(tokio::task::spawn_local(async move {
            while deliveries.recv().await.is_some() {
                if let Err(e) = client
                    .signal(pid, watch.signal, watch.to_process_group)
                    .await
                {
                    eprintln!("Failed to send signal to child process: {e}");
                }
            }
        }));
    }
    Ok(SignalRelay { tasks })
}

/// Keep HUP, INT and TERM from killing us, e.g. while cleaning up.
pub fn ignore_termination_signals() -> nix::Result<()> {
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    for sig in [Signal::SIGHUP, Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: SIG_IGN installs no handler code.
        unsafe { signal::sigaction(sig, &ignore) }?;
    }
    Ok(())
}
