use std::time::Duration;

use crate::broker::{Broker, CommandRequest, HostCommandClient};
use crate::forward::CallerStdio;
use crate::signals::{self, SignalPolicy};
use crate::terminal::enter_raw_mode;

#[derive(Debug, Clone)]
pub struct RunHostOptions {
    pub request: CommandRequest,
    pub drain_timeout: Duration,
    pub signals: SignalPolicy,
}

/// Run `opts.request` on the host and return the exit code to leave with.
///
/// A failed launch installs no signal relay and returns 1. In pty mode the caller's
/// terminal is raw until the command has exited.
pub async fn run_host<B>(
    client: &HostCommandClient<B>,
    opts: RunHostOptions,
    stdio: CallerStdio,
) -> u8
where
    B: Broker + 'static,
{
    let command = match client.launch(&opts.request, stdio).await {
        Ok(command) => command,
        Err(e) => {
            eprintln!("Could not call command: {e}");
            return 1;
        }
    };

    let _raw = if opts.request.flags.use_pty {
        enter_raw_mode()
    } else {
        None
    };
    let _relay = match signals::relay(client, command.pid(), &opts.signals) {
        Ok(relay) => Some(relay),
        Err(e) => {
            tracing::warn!(error = %e, "could not install signal handlers");
            None
        }
    };

    match command.wait(opts.drain_timeout).await {
        Ok(status) => status.to_exit_code(),
        Err(e) => {
            eprintln!("{e}");
            1
        }
    }
}
