use std::process::ExitCode;
use std::rc::Rc;

use hostexec::cli::{parse_or_exit_code, RunHostCli};
use hostexec::{
    run_host, telemetry_init, CallerStdio, CommandRequest, Config, FlatpakBroker,
    HostCommandClient, RunHostOptions, Sandbox, SignalPolicy,
};

async fn run(cli: RunHostCli, config: Config) -> u8 {
    let broker = match FlatpakBroker::connect().await {
        Ok(broker) => broker,
        Err(e) => {
            tracing::debug!(error = %e, "session bus connection failed");
            eprintln!("Could not get connection to bus");
            return 1;
        }
    };
    let client = HostCommandClient::new(Rc::new(broker));

    let cwd = match std::env::current_dir() {
        Ok(cwd) => cwd,
        Err(e) => {
            eprintln!("Could not determine the current directory: {e}");
            return 1;
        }
    };
    let flags = cli.flags();
    let request = CommandRequest::new(cli.command, flags, cwd, config.term.as_deref());
    let opts = RunHostOptions {
        request,
        drain_timeout: config.drain_timeout,
        signals: SignalPolicy::interactive(),
    };
    run_host(&client, opts, CallerStdio::process()).await
}

fn main() -> ExitCode {
    let cli: RunHostCli = match parse_or_exit_code(std::env::args()) {
        Ok(cli) => cli,
        Err(code) => return ExitCode::from(code),
    };
    let config = Config::from_env();
    telemetry_init(&config.log_filter);

    let sandbox = Sandbox::detect(&config.runtime_dir);
    if !sandbox.inside() {
        eprintln!("Not inside a sandbox");
        return ExitCode::from(1);
    }

    match hostexec::runtime::block_on_local(run(cli, config)) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::from(1)
        }
    }
}
