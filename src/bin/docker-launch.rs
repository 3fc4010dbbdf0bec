use std::process::ExitCode;
use std::rc::Rc;

use hostexec::cli::{take_wait_fd, DockerLaunchCli};
use hostexec::docker::{BrokerRunner, ContainerRunner, LaunchOptions, Launcher, LocalRunner};
use hostexec::{
    signals, telemetry_init, Config, FlatpakBroker, HostCommandClient, LaunchError, Sandbox,
};

async fn launch_with<R: ContainerRunner>(runner: &R, opts: LaunchOptions) -> u8 {
    let mut launcher = Launcher::new(runner);
    match launcher.run(opts).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{e}");
            e.exit_code()
        }
    }
}

async fn run(cli: DockerLaunchCli, config: Config, sandbox: Sandbox) -> u8 {
    let wait_fd = match take_wait_fd(cli.wait_fd.as_deref()) {
        Ok(fd) => fd,
        Err(e) => {
            eprintln!("{e}");
            return e.exit_code();
        }
    };
    let opts = LaunchOptions {
        wait_fd,
        state_root: sandbox.state_root(&config.app_id),
        container_runtime: config.container_runtime.clone(),
        runtime_args: cli.runtime_args,
        use_pty: cli.pty && sandbox.inside(),
        raw_terminal: cli.pty && sandbox.inside(),
    };

    if !sandbox.inside() {
        return launch_with(&LocalRunner, opts).await;
    }

    let broker = match FlatpakBroker::connect().await {
        Ok(broker) => broker,
        Err(e) => {
            let e = LaunchError::Bus(e.to_string());
            eprintln!("{e}");
            return e.exit_code();
        }
    };
    let cwd = match std::env::current_dir() {
        Ok(cwd) => cwd,
        Err(e) => {
            eprintln!("Could not determine the current directory: {e}");
            return 1;
        }
    };
    let runner = BrokerRunner::new(
        HostCommandClient::new(Rc::new(broker)),
        cwd,
        config.term.clone(),
        config.drain_timeout,
    );
    launch_with(&runner, opts).await
}

fn main() -> ExitCode {
    // Nothing may interrupt the teardown of the container.
    if let Err(e) = signals::ignore_termination_signals() {
        eprintln!("Failed to ignore termination signals: {e}");
    }

    let cli = match DockerLaunchCli::parse_args(std::env::args()) {
        Ok(cli) => cli,
        Err(code) => return ExitCode::from(code),
    };
    let config = Config::from_env();
    telemetry_init(&config.log_filter);
    let sandbox = Sandbox::detect(&config.runtime_dir);

    match hostexec::runtime::block_on_local(run(cli, config, sandbox)) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::from(1)
        }
    }
}
