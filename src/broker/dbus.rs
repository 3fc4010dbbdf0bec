//! The Flatpak development broker on the session bus.
use std::collections::HashMap;
use std::os::unix::ffi::OsStrExt;

use futures::stream::BoxStream;
use futures::StreamExt;
use zbus::zvariant::Fd;
use zbus::{proxy, Connection};

use super::{Broker, ExitNotification, HostCommandCall};
use crate::errors::HostCommandError;

#[proxy(
    interface = "org.freedesktop.Flatpak.Development",
    default_service = "org.freedesktop.Flatpak",
    default_path = "/org/freedesktop/Flatpak/Development"
)]
trait Development {
    /// HostCommand(ay cwd_path, aay argv, a{uh} fds, a{ss} envs, u flags) -> u pid
    fn host_command(
        &self,
        cwd_path: &[u8],
        argv: &[&[u8]],
        fds: HashMap<u32, Fd<'_>>,
        envs: HashMap<&str, &str>,
        flags: u32,
    ) -> zbus::Result<u32>;

    fn host_command_signal(
        &self,
        pid: u32,
        signal: u32,
        to_process_group: bool,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    fn host_command_exited(&self, pid: u32, exit_status: u32) -> zbus::Result<()>;
}

pub struct FlatpakBroker {
    proxy: DevelopmentProxy<'static>,
}

impl FlatpakBroker {
    /// Connect to the session bus.
    pub async fn connect() -> zbus::Result<Self> {
        let connection = Connection::session().await?;
        Self::with_connection(&connection).await
    }

    pub async fn with_connection(connection: &Connection) -> zbus::Result<Self> {
        let proxy = DevelopmentProxy::new(connection).await?;
        Ok(FlatpakBroker { proxy })
    }
}

fn broker_error(e: zbus::Error) -> HostCommandError {
    HostCommandError::Broker(e.to_string())
}

/// The broker reads `ay` arguments as C strings.
fn bytestring(bytes: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(bytes.len() + 1);
    v.extend_from_slice(bytes);
    v.push(0);
    v
}

impl Broker for FlatpakBroker {
    async fn subscribe_exits(
        &self,
    ) -> Result<BoxStream<'static, ExitNotification>, HostCommandError> {
        let signals = self
            .proxy
            .receive_host_command_exited()
            .await
            .map_err(broker_error)?;
        Ok(signals
            .filter_map(|signal| async move {
                match signal.args() {
                    Ok(args) => Some(ExitNotification {
                        pid: *args.pid(),
                        status: *args.exit_status(),
                    }),
                    Err(e) => {
                        tracing::warn!(error = %e, "malformed HostCommandExited signal");
                        None
                    }
                }
            })
            .boxed())
    }

    async fn host_command(&self, call: HostCommandCall<'_>) -> Result<u32, HostCommandError> {
        let cwd = bytestring(call.cwd.as_os_str().as_bytes());
        let argv: Vec<Vec<u8>> = call.argv.iter().map(|a| bytestring(a.as_bytes())).collect();
        let argv: Vec<&[u8]> = argv.iter().map(Vec::as_slice).collect();
        let fds: HashMap<u32, Fd<'_>> = call
            .fds
            .slots()
            .into_iter()
            .map(|(target, fd)| (target, Fd::from(fd)))
            .collect();
        let envs: HashMap<&str, &str> = call
            .env
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        self.proxy
            .host_command(&cwd, &argv, fds, envs, call.flags)
            .await
            .map_err(broker_error)
    }

    async fn host_command_signal(
        &self,
        pid: u32,
        signum: i32,
        to_process_group: bool,
    ) -> Result<(), HostCommandError> {
        self.proxy
            .host_command_signal(pid, signum as u32, to_process_group)
            .await
            .map_err(broker_error)
    }
}
