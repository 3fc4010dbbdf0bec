//! Run commands on the host from inside a Flatpak sandbox.
//!
//! - `broker`: the host-command client and its D-Bus binding.
//! - `descriptors` / `forward`: the three stdio descriptors handed to the host and the
//!   copy loops that drive our ends of them.
//! - `signals` / `exit` / `terminal`: signal relaying, exit-code mapping, raw mode.
//! - `docker`: the container launcher behind `docker-launch`.
//! - `sandbox` / `config` / `telemetry`: process-wide setup shared by both binaries.

pub mod broker;
pub mod cli;
pub mod config;
pub mod descriptors;
pub mod docker;
pub mod errors;
pub mod exit;
pub mod forward;
pub mod run_host;
pub mod runtime;
pub mod sandbox;
pub mod signals;
pub mod telemetry;
pub mod terminal;

pub use broker::dbus::FlatpakBroker;
pub use broker::{Broker, CommandRequest, ExitNotification, HostCommandClient, RemoteCommand};
pub use config::Config;
pub use descriptors::CommandFlags;
pub use errors::{HostCommandError, LaunchError};
pub use exit::WaitStatus;
pub use forward::CallerStdio;
pub use run_host::{run_host, RunHostOptions};
pub use sandbox::Sandbox;
pub use signals::{SignalPolicy, SignalWatch};
pub use telemetry::telemetry_init;
