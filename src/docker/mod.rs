//! Container launcher: `run --cidfile`, wait for a token, then `rm -f`.

pub mod launch;
pub mod runtime;
pub mod state;

pub use launch::{
    BrokerRunner, ContainerRunner, LaunchOptions, LaunchState, Launcher, LocalRunner, RM_STEP,
    RUN_STEP,
};
pub use runtime::{container_runtime_path, rm_args, run_args};
pub use state::{ContainerState, CID_FILE_NAME};
