use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_FILTER: &str = "warn";

fn build_filter(filter: &str) -> EnvFilter {
    match EnvFilter::try_new(filter) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("hostexec: invalid log filter {filter:?} ({e}); using {DEFAULT_FILTER}");
            EnvFilter::new(DEFAULT_FILTER)
        }
    }
}

/// Install the stderr fmt subscriber once per process.
///
/// Returns false when telemetry was already initialised here, or when some other
/// global subscriber is in place (e.g. a test harness).
pub fn telemetry_init(filter: &str) -> bool {
    if INIT.get().is_some() {
        return false;
    }

    let installed = tracing_subscriber::fmt()
        .with_env_filter(build_filter(filter))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_ok();
    let _ = INIT.set(());
    installed
}
