use std::future::Future;

use anyhow::{Context, Result};
use tokio::task::LocalSet;

/// Run `fut` to completion on a current-thread runtime inside a `LocalSet`.
///
/// The runtime is shut down without waiting for blocking helpers, since a pending
/// read of our stdin would otherwise keep the process alive.
pub fn block_on_local<F>(fut: F) -> Result<F::Output>
where
    F: Future,
{
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    let local = LocalSet::new();
    let out = rt.block_on(local.run_until(fut));
    {
        let _enter = rt.enter();
        drop(local);
    }
    rt.shutdown_background();
    Ok(out)
}
