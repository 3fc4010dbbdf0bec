//! Scoped raw mode for the caller's terminal.
use std::io;

use nix::sys::termios::{cfmakeraw, tcgetattr, tcsetattr, SetArg, Termios};

/// Restores the terminal settings captured at construction when dropped.
#[derive(Debug)]
pub struct RawModeGuard {
    saved: Termios,
}

impl RawModeGuard {
    /// Switch stdin's terminal to raw mode.
    pub fn enter() -> nix::Result<Self> {
        let saved = tcgetattr(io::stdin())?;
        let mut raw = saved.clone();
        cfmakeraw(&mut raw);
        tcsetattr(io::stdin(), SetArg::TCSANOW, &raw)?;
        Ok(RawModeGuard { saved })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = tcsetattr(io::stdin(), SetArg::TCSANOW, &self.saved) {
            tracing::warn!(error = %e, "failed to restore terminal settings");
        }
    }
}

/// Best-effort raw mode: a non-terminal stdin only produces a warning.
pub fn enter_raw_mode() -> Option<RawModeGuard> {
    match RawModeGuard::enter() {
        Ok(guard) => Some(guard),
        Err(e) => {
            tracing::warn!(error = %e, "setting TTY to raw mode failed");
            None
        }
    }
}
