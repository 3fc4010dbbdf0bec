//! Map a remote wait status onto our own exit code.

/// Exit code used when a wait status is neither a normal exit nor a signal.
pub const UNKNOWN_STATUS_EXIT: u8 = 255;

/// A POSIX-packed wait status as reported by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitStatus(pub u32);

impl WaitStatus {
    fn raw(self) -> libc::c_int {
        self.0 as libc::c_int
    }

    /// Exit code of a normal termination.
    pub fn exit_code(self) -> Option<i32> {
        libc::WIFEXITED(self.raw()).then(|| libc::WEXITSTATUS(self.raw()))
    }

    /// Signal number of a termination by signal.
    pub fn term_signal(self) -> Option<i32> {
        libc::WIFSIGNALED(self.raw()).then(|| libc::WTERMSIG(self.raw()))
    }

    /// Shell convention: the exit code itself, 128 + signal, otherwise 255.
    pub fn to_exit_code(self) -> u8 {
        if let Some(code) = self.exit_code() {
            code as u8
        } else if let Some(sig) = self.term_signal() {
            (128 + sig) as u8
        } else {
            UNKNOWN_STATUS_EXIT
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_exit_maps_to_same_code() {
        assert_eq!(WaitStatus(0).to_exit_code(), 0);
        assert_eq!(WaitStatus(1 << 8).to_exit_code(), 1);
        assert_eq!(WaitStatus(42 << 8).to_exit_code(), 42);
        assert_eq!(WaitStatus(255 << 8).to_exit_code(), 255);
    }

    #[test]
    fn test_signal_maps_to_128_plus_signal() {
        assert_eq!(WaitStatus(libc::SIGKILL as u32).to_exit_code(), 137);
        assert_eq!(WaitStatus(libc::SIGTERM as u32).to_exit_code(), 143);
        // core-dump bit does not change the mapping
        assert_eq!(WaitStatus(libc::SIGSEGV as u32 | 0x80).to_exit_code(), 139);
        assert_eq!(WaitStatus(libc::SIGINT as u32).term_signal(), Some(libc::SIGINT));
    }

    #[test]
    fn test_stopped_or_continued_maps_to_sentinel() {
        // WIFSTOPPED: low byte 0x7f, stop signal in the next byte
        let stopped = 0x7f | ((libc::SIGSTOP as u32) << 8);
        assert_eq!(WaitStatus(stopped).to_exit_code(), UNKNOWN_STATUS_EXIT);
        // WIFCONTINUED
        assert_eq!(WaitStatus(0xffff).to_exit_code(), UNKNOWN_STATUS_EXIT);
    }
}
