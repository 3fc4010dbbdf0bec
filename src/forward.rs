//! Byte pumps between the caller's stdio and the descriptors we kept for a host command.
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::task::JoinHandle;

use crate::descriptors::LocalEnds;

const PUMP_BUF_SIZE: usize = 8192;

/// The caller-facing side of forwarding. `process()` is the real stdio; tests swap in
/// in-memory streams.
pub struct CallerStdio {
    pub stdin: Box<dyn AsyncRead + Unpin>,
    pub stdout: Box<dyn AsyncWrite + Unpin>,
    pub stderr: Box<dyn AsyncWrite + Unpin>,
}

impl CallerStdio {
    pub fn process() -> Self {
        CallerStdio {
            stdin: Box::new(tokio::io::stdin()),
            stdout: Box::new(tokio::io::stdout()),
            stderr: Box::new(tokio::io::stderr()),
        }
    }
}

/// A descriptor we own exclusively, switched to non-blocking and driven by the reactor.
#[derive(Debug)]
pub struct NonBlockingFd {
    inner: AsyncFd<OwnedFd>,
}

impl NonBlockingFd {
    pub fn new(fd: OwnedFd) -> io::Result<Self> {
        set_nonblocking(fd.as_raw_fd())?;
        Ok(NonBlockingFd {
            inner: AsyncFd::new(fd)?,
        })
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a descriptor we own; no memory is passed.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn read_fd(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    // SAFETY: buf is a valid writable region of buf.len() bytes.
    let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

fn write_fd(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    // SAFETY: buf is a valid readable region of buf.len() bytes.
    let n = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

impl AsyncRead for NonBlockingFd {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let mut guard = ready!(self.inner.poll_read_ready(cx))?;
            let unfilled = buf.initialize_unfilled();
            match guard.try_io(|inner| read_fd(inner.get_ref().as_raw_fd(), unfilled)) {
                Ok(Ok(n)) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                // pty master once every slave is closed
                Ok(Err(e)) if e.raw_os_error() == Some(libc::EIO) => return Poll::Ready(Ok(())),
                Ok(Err(e)) => return Poll::Ready(Err(e)),
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsyncWrite for NonBlockingFd {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        loop {
            let mut guard = ready!(self.inner.poll_write_ready(cx))?;
            match guard.try_io(|inner| write_fd(inner.get_ref().as_raw_fd(), buf)) {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Copy from `src` to `dst` until end-of-stream. Errors end this pump only.
pub async fn pump<R, W>(label: &'static str, mut src: R, mut dst: W) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; PUMP_BUF_SIZE];
    let mut total: u64 = 0;
    loop {
        let n = match src.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(stream = label, error = %e, "error reading forwarded stream");
                break;
            }
        };
        if let Err(e) = dst.write_all(&buf[..n]).await {
            tracing::warn!(stream = label, error = %e, "error writing forwarded stream");
            break;
        }
        if let Err(e) = dst.flush().await {
            tracing::warn!(stream = label, error = %e, "error flushing forwarded stream");
            break;
        }
        total += n as u64;
    }
    let _ = dst.shutdown().await;
    tracing::debug!(stream = label, bytes = total, "forwarder finished");
    total
}

/// Running forwarders of one host command.
#[derive(Debug)]
pub struct Forwarders {
    input: Option<JoinHandle<u64>>,
    outputs: Vec<JoinHandle<u64>>,
}

impl Forwarders {
    /// Give the output pumps up to `timeout` to hit end-of-stream, then drop the input pump.
    pub async fn drain(mut self, timeout: Duration) {
        let outputs = std::mem::take(&mut self.outputs);
        let all = futures::future::join_all(outputs);
        if tokio::time::timeout(timeout, all).await.is_err() {
            tracing::debug!(?timeout, "output forwarders still open after drain window");
        }
    }
}

impl Drop for Forwarders {
    fn drop(&mut self) {
        if let Some(input) = self.input.take() {
            input.abort();
        }
    }
}

/// Our descriptors, made non-blocking and registered with the reactor, but not yet pumping.
#[derive(Debug)]
pub enum Endpoints {
    Pipes {
        stdin: NonBlockingFd,
        stdout: Option<NonBlockingFd>,
        stderr: NonBlockingFd,
    },
    Pty {
        master: NonBlockingFd,
    },
}

impl Endpoints {
    pub fn new(local: LocalEnds) -> io::Result<Self> {
        Ok(match local {
            LocalEnds::Pipes {
                stdin,
                stdout,
                stderr,
            } => Endpoints::Pipes {
                stdin: NonBlockingFd::new(stdin)?,
                stdout: stdout.map(NonBlockingFd::new).transpose()?,
                stderr: NonBlockingFd::new(stderr)?,
            },
            LocalEnds::Pty { master } => Endpoints::Pty {
                master: NonBlockingFd::new(master)?,
            },
        })
    }

    /// Start the pumps on the current `LocalSet`.
    pub fn spawn(self, stdio: CallerStdio) -> Forwarders {
        let CallerStdio {
            stdin,
            stdout,
            stderr,
        } = stdio;

        match self {
            Endpoints::Pipes {
                stdin: to_remote,
                stdout: from_stdout,
                stderr: from_stderr,
            } => {
                let input = tokio::task::spawn_local(pump("stdin", stdin, to_remote));
                let mut outputs = Vec::with_capacity(2);
                if let Some(from_stdout) = from_stdout {
                    outputs.push(tokio::task::spawn_local(pump("stdout", from_stdout, stdout)));
                }
                outputs.push(tokio::task::spawn_local(pump("stderr", from_stderr, stderr)));
                Forwarders {
                    input: Some(input),
                    outputs,
                }
            }
            Endpoints::Pty { master } => {
                let (from_pty, to_pty) = tokio::io::split(master);
                let input = tokio::task::spawn_local(pump("stdin", stdin, to_pty));
                let output = tokio::task::spawn_local(pump("pty", from_pty, stdout));
                Forwarders {
                    input: Some(input),
                    outputs: vec![output],
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptors::{prepare, CommandFlags};
    use std::fs::File;
    use std::io::{Read, Write};

    #[tokio::test]
    async fn test_pump_copies_until_eof() {
        let src: &[u8] = b"hello world";
        let mut out = Vec::new();
        let n = pump("test", src, &mut out).await;
        assert_eq!(n, 11);
        assert_eq!(out, b"hello world");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_pipe_forwarding_both_directions() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let prepared = prepare(CommandFlags::NONE).expect("prepare");
                let (stdout_w, mut stdout_r) = tokio::io::duplex(1024);
                let (stderr_w, mut stderr_r) = tokio::io::duplex(1024);
                let stdio = CallerStdio {
                    stdin: Box::new(&b"input\n"[..]),
                    stdout: Box::new(stdout_w),
                    stderr: Box::new(stderr_w),
                };
                let fw = Endpoints::new(prepared.local)
                    .expect("register endpoints")
                    .spawn(stdio);

                let remote = prepared.remote;
                let mut remote_in = File::from(remote.stdin);
                let mut remote_out = File::from(remote.stdout);
                let mut remote_err = File::from(remote.stderr);
                remote_out.write_all(b"to stdout").expect("write");
                remote_err.write_all(b"to stderr").expect("write");
                drop(remote_out);
                drop(remote_err);

                fw.drain(Duration::from_secs(5)).await;

                let mut got = String::new();
                stdout_r.read_to_string(&mut got).await.expect("stdout");
                assert_eq!(got, "to stdout");
                let mut got = String::new();
                stderr_r.read_to_string(&mut got).await.expect("stderr");
                assert_eq!(got, "to stderr");

                let got = tokio::task::spawn_blocking(move || {
                    let mut s = String::new();
                    remote_in.read_to_string(&mut s).map(|_| s)
                })
                .await
                .expect("join")
                .expect("remote stdin");
                assert_eq!(got, "input\n");
            })
            .await;
    }
}
