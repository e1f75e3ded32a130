use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;

use tracing::{debug, trace};

use crate::error::{Result, TransportError};
use crate::traits::IoChannel;

/// Readiness snapshot of a Unix domain socket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

/// Non-blocking Unix domain socket channel.
///
/// Readiness is sampled with a zero-timeout `poll(2)`, so `is_readable` and
/// `is_writable` never block. Hang-up and error conditions report the socket
/// as both readable and writable: the next attempt surfaces the failure.
pub struct UnixChannel {
    stream: UnixStream,
}

impl UnixChannel {
    /// Wrap a connected stream, switching it to non-blocking mode.
    pub fn from_stream(stream: UnixStream) -> Result<Self> {
        stream.set_nonblocking(true)?;
        debug!(fd = stream.as_raw_fd(), "unix channel ready");
        Ok(Self { stream })
    }

    /// Create a connected pair of channels.
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = UnixStream::pair()?;
        Ok((Self::from_stream(left)?, Self::from_stream(right)?))
    }

    /// Sample readiness without blocking.
    pub fn readiness(&self) -> Result<Readiness> {
        let mut pfd = libc::pollfd {
            fd: self.stream.as_raw_fd(),
            events: libc::POLLIN | libc::POLLOUT,
            revents: 0,
        };

        // SAFETY: `pfd` is a valid, writable pollfd for the duration of the call,
        // we pass exactly one entry, and `fd` is an open socket owned by `self`.
        let rc = unsafe { libc::poll(&mut pfd, 1, 0) };
        if rc < 0 {
            return Err(TransportError::Poll(io::Error::last_os_error()));
        }

        let failed = pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0;
        Ok(Readiness {
            readable: pfd.revents & libc::POLLIN != 0 || failed,
            writable: pfd.revents & libc::POLLOUT != 0 || failed,
        })
    }

    /// Shut down both halves of the connection.
    pub fn shutdown(&self) -> Result<()> {
        self.stream.shutdown(Shutdown::Both).map_err(Into::into)
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &UnixStream {
        &self.stream
    }

    /// Consume the channel and return the underlying stream.
    pub fn into_inner(self) -> UnixStream {
        self.stream
    }

    fn sample(&self) -> Readiness {
        match self.readiness() {
            Ok(readiness) => readiness,
            Err(err) => {
                trace!(error = %err, "poll failed; reporting ready");
                Readiness {
                    readable: true,
                    writable: true,
                }
            }
        }
    }
}

impl IoChannel for UnixChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn is_readable(&self) -> bool {
        self.sample().readable
    }

    fn is_writable(&self) -> bool {
        self.sample().writable
    }
}

impl std::fmt::Debug for UnixChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixChannel")
            .field("fd", &self.stream.as_raw_fd())
            .finish()
    }
}
