use std::io;

/// A non-blocking, byte-oriented, reliable and ordered channel.
///
/// `read` and `write` make a single attempt and return how many bytes moved.
/// A `write` may accept fewer bytes than offered, including zero. A `read`
/// returning `Ok(0)` means the peer closed the channel.
///
/// `is_readable` / `is_writable` report current readiness without blocking.
/// The stream core only reads when readable and only writes when writable.
pub trait IoChannel {
    /// Read up to `buf.len()` bytes in one non-blocking attempt.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write up to `buf.len()` bytes in one non-blocking attempt.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Whether a `read` would make progress (data, EOF or a pending error).
    fn is_readable(&self) -> bool;

    /// Whether a `write` would make progress (space or a pending error).
    fn is_writable(&self) -> bool;
}

impl<C: IoChannel + ?Sized> IoChannel for &mut C {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }

    fn is_readable(&self) -> bool {
        (**self).is_readable()
    }

    fn is_writable(&self) -> bool {
        (**self).is_writable()
    }
}

impl<C: IoChannel + ?Sized> IoChannel for Box<C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (**self).write(buf)
    }

    fn is_readable(&self) -> bool {
        (**self).is_readable()
    }

    fn is_writable(&self) -> bool {
        (**self).is_writable()
    }
}
