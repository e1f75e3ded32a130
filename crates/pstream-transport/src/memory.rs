use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io::{self, ErrorKind};
use std::rc::Rc;

use tracing::trace;

use crate::traits::IoChannel;

/// Default buffer capacity of each direction of a [`MemoryChannel`] pair.
pub const DEFAULT_CAPACITY: usize = 256 * 1024;

#[derive(Debug)]
struct Pipe {
    buf: VecDeque<u8>,
    capacity: usize,
    writer_closed: bool,
    reader_closed: bool,
}

impl Pipe {
    fn new(capacity: usize) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            buf: VecDeque::new(),
            capacity,
            writer_closed: false,
            reader_closed: false,
        }))
    }
}

/// One end of an in-process, single-threaded duplex byte channel.
///
/// Each direction is a bounded FIFO. A full pipe makes the writer
/// non-writable, and an empty one makes the reader non-readable. Dropping an
/// end closes it: the peer reads the remaining bytes and then `Ok(0)`, and
/// the peer's writes fail with `BrokenPipe`.
///
/// The per-call limit and error injection simulate partial I/O and transport
/// failures.
#[derive(Debug)]
pub struct MemoryChannel {
    rx: Rc<RefCell<Pipe>>,
    tx: Rc<RefCell<Pipe>>,
    max_io: Cell<Option<usize>>,
    read_error: Cell<Option<ErrorKind>>,
    write_error: Cell<Option<ErrorKind>>,
}

impl MemoryChannel {
    /// Create a connected pair with the default capacity.
    pub fn pair() -> (Self, Self) {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a connected pair whose directions each buffer `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> (Self, Self) {
        let a_to_b = Pipe::new(capacity);
        let b_to_a = Pipe::new(capacity);
        (
            Self::end(Rc::clone(&b_to_a), Rc::clone(&a_to_b)),
            Self::end(a_to_b, b_to_a),
        )
    }

    fn end(rx: Rc<RefCell<Pipe>>, tx: Rc<RefCell<Pipe>>) -> Self {
        Self {
            rx,
            tx,
            max_io: Cell::new(None),
            read_error: Cell::new(None),
            write_error: Cell::new(None),
        }
    }

    /// Cap the bytes moved by each `read` and `write` call on this end.
    pub fn set_max_io(&self, limit: Option<usize>) {
        self.max_io.set(limit);
    }

    /// Make every subsequent `read` on this end fail with `kind`.
    pub fn inject_read_error(&self, kind: ErrorKind) {
        self.read_error.set(Some(kind));
    }

    /// Make every subsequent `write` on this end fail with `kind`.
    pub fn inject_write_error(&self, kind: ErrorKind) {
        self.write_error.set(Some(kind));
    }

    /// Clear injected errors.
    pub fn clear_errors(&self) {
        self.read_error.set(None);
        self.write_error.set(None);
    }

    /// Bytes waiting to be read on this end.
    pub fn pending_read(&self) -> usize {
        self.rx.borrow().buf.len()
    }

    /// Bytes written by this end and not yet read by the peer.
    pub fn pending_write(&self) -> usize {
        self.tx.borrow().buf.len()
    }

    fn limit(&self, len: usize) -> usize {
        match self.max_io.get() {
            Some(max) => len.min(max),
            None => len,
        }
    }
}

impl IoChannel for MemoryChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(kind) = self.read_error.get() {
            return Err(io::Error::from(kind));
        }

        let mut pipe = self.rx.borrow_mut();
        if pipe.buf.is_empty() {
            if pipe.writer_closed {
                return Ok(0);
            }
            return Err(io::Error::from(ErrorKind::WouldBlock));
        }

        let n = self.limit(buf.len()).min(pipe.buf.len());
        for (slot, byte) in buf[..n].iter_mut().zip(pipe.buf.drain(..n)) {
            *slot = byte;
        }
        trace!(bytes = n, "memory channel read");
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(kind) = self.write_error.get() {
            return Err(io::Error::from(kind));
        }

        let mut pipe = self.tx.borrow_mut();
        if pipe.reader_closed {
            return Err(io::Error::from(ErrorKind::BrokenPipe));
        }

        let space = pipe.capacity.saturating_sub(pipe.buf.len());
        if space == 0 && !buf.is_empty() {
            return Err(io::Error::from(ErrorKind::WouldBlock));
        }

        let n = self.limit(buf.len()).min(space);
        pipe.buf.extend(&buf[..n]);
        trace!(bytes = n, "memory channel write");
        Ok(n)
    }

    fn is_readable(&self) -> bool {
        let pipe = self.rx.borrow();
        self.read_error.get().is_some() || !pipe.buf.is_empty() || pipe.writer_closed
    }

    fn is_writable(&self) -> bool {
        let pipe = self.tx.borrow();
        self.write_error.get().is_some() || pipe.reader_closed || pipe.buf.len() < pipe.capacity
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        self.tx.borrow_mut().writer_closed = true;
        self.rx.borrow_mut().reader_closed = true;
    }
}
