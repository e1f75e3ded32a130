//! Reference-counted payload buffers.
//!
//! [`Packet`] and [`Memblock`] are thin wrappers over [`Bytes`]: cloning takes
//! a reference, dropping releases it, and the bytes can never be mutated once
//! shared. Inbound payloads are filled through exclusively owned [`BytesMut`]
//! buffers handed out by an [`Allocator`] and frozen when delivered.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// An immutable opaque message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet(Bytes);

impl Packet {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self(data.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.0
    }

    /// The shared buffer backing this packet.
    pub fn bytes(&self) -> &Bytes {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl From<Bytes> for Packet {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl From<Vec<u8>> for Packet {
    fn from(data: Vec<u8>) -> Self {
        Self(data.into())
    }
}

impl AsRef<[u8]> for Packet {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// An immutable block of media data, shared by any number of readers.
///
/// A memblock may hold only a window of a larger block: the bytes at
/// `origin()..origin() + len()` of a block that is `block_len()` bytes long.
/// Inbound memblock frames are delivered this way, one window per read, all
/// sharing the frame's single allocation. Blocks built with [`Memblock::new`]
/// hold their whole extent and have an origin of 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Memblock {
    bytes: Bytes,
    origin: usize,
    block_len: usize,
}

impl Memblock {
    pub fn new(data: impl Into<Bytes>) -> Self {
        let bytes = data.into();
        Self {
            block_len: bytes.len(),
            bytes,
            origin: 0,
        }
    }

    /// The bytes at `origin..origin + bytes.len()` of a `block_len`-byte block.
    pub(crate) fn window(bytes: Bytes, origin: usize, block_len: usize) -> Self {
        debug_assert!(origin + bytes.len() <= block_len);
        Self {
            bytes,
            origin,
            block_len,
        }
    }

    /// Number of bytes held.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Position of the held bytes within the whole block.
    pub fn origin(&self) -> usize {
        self.origin
    }

    /// Size of the whole block.
    pub fn block_len(&self) -> usize {
        self.block_len
    }

    /// The held bytes, starting at [`origin`](Self::origin).
    pub fn data(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }
}

impl From<Bytes> for Memblock {
    fn from(bytes: Bytes) -> Self {
        Self::new(bytes)
    }
}

impl From<Vec<u8>> for Memblock {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

/// A view of `length` bytes starting at `index` inside a [`Memblock`].
///
/// `index` counts from the start of the whole block, so a chunk of a window
/// reports where it sits in the block the window was cut from. The chunk
/// keeps one reference to its block alive for as long as it exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Memchunk {
    memblock: Memblock,
    index: usize,
    length: usize,
}

impl Memchunk {
    /// Create a view, rejecting ranges outside the bytes the block holds.
    pub fn new(memblock: Memblock, index: usize, length: usize) -> Result<Self> {
        let held = memblock.origin()..memblock.origin() + memblock.len();
        match index.checked_add(length) {
            Some(end) if index >= held.start && end <= held.end => Ok(Self {
                memblock,
                index,
                length,
            }),
            _ => Err(FrameError::ChunkOutOfBounds {
                index,
                length,
                size: memblock.block_len(),
            }),
        }
    }

    /// A view covering every byte the block holds.
    pub fn whole(memblock: Memblock) -> Self {
        Self {
            index: memblock.origin(),
            length: memblock.len(),
            memblock,
        }
    }

    pub fn memblock(&self) -> &Memblock {
        &self.memblock
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The viewed bytes.
    pub fn as_slice(&self) -> &[u8] {
        let start = self.index - self.memblock.origin();
        &self.memblock.data()[start..start + self.length]
    }
}

/// Source of inbound payload buffers.
///
/// Both methods return a zero-initialized buffer of exactly `len` bytes that
/// the reader fills in place. Allocation failure aborts.
pub trait Allocator {
    fn packet(&self, len: usize) -> BytesMut;
    fn memblock(&self, len: usize) -> BytesMut;
}

impl<A: Allocator + ?Sized> Allocator for Arc<A> {
    fn packet(&self, len: usize) -> BytesMut {
        (**self).packet(len)
    }

    fn memblock(&self, len: usize) -> BytesMut {
        (**self).memblock(len)
    }
}

/// Plain heap allocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapAllocator;

impl Allocator for HeapAllocator {
    fn packet(&self, len: usize) -> BytesMut {
        BytesMut::zeroed(len)
    }

    fn memblock(&self, len: usize) -> BytesMut {
        BytesMut::zeroed(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_clone_shares_storage() {
        let packet = Packet::new(vec![1, 2, 3]);
        let other = packet.clone();
        assert_eq!(packet.data().as_ptr(), other.data().as_ptr());
        assert_eq!(packet.len(), 3);
    }

    #[test]
    fn chunk_views_a_range() {
        let block = Memblock::new(b"0123456789".to_vec());
        let chunk = Memchunk::new(block, 2, 3).unwrap();
        assert_eq!(chunk.as_slice(), b"234");
        assert_eq!(chunk.index(), 2);
        assert_eq!(chunk.len(), 3);
    }

    #[test]
    fn chunk_rejects_out_of_bounds() {
        let block = Memblock::new(vec![0u8; 4]);
        let err = Memchunk::new(block.clone(), 3, 2).unwrap_err();
        assert!(matches!(
            err,
            FrameError::ChunkOutOfBounds {
                index: 3,
                length: 2,
                size: 4
            }
        ));
        assert!(Memchunk::new(block, usize::MAX, 2).is_err());
    }

    #[test]
    fn whole_chunk_covers_block() {
        let chunk = Memchunk::whole(Memblock::new(vec![9u8; 6]));
        assert_eq!(chunk.index(), 0);
        assert_eq!(chunk.len(), 6);
        assert!(!chunk.is_empty());
    }

    #[test]
    fn window_chunk_uses_block_relative_index() {
        let block = Memblock::window(Bytes::from_static(b"efgh"), 4, 10);
        assert_eq!(block.origin(), 4);
        assert_eq!(block.block_len(), 10);

        let whole = Memchunk::whole(block.clone());
        assert_eq!((whole.index(), whole.len()), (4, 4));
        assert_eq!(whole.as_slice(), b"efgh");

        let inner = Memchunk::new(block.clone(), 5, 2).unwrap();
        assert_eq!(inner.as_slice(), b"fg");
    }

    #[test]
    fn window_chunk_rejects_bytes_outside_the_window() {
        let block = Memblock::window(Bytes::from_static(b"efgh"), 4, 10);
        assert!(matches!(
            Memchunk::new(block.clone(), 2, 3).unwrap_err(),
            FrameError::ChunkOutOfBounds { size: 10, .. }
        ));
        assert!(Memchunk::new(block, 6, 4).is_err());
    }

    #[test]
    fn heap_allocator_zero_fills() {
        let buf = HeapAllocator.memblock(8);
        assert_eq!(buf.len(), 8);
        assert!(buf.iter().all(|b| *b == 0));
        assert!(HeapAllocator.packet(0).is_empty());
    }
}
