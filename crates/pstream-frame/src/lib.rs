//! Resumable framing of packets and memblock slices.
//!
//! Every frame on the wire is a 12-byte descriptor followed by its payload:
//! - a 4-byte payload length
//! - a 4-byte channel (0 for packets, nonzero for memblock streams)
//! - a 4-byte signed delta (memblock frames only)
//!
//! All three fields are written in native byte order.
//!
//! [`FrameWriter`] and [`FrameReader`] are independent state machines. Each
//! step makes exactly one non-blocking channel call and remembers where it
//! stopped, so a frame may take any number of steps to cross the channel.

pub mod codec;
pub mod error;
pub mod memblock;
pub mod reader;
pub mod writer;

pub use codec::{Descriptor, FrameConfig, DESCRIPTOR_SIZE, MAX_FRAME_SIZE, PACKET_CHANNEL};
pub use error::{FrameError, Result};
pub use memblock::{Allocator, HeapAllocator, Memblock, Memchunk, Packet};
pub use reader::{FrameReader, MemblockSlice, ReadOutcome};
pub use writer::{FrameWriter, SendItem, WriteOutcome};
