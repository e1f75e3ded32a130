use std::io::ErrorKind;

use bytes::BytesMut;
use pstream_transport::IoChannel;
use tracing::trace;

use crate::codec::{Descriptor, FrameConfig, DESCRIPTOR_SIZE};
use crate::error::{FrameError, Result};
use crate::memblock::{Allocator, HeapAllocator, Memblock, Memchunk, Packet};

/// A contiguous piece of an inbound memblock frame.
///
/// `offset` is where the piece starts within the frame's payload. The chunk
/// views a window of the whole frame: its index equals `offset` and its
/// memblock's `block_len()` is the frame's payload length. Every slice of a
/// frame shares one allocation; no bytes are copied.
#[derive(Debug, Clone)]
pub struct MemblockSlice {
    pub channel: u32,
    pub delta: i32,
    pub offset: usize,
    pub chunk: Memchunk,
}

/// Result of a single [`FrameReader::read_step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The channel had nothing to give right now.
    Pending,
    /// Bytes were read without crossing a frame boundary.
    Progress { read: usize },
    /// The descriptor completed; the payload is expected next.
    Header(Descriptor),
    /// A whole frame completed and was delivered.
    Frame(Descriptor),
}

enum Payload {
    /// The whole packet buffer, filled front to back.
    Packet(BytesMut),
    /// The not-yet-read tail of the memblock; read prefixes are split off.
    Memblock(BytesMut),
}

enum ReadState {
    AwaitingHeader {
        raw: [u8; DESCRIPTOR_SIZE],
        filled: usize,
    },
    AwaitingPayload {
        descriptor: Descriptor,
        payload: Payload,
        filled: usize,
    },
}

impl ReadState {
    fn header() -> Self {
        ReadState::AwaitingHeader {
            raw: [0u8; DESCRIPTOR_SIZE],
            filled: 0,
        }
    }
}

type PacketCallback = Box<dyn FnMut(Packet)>;
type MemblockCallback = Box<dyn FnMut(MemblockSlice)>;

/// Inbound frame assembler.
///
/// Each [`read_step`](Self::read_step) makes one channel read into the
/// descriptor or the payload, whichever is due. Packets are delivered whole
/// once complete. Memblock payloads are delivered as they arrive, one slice
/// per read, so a large frame never has to sit in memory on the consumer's
/// behalf.
pub struct FrameReader {
    state: ReadState,
    allocator: Box<dyn Allocator>,
    on_packet: Option<PacketCallback>,
    on_memblock: Option<MemblockCallback>,
    config: FrameConfig,
}

impl FrameReader {
    /// Create a reader with default configuration.
    pub fn new() -> Self {
        Self::with_config(FrameConfig::default())
    }

    /// Create a reader with explicit configuration.
    pub fn with_config(config: FrameConfig) -> Self {
        Self::with_allocator(config, HeapAllocator)
    }

    /// Create a reader drawing payload buffers from `allocator`.
    pub fn with_allocator(config: FrameConfig, allocator: impl Allocator + 'static) -> Self {
        Self {
            state: ReadState::header(),
            allocator: Box::new(allocator),
            on_packet: None,
            on_memblock: None,
            config,
        }
    }

    /// Register the consumer of complete packets. Replaces any previous one.
    pub fn set_packet_callback<F>(&mut self, callback: F)
    where
        F: FnMut(Packet) + 'static,
    {
        self.on_packet = Some(Box::new(callback));
    }

    /// Register the consumer of memblock slices. Replaces any previous one.
    pub fn set_memblock_callback<F>(&mut self, callback: F)
    where
        F: FnMut(MemblockSlice) + 'static,
    {
        self.on_memblock = Some(Box::new(callback));
    }

    /// Bytes of the current frame read so far, descriptor included.
    pub fn cursor(&self) -> usize {
        match &self.state {
            ReadState::AwaitingHeader { filled, .. } => *filled,
            ReadState::AwaitingPayload { filled, .. } => DESCRIPTOR_SIZE + filled,
        }
    }

    /// Descriptor of the frame whose payload is being read, if any.
    pub fn current(&self) -> Option<Descriptor> {
        match &self.state {
            ReadState::AwaitingHeader { .. } => None,
            ReadState::AwaitingPayload { descriptor, .. } => Some(*descriptor),
        }
    }

    /// Make one read attempt on `channel`.
    ///
    /// A zero-byte read is [`FrameError::ConnectionClosed`]: the protocol has
    /// no clean end-of-stream. A descriptor over the configured maximum fails
    /// with [`FrameError::FrameTooLarge`] before any payload buffer exists.
    pub fn read_step<C: IoChannel + ?Sized>(&mut self, channel: &mut C) -> Result<ReadOutcome> {
        let result = match &mut self.state {
            ReadState::AwaitingHeader { raw, filled } => channel.read(&mut raw[*filled..]),
            ReadState::AwaitingPayload {
                payload: Payload::Packet(buf),
                filled,
                ..
            } => channel.read(&mut buf[*filled..]),
            ReadState::AwaitingPayload {
                payload: Payload::Memblock(tail),
                ..
            } => channel.read(&mut tail[..]),
        };

        let read = match result {
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(n) => n,
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                return Ok(ReadOutcome::Pending);
            }
            Err(err) => return Err(FrameError::Io(err)),
        };

        match &mut self.state {
            ReadState::AwaitingHeader { raw, filled } => {
                *filled += read;
                if *filled < DESCRIPTOR_SIZE {
                    return Ok(ReadOutcome::Progress { read });
                }

                let descriptor = Descriptor::decode(raw);
                descriptor.validate(self.config.max_frame_size())?;

                let len = descriptor.payload_len();
                let payload = if descriptor.is_packet() {
                    Payload::Packet(self.allocator.packet(len))
                } else {
                    Payload::Memblock(self.allocator.memblock(len))
                };
                trace!(
                    channel = descriptor.channel,
                    length = descriptor.length,
                    delta = descriptor.delta,
                    "frame descriptor read"
                );
                self.state = ReadState::AwaitingPayload {
                    descriptor,
                    payload,
                    filled: 0,
                };

                if len == 0 {
                    self.complete();
                    return Ok(ReadOutcome::Frame(descriptor));
                }
                Ok(ReadOutcome::Header(descriptor))
            }
            ReadState::AwaitingPayload {
                descriptor,
                payload,
                filled,
            } => {
                let offset = *filled;
                *filled += read;

                if let Payload::Memblock(tail) = payload {
                    let slice = tail.split_to(read).freeze();
                    if let Some(callback) = self.on_memblock.as_mut() {
                        callback(MemblockSlice {
                            channel: descriptor.channel,
                            delta: descriptor.delta,
                            offset,
                            chunk: Memchunk::whole(Memblock::window(
                                slice,
                                offset,
                                descriptor.payload_len(),
                            )),
                        });
                    }
                }

                if *filled < descriptor.payload_len() {
                    return Ok(ReadOutcome::Progress { read });
                }

                let descriptor = *descriptor;
                self.complete();
                Ok(ReadOutcome::Frame(descriptor))
            }
        }
    }

    /// Drop any partially read frame and wait for a new descriptor.
    ///
    /// Returns whether a partial frame was discarded.
    pub fn abandon(&mut self) -> bool {
        let partial = self.cursor() > 0;
        self.state = ReadState::header();
        partial
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    fn complete(&mut self) {
        let state = std::mem::replace(&mut self.state, ReadState::header());
        if let ReadState::AwaitingPayload {
            descriptor,
            payload: Payload::Packet(buf),
            ..
        } = state
        {
            trace!(length = descriptor.length, "packet frame read");
            let packet = Packet::from(buf.freeze());
            if let Some(callback) = self.on_packet.as_mut() {
                callback(packet);
            }
        }
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FrameReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameReader")
            .field("cursor", &self.cursor())
            .field("current", &self.current())
            .field("config", &self.config)
            .finish()
    }
}
