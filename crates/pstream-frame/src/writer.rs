use std::collections::VecDeque;
use std::io::ErrorKind;

use pstream_transport::IoChannel;
use tracing::trace;

use crate::codec::{Descriptor, FrameConfig, DESCRIPTOR_SIZE, PACKET_CHANNEL};
use crate::error::{FrameError, Result};
use crate::memblock::{Memchunk, Packet};

/// One queued unit of outbound work.
#[derive(Debug, Clone)]
pub enum SendItem {
    Packet(Packet),
    Memblock {
        channel: u32,
        delta: i32,
        chunk: Memchunk,
    },
}

impl SendItem {
    /// The descriptor announcing this item on the wire.
    pub fn descriptor(&self) -> Descriptor {
        match self {
            SendItem::Packet(packet) => Descriptor::packet(packet.len() as u32),
            SendItem::Memblock {
                channel,
                delta,
                chunk,
            } => Descriptor::memblock(chunk.len() as u32, *channel, *delta),
        }
    }

    /// The payload bytes following the descriptor.
    pub fn payload(&self) -> &[u8] {
        match self {
            SendItem::Packet(packet) => packet.data(),
            SendItem::Memblock { chunk, .. } => chunk.as_slice(),
        }
    }
}

/// Result of a single [`FrameWriter::write_step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Nothing was queued.
    Idle,
    /// Some (possibly zero) bytes of the in-flight frame were written.
    Progress { written: usize },
    /// The in-flight frame finished with this step.
    Completed {
        descriptor: Descriptor,
        written: usize,
        queue_empty: bool,
    },
}

#[derive(Debug, Clone, Copy)]
enum WritePhase {
    Header { written: usize },
    Payload { written: usize },
}

#[derive(Debug)]
struct InFlight {
    item: SendItem,
    descriptor: Descriptor,
    header: [u8; DESCRIPTOR_SIZE],
    phase: WritePhase,
}

impl InFlight {
    fn new(item: SendItem) -> Self {
        let descriptor = item.descriptor();
        Self {
            header: descriptor.encode(),
            descriptor,
            item,
            phase: WritePhase::Header { written: 0 },
        }
    }

    fn remaining(&self) -> &[u8] {
        match self.phase {
            WritePhase::Header { written } => &self.header[written..],
            WritePhase::Payload { written } => &self.item.payload()[written..],
        }
    }

    fn advance(&mut self, n: usize) {
        self.phase = match self.phase {
            WritePhase::Header { written } if written + n >= DESCRIPTOR_SIZE => {
                WritePhase::Payload {
                    written: written + n - DESCRIPTOR_SIZE,
                }
            }
            WritePhase::Header { written } => WritePhase::Header {
                written: written + n,
            },
            WritePhase::Payload { written } => WritePhase::Payload {
                written: written + n,
            },
        };
    }

    fn cursor(&self) -> usize {
        match self.phase {
            WritePhase::Header { written } => written,
            WritePhase::Payload { written } => DESCRIPTOR_SIZE + written,
        }
    }

    fn is_complete(&self) -> bool {
        self.cursor() >= self.descriptor.frame_len()
    }
}

/// Outbound queue driver.
///
/// Items leave in strict FIFO order and a frame's bytes are never
/// interleaved with another's. Each [`write_step`](Self::write_step) makes
/// exactly one channel write and resumes from wherever the last one stopped.
pub struct FrameWriter {
    queue: VecDeque<SendItem>,
    current: Option<InFlight>,
    on_drained: Option<Box<dyn FnMut()>>,
    config: FrameConfig,
}

impl FrameWriter {
    /// Create a writer with default configuration.
    pub fn new() -> Self {
        Self::with_config(FrameConfig::default())
    }

    /// Create a writer with explicit configuration.
    pub fn with_config(config: FrameConfig) -> Self {
        Self {
            queue: VecDeque::new(),
            current: None,
            on_drained: None,
            config,
        }
    }

    /// Queue a packet frame.
    pub fn enqueue_packet(&mut self, packet: Packet) -> Result<()> {
        self.check_size(packet.len())?;
        self.queue.push_back(SendItem::Packet(packet));
        Ok(())
    }

    /// Queue a memblock frame on a nonzero `channel`.
    pub fn enqueue_memblock(&mut self, channel: u32, delta: i32, chunk: Memchunk) -> Result<()> {
        if channel == PACKET_CHANNEL {
            return Err(FrameError::InvalidChannel);
        }
        self.check_size(chunk.len())?;
        self.queue.push_back(SendItem::Memblock {
            channel,
            delta,
            chunk,
        });
        Ok(())
    }

    /// Register the callback fired when a completed write empties the queue.
    ///
    /// Replaces any previously registered callback.
    pub fn set_drained_callback<F>(&mut self, callback: F)
    where
        F: FnMut() + 'static,
    {
        self.on_drained = Some(Box::new(callback));
    }

    /// Whether an item is queued or partially written.
    pub fn has_pending(&self) -> bool {
        self.current.is_some() || !self.queue.is_empty()
    }

    /// Items waiting behind the in-flight one.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Bytes of the in-flight frame already written, if any.
    pub fn cursor(&self) -> Option<usize> {
        self.current.as_ref().map(InFlight::cursor)
    }

    /// Make one write attempt on `channel`.
    ///
    /// `WouldBlock` and `Interrupted` are reported as zero progress. Any other
    /// channel error is returned unchanged and leaves the cursor where it was.
    pub fn write_step<C: IoChannel + ?Sized>(&mut self, channel: &mut C) -> Result<WriteOutcome> {
        if self.current.is_none() {
            let Some(item) = self.queue.pop_front() else {
                return Ok(WriteOutcome::Idle);
            };
            self.current = Some(InFlight::new(item));
        }
        let Some(current) = self.current.as_mut() else {
            return Ok(WriteOutcome::Idle);
        };

        let written = match channel.write(current.remaining()) {
            Ok(n) => n,
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                return Ok(WriteOutcome::Progress { written: 0 });
            }
            Err(err) => return Err(FrameError::Io(err)),
        };
        current.advance(written);
        trace!(written, cursor = current.cursor(), "frame write step");

        if !current.is_complete() {
            return Ok(WriteOutcome::Progress { written });
        }

        let descriptor = current.descriptor;
        self.current = None;
        let queue_empty = self.queue.is_empty();
        trace!(
            channel = descriptor.channel,
            length = descriptor.length,
            queue_empty,
            "frame written"
        );

        if queue_empty {
            if let Some(callback) = self.on_drained.as_mut() {
                callback();
            }
        }

        Ok(WriteOutcome::Completed {
            descriptor,
            written,
            queue_empty,
        })
    }

    /// Drop the partially written item, if any.
    pub fn abandon_current(&mut self) -> Option<SendItem> {
        self.current.take().map(|in_flight| in_flight.item)
    }

    /// Drop every queued and in-flight item, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.queue.len() + usize::from(self.current.is_some());
        self.queue.clear();
        self.current = None;
        dropped
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    fn check_size(&self, size: usize) -> Result<()> {
        let max = self.config.max_frame_size();
        if size > max {
            return Err(FrameError::FrameTooLarge { size, max });
        }
        Ok(())
    }
}

impl Default for FrameWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FrameWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameWriter")
            .field("queued", &self.queue.len())
            .field("cursor", &self.cursor())
            .field("config", &self.config)
            .finish()
    }
}
