use pstream_frame::{
    Allocator, FrameConfig, FrameError, FrameReader, FrameWriter, HeapAllocator, MemblockSlice,
    Memchunk, Packet, ReadOutcome, WriteOutcome,
};
use pstream_transport::IoChannel;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::error::{Result, StreamError};
use crate::mainloop::{DeferSource, Dispatch, Mainloop};

/// Configuration for a [`Stream`].
#[derive(Debug, Clone, Default)]
pub struct StreamConfig {
    pub frame: FrameConfig,
}

/// Running counters for one stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    pub frames_sent: u64,
    pub payload_bytes_sent: u64,
    pub packets_received: u64,
    pub memblock_frames_received: u64,
    pub payload_bytes_received: u64,
    pub dispatches: u64,
}

/// A framed, full-duplex packet and memblock stream over one channel.
///
/// The stream owns its channel and its wakeup registration. Every dispatch
/// disarms the wakeup, makes one write step, then one read step. The wakeup
/// is re-armed while outbound work remains, so queued frames keep moving even
/// when no new readiness event arrives.
///
/// Any transport error, zero-byte read or oversized frame kills the stream.
/// Death is one-way: later dispatches do nothing, and the cause stays
/// available through [`death_cause`](Self::death_cause). The queue is kept
/// (and counted) until the stream is dropped.
///
/// Dropping the stream discards queued frames without flushing them. Wait for
/// the drained callback first if delivery matters.
pub struct Stream<C: IoChannel> {
    channel: C,
    defer: DeferSource,
    writer: FrameWriter,
    reader: FrameReader,
    dead: Option<FrameError>,
    stats: StreamStats,
}

impl<C: IoChannel> Stream<C> {
    /// Create a stream with default configuration.
    pub fn new(mainloop: &Mainloop, channel: C) -> Self {
        Self::with_config(mainloop, channel, StreamConfig::default())
    }

    /// Create a stream with explicit configuration.
    pub fn with_config(mainloop: &Mainloop, channel: C, config: StreamConfig) -> Self {
        Self::with_allocator(mainloop, channel, config, HeapAllocator)
    }

    /// Create a stream whose inbound payloads come from `allocator`.
    pub fn with_allocator(
        mainloop: &Mainloop,
        channel: C,
        config: StreamConfig,
        allocator: impl Allocator + 'static,
    ) -> Self {
        let defer = mainloop.defer_source();
        debug!(max_frame_size = config.frame.max_frame_size(), "stream created");
        Self {
            channel,
            defer,
            writer: FrameWriter::with_config(config.frame.clone()),
            reader: FrameReader::with_allocator(config.frame, allocator),
            dead: None,
            stats: StreamStats::default(),
        }
    }

    /// Queue a packet for sending. Fails with [`StreamError::Dead`] once the
    /// stream has died.
    pub fn send_packet(&mut self, packet: Packet) -> Result<()> {
        self.ensure_alive()?;
        self.writer.enqueue_packet(packet)?;
        self.defer.enable(true);
        Ok(())
    }

    /// Queue a memblock slice for sending on a nonzero `channel`.
    pub fn send_memblock(&mut self, channel: u32, delta: i32, chunk: Memchunk) -> Result<()> {
        self.ensure_alive()?;
        self.writer.enqueue_memblock(channel, delta, chunk)?;
        self.defer.enable(true);
        Ok(())
    }

    fn ensure_alive(&self) -> Result<()> {
        match self.dead {
            Some(_) => Err(StreamError::Dead),
            None => Ok(()),
        }
    }

    /// Register the callback fired each time a completed write empties the queue.
    pub fn set_drained_callback<F>(&mut self, callback: F)
    where
        F: FnMut() + 'static,
    {
        self.writer.set_drained_callback(callback);
    }

    /// Register the consumer of complete inbound packets.
    pub fn set_packet_callback<F>(&mut self, callback: F)
    where
        F: FnMut(Packet) + 'static,
    {
        self.reader.set_packet_callback(callback);
    }

    /// Register the consumer of inbound memblock slices.
    pub fn set_memblock_callback<F>(&mut self, callback: F)
    where
        F: FnMut(MemblockSlice) + 'static,
    {
        self.reader.set_memblock_callback(callback);
    }

    /// Drive both directions once.
    pub fn dispatch(&mut self) {
        self.defer.enable(false);
        if self.dead.is_some() {
            return;
        }
        self.stats.dispatches += 1;

        let wrote = self.do_write();
        self.do_read();

        if wrote && self.dead.is_none() && self.writer.has_pending() {
            self.defer.enable(true);
        }
    }

    /// Whether a fatal error has stopped the stream.
    pub fn is_dead(&self) -> bool {
        self.dead.is_some()
    }

    /// The error that killed the stream, if it is dead.
    pub fn death_cause(&self) -> Option<&FrameError> {
        self.dead.as_ref()
    }

    /// Whether any frame is queued or partially written.
    pub fn has_pending_writes(&self) -> bool {
        self.writer.has_pending()
    }

    /// Frames not yet fully written, the in-flight one included.
    pub fn queued(&self) -> usize {
        self.writer.queued() + usize::from(self.writer.cursor().is_some())
    }

    /// Bytes of the in-flight outbound frame already written.
    pub fn write_cursor(&self) -> Option<usize> {
        self.writer.cursor()
    }

    /// Bytes of the current inbound frame already read.
    pub fn read_cursor(&self) -> usize {
        self.reader.cursor()
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Tear the stream down. Same as dropping it.
    pub fn destroy(self) {
        drop(self);
    }

    fn do_write(&mut self) -> bool {
        if !self.channel.is_writable() {
            return false;
        }

        match self.writer.write_step(&mut self.channel) {
            Ok(WriteOutcome::Completed { descriptor, .. }) => {
                self.stats.frames_sent += 1;
                self.stats.payload_bytes_sent += u64::from(descriptor.length);
            }
            Ok(WriteOutcome::Progress { written }) => trace!(written, "partial frame write"),
            Ok(WriteOutcome::Idle) => {}
            Err(err) => self.die(err),
        }
        true
    }

    fn do_read(&mut self) {
        if self.dead.is_some() || !self.channel.is_readable() {
            return;
        }

        match self.reader.read_step(&mut self.channel) {
            Ok(ReadOutcome::Frame(descriptor)) => {
                if descriptor.is_packet() {
                    self.stats.packets_received += 1;
                } else {
                    self.stats.memblock_frames_received += 1;
                }
                self.stats.payload_bytes_received += u64::from(descriptor.length);
            }
            Ok(_) => {}
            Err(err) => self.die(err),
        }
    }

    fn die(&mut self, err: FrameError) {
        let abandoned_write = self.writer.abandon_current().is_some();
        let abandoned_read = self.reader.abandon();
        warn!(
            error = %err,
            queued = self.writer.queued(),
            abandoned_write,
            abandoned_read,
            "stream died"
        );
        self.defer.enable(false);
        self.dead = Some(err);
    }
}

impl<C: IoChannel> Dispatch for Stream<C> {
    fn wants_prepare(&self) -> bool {
        self.defer.is_enabled()
    }

    fn io_ready(&self) -> bool {
        if self.dead.is_some() {
            return false;
        }
        self.channel.is_readable() || (self.writer.has_pending() && self.channel.is_writable())
    }

    fn dispatch(&mut self) {
        Stream::dispatch(self);
    }
}

impl<C: IoChannel> Drop for Stream<C> {
    fn drop(&mut self) {
        let discarded = self.writer.clear();
        let partial_read = self.reader.abandon();
        debug!(
            discarded,
            partial_read,
            dead = self.dead.is_some(),
            "stream destroyed"
        );
    }
}

impl<C: IoChannel> std::fmt::Debug for Stream<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("writer", &self.writer)
            .field("reader", &self.reader)
            .field("dead", &self.dead)
            .field("stats", &self.stats)
            .finish()
    }
}
