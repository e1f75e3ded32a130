//! Framed packet and memblock streams over non-blocking byte channels.
//!
//! A [`stream::Stream`] owns one full-duplex channel and moves two kinds of
//! frames across it: opaque packets, and slices of shared memory blocks
//! tagged with a channel id and a signed delta. It is driven by a
//! single-threaded [`stream::Mainloop`].
//!
//! # Crate Structure
//!
//! - [`transport`]: the `IoChannel` seam, Unix socket pairs, in-memory pipes
//! - [`frame`]: descriptor codec and the resumable writer/reader
//! - [`stream`]: stream lifecycle and the cooperative loop

/// Re-export transport types.
pub mod transport {
    pub use pstream_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use pstream_frame::*;
}

/// Re-export stream and loop types.
pub mod stream {
    pub use pstream_stream::*;
}
