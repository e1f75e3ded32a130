//! Event-loop driven packet and memblock streams.
//!
//! A [`Stream`] owns one channel and binds the outbound and inbound frame
//! state machines to an event loop. Whenever the channel is ready, or the
//! loop is about to block with work queued, it writes one step and then reads
//! one step. Nothing ever blocks.

pub mod error;
pub mod mainloop;
pub mod stream;

pub use error::{Result, StreamError};
pub use mainloop::{DeferSource, Dispatch, LoopConfig, Mainloop};
pub use stream::{Stream, StreamConfig, StreamStats};
