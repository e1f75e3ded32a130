//! Non-blocking byte channel abstraction.
//!
//! The stream core never blocks: it asks a channel whether it is readable or
//! writable and then makes exactly one read or write attempt. This crate
//! provides that contract as the [`IoChannel`] trait and two implementations:
//! - [`UnixChannel`], a non-blocking Unix domain socket (Linux/macOS)
//! - [`MemoryChannel`], an in-process duplex pair with fault injection
//!
//! This is the lowest layer of pstream.

pub mod error;
pub mod memory;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use memory::MemoryChannel;
pub use traits::IoChannel;

#[cfg(unix)]
pub use uds::UnixChannel;
