/// Errors that can occur in stream operations.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] pstream_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] pstream_frame::FrameError),

    /// The stream died on an earlier I/O or protocol error and accepts no
    /// more sends.
    #[error("stream is dead")]
    Dead,

    /// The loop ran past its deadline.
    #[error("event loop timed out after {0:?}")]
    Timeout(std::time::Duration),
}

pub type Result<T> = std::result::Result<T, StreamError>;
