/// Errors that can occur while framing or unframing a stream.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A frame declares (or would need) more payload than allowed.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Memblock frames must target a nonzero channel.
    #[error("memblock frames require a nonzero channel")]
    InvalidChannel,

    /// A memchunk view does not fit inside its memblock.
    #[error("chunk {index}+{length} out of bounds for memblock of {size} bytes")]
    ChunkOutOfBounds {
        index: usize,
        length: usize,
        size: usize,
    },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The channel returned no data: the peer is gone.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
