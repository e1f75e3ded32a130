use crate::error::{FrameError, Result};

/// Frame descriptor: length (4) + channel (4) + delta (4) = 12 bytes.
pub const DESCRIPTOR_SIZE: usize = 12;

/// Largest payload a receiver accepts: 64 KiB.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Channel number reserved for packet frames.
pub const PACKET_CHANNEL: u32 = 0;

/// The fixed header preceding every frame.
///
/// Fields travel in native byte order, exactly as the host lays out a `u32`.
/// Peers on the same host (the only deployment this protocol targets) agree
/// on it without conversion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Descriptor {
    /// Payload byte count, excluding the descriptor.
    pub length: u32,
    /// 0 for packet frames, otherwise the memblock channel.
    pub channel: u32,
    /// Signed time offset; meaningful for memblock frames only.
    pub delta: i32,
}

impl Descriptor {
    /// Descriptor for a packet frame of `length` bytes.
    pub fn packet(length: u32) -> Self {
        Self {
            length,
            channel: PACKET_CHANNEL,
            delta: 0,
        }
    }

    /// Descriptor for a memblock frame.
    pub fn memblock(length: u32, channel: u32, delta: i32) -> Self {
        Self {
            length,
            channel,
            delta,
        }
    }

    /// Whether this descriptor announces a packet frame.
    pub fn is_packet(&self) -> bool {
        self.channel == PACKET_CHANNEL
    }

    /// Payload length as a `usize`.
    pub fn payload_len(&self) -> usize {
        self.length as usize
    }

    /// Total wire size of the frame (descriptor + payload).
    pub fn frame_len(&self) -> usize {
        DESCRIPTOR_SIZE + self.payload_len()
    }

    /// Reject payloads larger than `max`.
    pub fn validate(&self, max: usize) -> Result<()> {
        if self.payload_len() > max {
            return Err(FrameError::FrameTooLarge {
                size: self.payload_len(),
                max,
            });
        }
        Ok(())
    }

    /// Serialize into the wire layout.
    pub fn encode(&self) -> [u8; DESCRIPTOR_SIZE] {
        let mut raw = [0u8; DESCRIPTOR_SIZE];
        raw[0..4].copy_from_slice(&self.length.to_ne_bytes());
        raw[4..8].copy_from_slice(&self.channel.to_ne_bytes());
        raw[8..12].copy_from_slice(&(self.delta as u32).to_ne_bytes());
        raw
    }

    /// Parse the wire layout. No validation is done here.
    pub fn decode(raw: &[u8; DESCRIPTOR_SIZE]) -> Self {
        let field = |at: usize| u32::from_ne_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);
        Self {
            length: field(0),
            channel: field(4),
            delta: field(8) as i32,
        }
    }
}

/// Configuration for frame encoding and decoding.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default and ceiling: 64 KiB.
    pub max_frame_size: usize,
}

impl FrameConfig {
    /// Effective limit, never above [`MAX_FRAME_SIZE`].
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size.min(MAX_FRAME_SIZE)
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

/// Whole-frame helpers for tests that inspect or build raw wire bytes.
#[cfg(test)]
pub(crate) mod wire {
    use bytes::{Buf, BufMut, Bytes, BytesMut};

    use super::{Descriptor, DESCRIPTOR_SIZE, MAX_FRAME_SIZE};
    use crate::error::{FrameError, Result};

    /// Encode a whole frame into `dst`.
    ///
    /// Wire format:
    /// ```text
    /// ┌──────────────┬──────────────┬──────────────┬──────────────────┐
    /// │ Length (4B)  │ Channel (4B) │ Delta (4B)   │ Payload          │
    /// │ native order │ native order │ native i32   │ (Length bytes)   │
    /// └──────────────┴──────────────┴──────────────┴──────────────────┘
    /// ```
    pub(crate) fn encode_frame(
        channel: u32,
        delta: i32,
        payload: &[u8],
        dst: &mut BytesMut,
    ) -> Result<()> {
        if payload.len() > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge {
                size: payload.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        let descriptor = Descriptor::memblock(payload.len() as u32, channel, delta);
        dst.reserve(descriptor.frame_len());
        dst.put_slice(&descriptor.encode());
        dst.put_slice(payload);
        Ok(())
    }

    /// Decode one whole frame from a buffer.
    ///
    /// Returns `Ok(None)` if the buffer doesn't hold a complete frame yet.
    /// On success, consumes the frame bytes from the buffer.
    pub(crate) fn decode_frame(
        src: &mut BytesMut,
        max_payload: usize,
    ) -> Result<Option<(Descriptor, Bytes)>> {
        if src.len() < DESCRIPTOR_SIZE {
            return Ok(None);
        }

        let mut raw = [0u8; DESCRIPTOR_SIZE];
        raw.copy_from_slice(&src[..DESCRIPTOR_SIZE]);
        let descriptor = Descriptor::decode(&raw);
        descriptor.validate(max_payload)?;

        if src.len() < descriptor.frame_len() {
            return Ok(None);
        }

        src.advance(DESCRIPTOR_SIZE);
        let payload = src.split_to(descriptor.payload_len()).freeze();
        Ok(Some((descriptor, payload)))
    }
}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, BytesMut};

    use super::wire::{decode_frame, encode_frame};
    use super::*;

    #[test]
    fn descriptor_layout_is_native_order() {
        let descriptor = Descriptor::memblock(0x0102_0304, 7, -2);
        let raw = descriptor.encode();

        assert_eq!(&raw[0..4], &0x0102_0304u32.to_ne_bytes());
        assert_eq!(&raw[4..8], &7u32.to_ne_bytes());
        assert_eq!(&raw[8..12], &(-2i32).to_ne_bytes());
        assert_eq!(Descriptor::decode(&raw), descriptor);
    }

    #[test]
    fn packet_descriptor_zeroes_channel_and_delta() {
        let descriptor = Descriptor::packet(5);
        assert!(descriptor.is_packet());
        assert_eq!(descriptor.channel, 0);
        assert_eq!(descriptor.delta, 0);
        assert_eq!(descriptor.frame_len(), DESCRIPTOR_SIZE + 5);
    }

    #[test]
    fn negative_delta_survives_reinterpretation() {
        let descriptor = Descriptor::memblock(0, 1, i32::MIN);
        assert_eq!(Descriptor::decode(&descriptor.encode()).delta, i32::MIN);
    }

    #[test]
    fn validate_bounds() {
        assert!(Descriptor::packet(MAX_FRAME_SIZE as u32)
            .validate(MAX_FRAME_SIZE)
            .is_ok());
        let err = Descriptor::packet(MAX_FRAME_SIZE as u32 + 1)
            .validate(MAX_FRAME_SIZE)
            .unwrap_err();
        assert!(matches!(
            err,
            FrameError::FrameTooLarge { size, max } if size == MAX_FRAME_SIZE + 1 && max == MAX_FRAME_SIZE
        ));
    }

    #[test]
    fn decode_incomplete_descriptor() {
        let mut buf = BytesMut::from(&[0u8; DESCRIPTOR_SIZE - 1][..]);
        assert!(decode_frame(&mut buf, MAX_FRAME_SIZE).unwrap().is_none());
    }

    #[test]
    fn decode_incomplete_payload() {
        let mut buf = BytesMut::new();
        encode_frame(3, 1, b"hello", &mut buf).unwrap();
        buf.truncate(DESCRIPTOR_SIZE + 2);
        assert!(decode_frame(&mut buf, MAX_FRAME_SIZE).unwrap().is_none());
    }

    #[test]
    fn decode_oversized_header() {
        let mut buf = BytesMut::new();
        buf.put_slice(&Descriptor::packet(MAX_FRAME_SIZE as u32 + 1).encode());
        let err = decode_frame(&mut buf, MAX_FRAME_SIZE).unwrap_err();
        assert!(matches!(err, FrameError::FrameTooLarge { .. }));
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let payload = vec![0u8; MAX_FRAME_SIZE + 1];
        let mut buf = BytesMut::new();
        assert!(encode_frame(0, 0, &payload, &mut buf).is_err());
        assert!(buf.is_empty());
    }

    #[test]
    fn multiple_frames_in_one_buffer() {
        let mut buf = BytesMut::new();
        encode_frame(0, 0, b"first", &mut buf).unwrap();
        encode_frame(9, -40, b"second", &mut buf).unwrap();

        let (d1, p1) = decode_frame(&mut buf, MAX_FRAME_SIZE).unwrap().unwrap();
        assert!(d1.is_packet());
        assert_eq!(p1.as_ref(), b"first");

        let (d2, p2) = decode_frame(&mut buf, MAX_FRAME_SIZE).unwrap().unwrap();
        assert_eq!((d2.channel, d2.delta), (9, -40));
        assert_eq!(p2.as_ref(), b"second");
        assert!(buf.is_empty());
    }

    #[test]
    fn config_clamps_to_ceiling() {
        let cfg = FrameConfig {
            max_frame_size: usize::MAX,
        };
        assert_eq!(cfg.max_frame_size(), MAX_FRAME_SIZE);

        let cfg = FrameConfig { max_frame_size: 16 };
        assert_eq!(cfg.max_frame_size(), 16);
    }
}
