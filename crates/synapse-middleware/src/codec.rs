//! Frame codec for the bridge wire protocol.
//!
//! Every frame is self-delimiting and carries two CRC-32 checks, one over
//! the header and one over the payload:
//!
//! ```text
//! +------+----------+---------+-------------+-----------+------------+
//! | SOF  | type u16 | len u16 | hdr crc u32 | payload   | crc u32    |
//! | 0x01 |    LE    |   LE    | crc(0..5)   | len bytes | crc(pld)   |
//! +------+----------+---------+-------------+-----------+------------+
//! ```
//!
//! Payloads are `bincode`-serialised catalog messages.  The decoder works on
//! a bounded buffer fed with whatever the socket returned and skips over
//! corrupt data until the next frame whose header checks out.

use synapse_types::{Message, SynapseError};
use tracing::debug;

/// Start-of-frame marker.
pub const SOF: u8 = 0x01;
/// SOF + type + len + header CRC.
pub const HEADER_LEN: usize = 1 + 2 + 2 + 4;
/// Trailing payload CRC.
pub const TRAILER_LEN: usize = 4;
/// Default cap on a single payload.
pub const DEFAULT_MAX_PAYLOAD: usize = 1024;
/// Default size of the receive buffer.
pub const DEFAULT_RX_CAPACITY: usize = 2048;

/// One decoded frame: type tag plus raw payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tag: u16,
    pub payload: Vec<u8>,
}

/// Why the decoder started discarding bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeFault {
    /// Bytes before the next start-of-frame marker.
    Garbage,
    /// Header checksum mismatch.
    HeaderChecksum,
    /// Header announces more than `max_payload` bytes.
    Oversized { len: usize },
    /// Header was valid but the payload checksum failed.
    PayloadChecksum { tag: u16, len: usize },
    /// A frame started but never finished: a complete frame begins inside
    /// the bytes it claims.
    Truncated { tag: u16, len: usize },
}

impl std::fmt::Display for DecodeFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeFault::Garbage => write!(f, "garbage before start of frame"),
            DecodeFault::HeaderChecksum => write!(f, "header checksum mismatch"),
            DecodeFault::Oversized { len } => write!(f, "oversized payload length {len}"),
            DecodeFault::PayloadChecksum { tag, len } => {
                write!(f, "payload checksum mismatch (type {tag}, {len} bytes)")
            }
            DecodeFault::Truncated { tag, len } => {
                write!(f, "truncated frame (type {tag}, {len} bytes announced)")
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Encoding
// ─────────────────────────────────────────────────────────────────────────────

/// Write a complete frame for an already-serialised payload into `out`.
///
/// # Errors
///
/// [`SynapseError::CapacityExceeded`] when the payload does not fit the
/// 16-bit length field.
pub fn write_frame(tag: u16, payload: &[u8], out: &mut Vec<u8>) -> Result<(), SynapseError> {
    let len = u16::try_from(payload.len()).map_err(|_| SynapseError::CapacityExceeded {
        needed: payload.len(),
        capacity: u16::MAX as usize,
    })?;
    out.reserve(HEADER_LEN + payload.len() + TRAILER_LEN);
    let start = out.len();
    out.push(SOF);
    out.extend_from_slice(&tag.to_le_bytes());
    out.extend_from_slice(&len.to_le_bytes());
    let header_crc = crc32fast::hash(&out[start..start + 5]);
    out.extend_from_slice(&header_crc.to_le_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    Ok(())
}

/// Serialises catalog messages into frames, reusing one scratch buffer.
pub struct FrameEncoder {
    max_payload: usize,
    buf: Vec<u8>,
}

impl FrameEncoder {
    pub fn new(max_payload: usize) -> Self {
        Self {
            max_payload,
            buf: Vec::with_capacity(HEADER_LEN + max_payload + TRAILER_LEN),
        }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Encode `msg` as a frame tagged with `T::KIND`.
    ///
    /// The returned slice stays valid until the next call.
    ///
    /// # Errors
    ///
    /// * [`SynapseError::CapacityExceeded`] when the serialised message is
    ///   larger than `max_payload`; nothing is written.
    /// * [`SynapseError::Encode`] when serialisation fails.
    pub fn encode<T: Message>(&mut self, msg: &T) -> Result<&[u8], SynapseError> {
        let size = bincode::serialized_size(msg)
            .map_err(|e| SynapseError::Encode(format!("{}: {e}", T::KIND)))?
            as usize;
        if size > self.max_payload {
            return Err(SynapseError::CapacityExceeded {
                needed: size,
                capacity: self.max_payload,
            });
        }
        let payload =
            bincode::serialize(msg).map_err(|e| SynapseError::Encode(format!("{}: {e}", T::KIND)))?;
        self.buf.clear();
        write_frame(T::KIND.tag(), &payload, &mut self.buf)?;
        Ok(&self.buf)
    }
}

/// Deserialise a frame payload as `T`.
pub fn decode_payload<T: Message>(payload: &[u8]) -> Result<T, SynapseError> {
    bincode::deserialize(payload).map_err(|e| SynapseError::Decode(format!("{}: {e}", T::KIND)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Decoding
// ─────────────────────────────────────────────────────────────────────────────

/// Incremental, resynchronising frame decoder over a bounded buffer.
pub struct FrameDecoder {
    buf: Vec<u8>,
    capacity: usize,
    max_payload: usize,
    /// Inside a stretch of corrupt bytes; further discards are not reported.
    resyncing: bool,
    faults: u64,
}

impl FrameDecoder {
    /// `capacity` bounds the bytes buffered while waiting for a complete
    /// frame; it must be at least one maximal frame.
    pub fn new(capacity: usize, max_payload: usize) -> Self {
        let capacity = capacity.max(HEADER_LEN + max_payload + TRAILER_LEN);
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
            max_payload,
            resyncing: false,
            faults: 0,
        }
    }

    /// Room left before [`push`][Self::push] would fail.
    pub fn spare_capacity(&self) -> usize {
        self.capacity - self.buf.len()
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Decode faults reported since creation or the last [`reset`][Self::reset].
    pub fn faults(&self) -> u64 {
        self.faults
    }

    /// Drop buffered bytes and fault state, e.g. between connections.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.resyncing = false;
        self.faults = 0;
    }

    /// Append received bytes.
    ///
    /// # Errors
    ///
    /// [`SynapseError::CapacityExceeded`] when `bytes` does not fit; the
    /// buffer is left untouched.
    pub fn push(&mut self, bytes: &[u8]) -> Result<(), SynapseError> {
        let needed = self.buf.len() + bytes.len();
        if needed > self.capacity {
            return Err(SynapseError::CapacityExceeded {
                needed,
                capacity: self.capacity,
            });
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Pull the next frame out of the buffer.
    ///
    /// Returns `None` when more bytes are needed.  A `Some(Err(_))` is
    /// returned once at the start of every corrupt stretch; calling again
    /// continues with the bytes after it.
    pub fn next_frame(&mut self) -> Option<Result<Frame, DecodeFault>> {
        loop {
            if self.buf.is_empty() {
                return None;
            }

            if self.buf[0] != SOF {
                let skip = self
                    .buf
                    .iter()
                    .position(|&b| b == SOF)
                    .unwrap_or(self.buf.len());
                self.buf.drain(..skip);
                if let Some(fault) = self.fault(DecodeFault::Garbage) {
                    return Some(Err(fault));
                }
                continue;
            }

            if self.buf.len() < HEADER_LEN {
                return None;
            }

            let tag = u16::from_le_bytes([self.buf[1], self.buf[2]]);
            let len = u16::from_le_bytes([self.buf[3], self.buf[4]]) as usize;
            let header_crc =
                u32::from_le_bytes([self.buf[5], self.buf[6], self.buf[7], self.buf[8]]);

            if crc32fast::hash(&self.buf[..5]) != header_crc {
                self.buf.drain(..1);
                if let Some(fault) = self.fault(DecodeFault::HeaderChecksum) {
                    return Some(Err(fault));
                }
                continue;
            }
            if len > self.max_payload {
                self.buf.drain(..1);
                if let Some(fault) = self.fault(DecodeFault::Oversized { len }) {
                    return Some(Err(fault));
                }
                continue;
            }

            let total = HEADER_LEN + len + TRAILER_LEN;
            if self.buf.len() < total {
                // Waiting is only right if nothing valid has arrived since.
                let Some(next) = (1..self.buf.len()).find(|&at| self.complete_frame_at(at)) else {
                    return None;
                };
                self.buf.drain(..next);
                if let Some(fault) = self.fault(DecodeFault::Truncated { tag, len }) {
                    return Some(Err(fault));
                }
                continue;
            }

            let payload = &self.buf[HEADER_LEN..HEADER_LEN + len];
            let trailer = &self.buf[HEADER_LEN + len..total];
            let payload_crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
            if crc32fast::hash(payload) != payload_crc {
                // The length may belong to a truncated frame whose tail is the
                // start of the next one, so only step past the marker.
                self.buf.drain(..1);
                if let Some(fault) = self.fault(DecodeFault::PayloadChecksum { tag, len }) {
                    return Some(Err(fault));
                }
                continue;
            }

            let frame = Frame {
                tag,
                payload: payload.to_vec(),
            };
            self.buf.drain(..total);
            self.resyncing = false;
            debug!(tag, len, "frame decoded");
            return Some(Ok(frame));
        }
    }

    /// `true` when a frame passing both checksums is fully buffered at `at`.
    fn complete_frame_at(&self, at: usize) -> bool {
        let rest = &self.buf[at..];
        if rest.len() < HEADER_LEN || rest[0] != SOF {
            return false;
        }
        let header_crc = u32::from_le_bytes([rest[5], rest[6], rest[7], rest[8]]);
        if crc32fast::hash(&rest[..5]) != header_crc {
            return false;
        }
        let len = u16::from_le_bytes([rest[3], rest[4]]) as usize;
        if len > self.max_payload || rest.len() < HEADER_LEN + len + TRAILER_LEN {
            return false;
        }
        let payload = &rest[HEADER_LEN..HEADER_LEN + len];
        let trailer = &rest[HEADER_LEN + len..HEADER_LEN + len + TRAILER_LEN];
        crc32fast::hash(payload) == u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]])
    }

    /// Enter the resyncing state, reporting `fault` only if we were not
    /// already in it.
    fn fault(&mut self, fault: DecodeFault) -> Option<DecodeFault> {
        if self.resyncing {
            return None;
        }
        self.resyncing = true;
        self.faults += 1;
        Some(fault)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use synapse_types::{Joy, MessageKind, Status, Uptime};

    fn joy_frame(seq: u32) -> Vec<u8> {
        let joy = Joy {
            header: synapse_types::Header { seq, ..Default::default() },
            axes: vec![0.0, 0.5, -0.5, 0.0, 0.25],
            buttons: vec![0, 1, 0, 0, 0, 0, 0, 1],
        };
        let mut enc = FrameEncoder::new(DEFAULT_MAX_PAYLOAD);
        enc.encode(&joy).unwrap().to_vec()
    }

    fn drain(dec: &mut FrameDecoder) -> (Vec<Frame>, Vec<DecodeFault>) {
        let mut frames = Vec::new();
        let mut faults = Vec::new();
        while let Some(result) = dec.next_frame() {
            match result {
                Ok(f) => frames.push(f),
                Err(e) => faults.push(e),
            }
        }
        (frames, faults)
    }

    #[test]
    fn decodes_single_frame() {
        let bytes = joy_frame(1);
        let mut dec = FrameDecoder::new(DEFAULT_RX_CAPACITY, DEFAULT_MAX_PAYLOAD);
        dec.push(&bytes).unwrap();

        let frame = dec.next_frame().unwrap().unwrap();
        assert_eq!(frame.tag, MessageKind::Joy.tag());
        let joy: Joy = decode_payload(&frame.payload).unwrap();
        assert_eq!(joy.header.seq, 1);
        assert!(dec.next_frame().is_none());
        assert_eq!(dec.buffered(), 0);
    }

    #[test]
    fn decodes_frame_split_across_pushes() {
        let bytes = joy_frame(2);
        let mut dec = FrameDecoder::new(DEFAULT_RX_CAPACITY, DEFAULT_MAX_PAYLOAD);
        for chunk in bytes.chunks(3) {
            dec.push(chunk).unwrap();
        }
        let (frames, faults) = drain(&mut dec);
        assert_eq!(frames.len(), 1);
        assert!(faults.is_empty());
    }

    #[test]
    fn partial_header_waits_for_more_bytes() {
        let bytes = joy_frame(3);
        let mut dec = FrameDecoder::new(DEFAULT_RX_CAPACITY, DEFAULT_MAX_PAYLOAD);
        dec.push(&bytes[..4]).unwrap();
        assert!(dec.next_frame().is_none());
        assert_eq!(dec.faults(), 0);
    }

    fn assert_recovers(corrupt: Vec<u8>) {
        const K: u32 = 5;
        let mut stream = corrupt;
        for seq in 1..=K {
            stream.extend(joy_frame(seq));
        }

        let mut dec = FrameDecoder::new(4096, DEFAULT_MAX_PAYLOAD);
        dec.push(&stream).unwrap();
        let (frames, faults) = drain(&mut dec);

        assert_eq!(faults.len(), 1, "exactly one fault, got {faults:?}");
        assert_eq!(dec.faults(), 1);
        assert_eq!(frames.len(), K as usize);
        let seqs: Vec<u32> = frames
            .iter()
            .map(|f| decode_payload::<Joy>(&f.payload).unwrap().header.seq)
            .collect();
        assert_eq!(seqs, (1..=K).collect::<Vec<_>>());
    }

    #[test]
    fn resyncs_after_corrupt_payload() {
        let mut bad = joy_frame(99);
        bad[HEADER_LEN + 2] ^= 0xFF;
        assert_recovers(bad);
    }

    #[test]
    fn resyncs_after_corrupt_header() {
        let mut bad = joy_frame(99);
        bad[3] ^= 0x40;
        assert_recovers(bad);
    }

    #[test]
    fn resyncs_after_corrupt_start_marker() {
        let mut bad = joy_frame(99);
        bad[0] = 0x55;
        assert_recovers(bad);
    }

    #[test]
    fn resyncs_after_truncated_frame() {
        let bad = joy_frame(99);
        assert_recovers(bad[..bad.len() / 2].to_vec());
    }

    #[test]
    fn truncated_long_frame_does_not_hold_back_later_frames() {
        let status = Status {
            status_message: "x".repeat(800),
            ..Default::default()
        };
        let mut enc = FrameEncoder::new(DEFAULT_MAX_PAYLOAD);
        let long = enc.encode(&status).unwrap().to_vec();

        let mut stream = long[..long.len() / 4].to_vec();
        stream.extend(joy_frame(1));
        stream.extend(joy_frame(2));

        let mut dec = FrameDecoder::new(2048, DEFAULT_MAX_PAYLOAD);
        dec.push(&stream).unwrap();
        let (frames, faults) = drain(&mut dec);

        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.tag == MessageKind::Joy.tag()));
        assert_eq!(
            faults,
            vec![DecodeFault::Truncated {
                tag: MessageKind::Status.tag(),
                len: long.len() - HEADER_LEN - TRAILER_LEN,
            }]
        );
        assert_eq!(dec.buffered(), 0);
    }

    #[test]
    fn long_frame_in_progress_keeps_waiting() {
        let status = Status {
            status_message: "y".repeat(800),
            ..Default::default()
        };
        let mut enc = FrameEncoder::new(DEFAULT_MAX_PAYLOAD);
        let long = enc.encode(&status).unwrap().to_vec();
        let (head, tail) = long.split_at(300);

        let mut dec = FrameDecoder::new(2048, DEFAULT_MAX_PAYLOAD);
        dec.push(head).unwrap();
        assert!(dec.next_frame().is_none());
        dec.push(tail).unwrap();

        let frame = dec.next_frame().unwrap().unwrap();
        assert_eq!(decode_payload::<Status>(&frame.payload).unwrap(), status);
        assert_eq!(dec.faults(), 0);
    }

    #[test]
    fn oversized_length_is_a_fault() {
        let mut frame = Vec::new();
        write_frame(MessageKind::Status.tag(), &[0u8; 64], &mut frame).unwrap();
        let mut dec = FrameDecoder::new(1024, 32);
        dec.push(&frame).unwrap();
        let (frames, faults) = drain(&mut dec);
        assert!(frames.is_empty());
        assert_eq!(faults, vec![DecodeFault::Oversized { len: 64 }]);
    }

    #[test]
    fn push_beyond_capacity_is_rejected() {
        let mut dec = FrameDecoder::new(0, 16);
        let cap = dec.spare_capacity();
        assert_eq!(cap, HEADER_LEN + 16 + TRAILER_LEN);
        let err = dec.push(&vec![0u8; cap + 1]).unwrap_err();
        assert_eq!(err, SynapseError::CapacityExceeded { needed: cap + 1, capacity: cap });
        assert_eq!(dec.buffered(), 0);
    }

    #[test]
    fn encoder_rejects_payload_over_limit() {
        let status = Status {
            status_message: "x".repeat(200),
            ..Default::default()
        };
        let mut enc = FrameEncoder::new(64);
        assert!(matches!(
            enc.encode(&status),
            Err(SynapseError::CapacityExceeded { capacity: 64, .. })
        ));
        // The encoder stays usable after a rejected message.
        assert!(enc.encode(&Uptime::default()).is_ok());
    }

    #[test]
    fn decode_payload_reports_wrong_type() {
        let err = decode_payload::<Status>(&[0xFF]).unwrap_err();
        assert!(matches!(err, SynapseError::Decode(_)));
    }

    #[test]
    fn reset_clears_buffer_and_faults() {
        let mut dec = FrameDecoder::new(DEFAULT_RX_CAPACITY, DEFAULT_MAX_PAYLOAD);
        dec.push(&[0x42, 0x43]).unwrap();
        let _ = drain(&mut dec);
        assert_eq!(dec.faults(), 1);
        dec.push(&[SOF]).unwrap();
        dec.reset();
        assert_eq!(dec.faults(), 0);
        assert_eq!(dec.buffered(), 0);
    }
}
