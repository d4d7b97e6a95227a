//! Wire codecs for the host/peer link.
//!
//! Three layers are encoded here:
//! * the packed 12-byte payload header that prefixes every bus frame,
//! * the private-channel event envelope `{event_type, event_len, data}`,
//! * the tag-length-value records carried inside an INIT event.
//!
//! All multi-byte header fields are little-endian.

use smallvec::SmallVec;
use thiserror::Error;
use transport::schema::*;

pub type CodecResult<T> = Result<T, CodecError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("buffer of {available} bytes is shorter than the {needed} required")]
    Truncated { needed: usize, available: usize },

    #[error("payload at offset {offset} with length {len} overruns a {buffer}-byte frame")]
    LengthOutOfRange {
        offset: usize,
        len: usize,
        buffer: usize,
    },

    #[error("checksum mismatch: header says {expected:#06x}, computed {computed:#06x}")]
    ChecksumMismatch { expected: u16, computed: u16 },

    #[error("unknown interface type {0}")]
    UnknownInterface(u8),

    #[error("tlv {tag:#04x} declares {len} bytes but only {remaining} remain")]
    TlvOverflow { tag: u8, len: usize, remaining: usize },

    #[error("tlv {tag:#04x} value of {len} bytes does not fit a one-byte length")]
    ValueTooLong { tag: u8, len: usize },
}

/// Wrapping 16-bit byte sum used by the peer firmware.
pub fn compute_checksum(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)))
}

/// Decoded form of the packed payload header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PayloadHeader {
    pub if_type: IfType,
    pub if_num: u8,
    pub flags: u8,
    pub len: u16,
    pub offset: u16,
    pub checksum: u16,
    pub seq_num: u16,
    pub throttle: ThrottleCmd,
    /// Packet type byte: private packet type on PRIV, HCI packet type on HCI.
    pub pkt_type: u8,
}

impl PayloadHeader {
    /// Header for a payload placed directly behind the header.
    pub fn new(if_type: IfType, if_num: u8, len: u16) -> Self {
        Self {
            if_type,
            if_num,
            flags: 0,
            len,
            offset: PAYLOAD_HEADER_LEN as u16,
            checksum: 0,
            seq_num: 0,
            throttle: ThrottleCmd::NoChange,
            pkt_type: 0,
        }
    }

    pub fn encode(&self) -> [u8; PAYLOAD_HEADER_LEN] {
        let mut out = [0u8; PAYLOAD_HEADER_LEN];
        out[0] = (self.if_type.as_u8() & 0x0F) | ((self.if_num & 0x0F) << 4);
        out[1] = self.flags;
        out[2..4].copy_from_slice(&self.len.to_le_bytes());
        out[4..6].copy_from_slice(&self.offset.to_le_bytes());
        out[6..8].copy_from_slice(&self.checksum.to_le_bytes());
        out[8..10].copy_from_slice(&self.seq_num.to_le_bytes());
        out[10] = self.throttle.bits();
        out[11] = self.pkt_type;
        out
    }

    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        if bytes.len() < PAYLOAD_HEADER_LEN {
            return Err(CodecError::Truncated {
                needed: PAYLOAD_HEADER_LEN,
                available: bytes.len(),
            });
        }
        let word = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
        Ok(Self {
            if_type: IfType::try_from(bytes[0] & 0x0F)
                .map_err(|_| CodecError::UnknownInterface(bytes[0] & 0x0F))?,
            if_num: bytes[0] >> 4,
            flags: bytes[1],
            len: word(2),
            offset: word(4),
            checksum: word(6),
            seq_num: word(8),
            throttle: ThrottleCmd::from_bits(bytes[10]),
            pkt_type: bytes[11],
        })
    }
}

/// Writes `header` into the front of `frame`, whose payload already sits at
/// `header.offset`. With `checksum` set, the checksum covers the header (with
/// a zeroed checksum field) and the payload.
pub fn write_header(frame: &mut [u8], header: &PayloadHeader, checksum: bool) -> CodecResult<()> {
    let end = header.offset as usize + header.len as usize;
    if (header.offset as usize) < PAYLOAD_HEADER_LEN || end > frame.len() {
        return Err(CodecError::LengthOutOfRange {
            offset: header.offset as usize,
            len: header.len as usize,
            buffer: frame.len(),
        });
    }

    let mut header = *header;
    header.checksum = 0;
    frame[..PAYLOAD_HEADER_LEN].copy_from_slice(&header.encode());
    if checksum {
        let sum = compute_checksum(&frame[..end]);
        frame[6..8].copy_from_slice(&sum.to_le_bytes());
    }
    Ok(())
}

/// Builds a standalone frame: header followed by `payload`.
pub fn encode_frame(header: &PayloadHeader, payload: &[u8], checksum: bool) -> CodecResult<Vec<u8>> {
    let len = u16::try_from(payload.len()).map_err(|_| CodecError::LengthOutOfRange {
        offset: PAYLOAD_HEADER_LEN,
        len: payload.len(),
        buffer: u16::MAX as usize,
    })?;
    let mut header = *header;
    header.len = len;
    header.offset = PAYLOAD_HEADER_LEN as u16;

    let mut frame = vec![0u8; PAYLOAD_HEADER_LEN + payload.len()];
    frame[PAYLOAD_HEADER_LEN..].copy_from_slice(payload);
    write_header(&mut frame, &header, checksum)?;
    Ok(frame)
}

/// Frame view produced by [`decode_frame`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecodedFrame<'a> {
    pub header: PayloadHeader,
    pub payload: &'a [u8],
}

/// Parses a frame read off the bus, validating bounds and optionally the
/// checksum.
pub fn decode_frame(frame: &[u8], verify_checksum: bool) -> CodecResult<DecodedFrame<'_>> {
    let header = PayloadHeader::decode(frame)?;
    let offset = header.offset as usize;
    let end = offset + header.len as usize;
    if offset < PAYLOAD_HEADER_LEN || end > frame.len() {
        return Err(CodecError::LengthOutOfRange {
            offset,
            len: header.len as usize,
            buffer: frame.len(),
        });
    }

    if verify_checksum {
        let mut zeroed = [0u8; PAYLOAD_HEADER_LEN];
        zeroed.copy_from_slice(&frame[..PAYLOAD_HEADER_LEN]);
        zeroed[6] = 0;
        zeroed[7] = 0;
        let computed = compute_checksum(&zeroed)
            .wrapping_add(compute_checksum(&frame[PAYLOAD_HEADER_LEN..end]));
        if computed != header.checksum {
            return Err(CodecError::ChecksumMismatch {
                expected: header.checksum,
                computed,
            });
        }
    }

    Ok(DecodedFrame {
        header,
        payload: &frame[offset..end],
    })
}

/// One tag-length-value record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tlv<'a> {
    pub tag: u8,
    pub value: &'a [u8],
}

impl Tlv<'_> {
    /// First value byte; every tag this link defines carries one byte.
    pub fn first_byte(&self) -> Option<u8> {
        self.value.first().copied()
    }
}

/// Iterator over a TLV stream. Yields an error once and then stops when a
/// record overruns the buffer.
#[derive(Clone, Debug)]
pub struct TlvReader<'a> {
    rest: &'a [u8],
    failed: bool,
}

impl<'a> TlvReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            rest: bytes,
            failed: false,
        }
    }

    /// Collects every record, failing on the first malformed one.
    pub fn collect_all(bytes: &'a [u8]) -> CodecResult<SmallVec<[Tlv<'a>; 8]>> {
        TlvReader::new(bytes).collect()
    }
}

impl<'a> Iterator for TlvReader<'a> {
    type Item = CodecResult<Tlv<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.rest.is_empty() {
            return None;
        }
        let tag = self.rest[0];
        let Some(&len) = self.rest.get(1) else {
            self.failed = true;
            return Some(Err(CodecError::TlvOverflow {
                tag,
                len: 1,
                remaining: 0,
            }));
        };
        let len = len as usize;
        let remaining = self.rest.len() - 2;
        if len > remaining {
            self.failed = true;
            return Some(Err(CodecError::TlvOverflow {
                tag,
                len,
                remaining,
            }));
        }
        let value = &self.rest[2..2 + len];
        self.rest = &self.rest[2 + len..];
        Some(Ok(Tlv { tag, value }))
    }
}

/// Appends TLV records into an inline buffer sized for the handshake.
#[derive(Clone, Debug, Default)]
pub struct TlvWriter {
    buf: SmallVec<[u8; MAX_INIT_EVENT_LEN]>,
}

impl TlvWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tag: u8, value: &[u8]) -> CodecResult<&mut Self> {
        let len = u8::try_from(value.len()).map_err(|_| CodecError::ValueTooLong {
            tag,
            len: value.len(),
        })?;
        self.buf.push(tag);
        self.buf.push(len);
        self.buf.extend_from_slice(value);
        Ok(self)
    }

    pub fn push_u8(&mut self, tag: u8, value: u8) -> &mut Self {
        self.buf.extend_from_slice(&[tag, 1, value]);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

/// Private-channel event envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PrivEvent<'a> {
    pub event_type: u8,
    pub data: &'a [u8],
}

impl<'a> PrivEvent<'a> {
    pub fn parse(bytes: &'a [u8]) -> CodecResult<Self> {
        if bytes.len() < 2 {
            return Err(CodecError::Truncated {
                needed: 2,
                available: bytes.len(),
            });
        }
        let event_len = bytes[1] as usize;
        let data = bytes.get(2..2 + event_len).ok_or(CodecError::Truncated {
            needed: 2 + event_len,
            available: bytes.len(),
        })?;
        Ok(Self {
            event_type: bytes[0],
            data,
        })
    }

    /// Serialises the envelope: the payload length is `data.len() + 2`.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        let len = u8::try_from(self.data.len()).map_err(|_| CodecError::ValueTooLong {
            tag: self.event_type,
            len: self.data.len(),
        })?;
        let mut out = Vec::with_capacity(self.data.len() + 2);
        out.push(self.event_type);
        out.push(len);
        out.extend_from_slice(self.data);
        Ok(out)
    }
}

/// Frame a peer emits after boot: an INIT event on the PRIV interface.
pub fn encode_init_event_frame(tlvs: &[u8], checksum: bool) -> CodecResult<Vec<u8>> {
    let event = PrivEvent {
        event_type: PRIV_EVENT_INIT,
        data: tlvs,
    }
    .encode()?;
    let mut header = PayloadHeader::new(IfType::Priv, 0, 0);
    header.pkt_type = PRIV_PACKET_TYPE_EVENT;
    encode_frame(&header, &event, checksum)
}
