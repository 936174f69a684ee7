//! Link packet model
//!
//! # Wire format
//!
//! ```text
//! ┌──────────┬──────────────┬───────────┬─────────┬────────┬──────────────┐
//! │ prefix   │ length (BE)  │ reserved  │ channel │ opcode │ payload ...  │
//! │ 1 byte   │ 2 bytes      │ 2 bytes   │ 1 byte  │ 1 byte │ length - 6   │
//! └──────────┴──────────────┴───────────┴─────────┴────────┴──────────────┘
//!   offset 0   offset 1..=2   offset 3..=4 offset 5  offset 6  offset 7
//! ```
//!
//! The length counts every byte after the prefix. Neither side ever sends
//! more than 128 bytes in total, so the high length byte is always zero and
//! the low byte alone decides the frame size. The PC picks the request prefix
//! depending on its operating mode; replies always carry [`REPLY_PREFIX`].

use thiserror::Error;

/// Prefix marking a reply from a Tester in linked-to-PC mode.
pub const REPLY_PREFIX: u8 = 0x54;

/// Bytes read before the frame size is known.
pub const HEADER_LEN: usize = 3;
/// Smallest frame that still carries an opcode.
pub const MIN_PACKET_LEN: usize = 7;
/// Largest frame either side will produce.
pub const MAX_PACKET_LEN: usize = 128;

pub const PREFIX_OFFSET: usize = 0;
pub const LENGTH_HI_OFFSET: usize = 1;
pub const LENGTH_LO_OFFSET: usize = 2;
pub const CHANNEL_OFFSET: usize = 5;
pub const OPCODE_OFFSET: usize = 6;
/// First payload byte of a request.
pub const PAYLOAD_OFFSET: usize = 7;
/// Status byte of a reply (overlaps the first request payload byte).
pub const STATUS_OFFSET: usize = 7;
/// First data byte of a reply after the status byte.
pub const REPLY_DATA_OFFSET: usize = 8;

/// Length field of a reply that only carries a status byte.
pub const STATUS_ONLY_LEN: u8 = 7;

/// Reply status bytes
pub mod status {
    pub const OK: u8 = 0x01;
    pub const END_OF_DIRECTORY: u8 = 0x04;
    pub const NOT_RUNNING: u8 = 0xFE;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Packet too short: {len} bytes (minimum {MIN_PACKET_LEN})")]
    TooShort { len: usize },

    #[error("Packet too long: {len} bytes (maximum {MAX_PACKET_LEN})")]
    TooLong { len: usize },

    #[error("Length field says {declared} bytes follow the prefix, got {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Offset {offset} (+{width}) outside packet of {len} bytes")]
    OutOfBounds {
        offset: usize,
        width: usize,
        len: usize,
    },
}

/// Total frame size announced by a 3-byte header.
pub fn frame_size(header: &[u8; HEADER_LEN]) -> usize {
    header[LENGTH_LO_OFFSET] as usize + 1
}

/// A validated request packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    bytes: Vec<u8>,
}

impl Packet {
    /// Validate a complete frame as received from the link.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, PacketError> {
        let len = bytes.len();
        if len < MIN_PACKET_LEN {
            return Err(PacketError::TooShort { len });
        }
        if len > MAX_PACKET_LEN {
            return Err(PacketError::TooLong { len });
        }
        let declared = bytes[LENGTH_LO_OFFSET] as usize;
        if declared + 1 != len {
            return Err(PacketError::LengthMismatch {
                declared,
                actual: len - 1,
            });
        }
        Ok(Self { bytes })
    }

    /// Build a request frame around an opcode and payload.
    pub fn request(prefix: u8, channel: u8, opcode: u8, payload: &[u8]) -> Result<Self, PacketError> {
        let mut bytes = vec![prefix, 0, 0, 0, 0, channel, opcode];
        bytes.extend_from_slice(payload);
        let len = bytes.len();
        if len > MAX_PACKET_LEN {
            return Err(PacketError::TooLong { len });
        }
        bytes[LENGTH_LO_OFFSET] = (len - 1) as u8;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn prefix(&self) -> u8 {
        self.bytes[PREFIX_OFFSET]
    }

    pub fn length_hi(&self) -> u8 {
        self.bytes[LENGTH_HI_OFFSET]
    }

    /// The low length byte, i.e. the number of bytes after the prefix.
    pub fn length_field(&self) -> u8 {
        self.bytes[LENGTH_LO_OFFSET]
    }

    pub fn channel(&self) -> u8 {
        self.bytes[CHANNEL_OFFSET]
    }

    pub fn opcode(&self) -> u8 {
        self.bytes[OPCODE_OFFSET]
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[PAYLOAD_OFFSET..]
    }

    pub fn byte(&self, offset: usize) -> Result<u8, PacketError> {
        self.bytes
            .get(offset)
            .copied()
            .ok_or(PacketError::OutOfBounds {
                offset,
                width: 1,
                len: self.bytes.len(),
            })
    }

    pub fn slice(&self, offset: usize, width: usize) -> Result<&[u8], PacketError> {
        self.bytes
            .get(offset..offset + width)
            .ok_or(PacketError::OutOfBounds {
                offset,
                width,
                len: self.bytes.len(),
            })
    }

    pub fn u16_be(&self, offset: usize) -> Result<u16, PacketError> {
        let b = self.slice(offset, 2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Payload byte `index`, bounds-checked.
    pub fn payload_byte(&self, index: usize) -> Result<u8, PacketError> {
        self.byte(PAYLOAD_OFFSET + index)
    }
}

/// Reply buffer seeded from a request.
///
/// The Tester firmware starts every reply by copying the request, so any
/// byte a handler leaves alone goes back to the PC unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    buf: [u8; MAX_PACKET_LEN],
}

impl Reply {
    pub fn for_request(request: &Packet) -> Self {
        let mut buf = [0u8; MAX_PACKET_LEN];
        buf[..request.len()].copy_from_slice(request.as_bytes());
        buf[PREFIX_OFFSET] = REPLY_PREFIX;
        buf[LENGTH_HI_OFFSET] = 0;
        Self { buf }
    }

    pub fn length_field(&self) -> u8 {
        self.buf[LENGTH_LO_OFFSET]
    }

    /// Set the length field. The resulting frame must fit the buffer.
    pub fn set_length(&mut self, len: usize) -> Result<(), PacketError> {
        if len >= MAX_PACKET_LEN {
            return Err(PacketError::TooLong { len: len + 1 });
        }
        self.buf[LENGTH_LO_OFFSET] = len as u8;
        Ok(())
    }

    pub fn status(&self) -> u8 {
        self.buf[STATUS_OFFSET]
    }

    pub fn set_status(&mut self, status: u8) {
        self.buf[STATUS_OFFSET] = status;
    }

    pub fn set_channel(&mut self, channel: u8) {
        self.buf[CHANNEL_OFFSET] = channel;
    }

    /// Status-only success reply: length 7, status [`status::OK`].
    pub fn success(&mut self) {
        self.buf[LENGTH_LO_OFFSET] = STATUS_ONLY_LEN;
        self.buf[STATUS_OFFSET] = status::OK;
    }

    pub fn put(&mut self, offset: usize, value: u8) -> Result<(), PacketError> {
        let slot = self.buf.get_mut(offset).ok_or(PacketError::OutOfBounds {
            offset,
            width: 1,
            len: MAX_PACKET_LEN,
        })?;
        *slot = value;
        Ok(())
    }

    pub fn put_slice(&mut self, offset: usize, data: &[u8]) -> Result<(), PacketError> {
        self.slice_mut(offset, data.len())?.copy_from_slice(data);
        Ok(())
    }

    pub fn slice_mut(&mut self, offset: usize, width: usize) -> Result<&mut [u8], PacketError> {
        self.buf
            .get_mut(offset..offset + width)
            .ok_or(PacketError::OutOfBounds {
                offset,
                width,
                len: MAX_PACKET_LEN,
            })
    }

    pub fn byte(&self, offset: usize) -> u8 {
        self.buf.get(offset).copied().unwrap_or(0)
    }

    /// The bytes that go on the wire: `length field + 1`, or nothing when the
    /// length field is zero.
    pub fn wire_bytes(&self) -> &[u8] {
        match self.length_field() {
            0 => &[],
            len => &self.buf[..len as usize + 1],
        }
    }
}

/// Render bytes as space separated upper-case hex pairs.
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
