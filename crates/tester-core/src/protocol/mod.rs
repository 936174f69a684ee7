//! ECU protocol decoders
//!
//! A "command to ECU" packet carries one block of the selected ECU's wire
//! protocol. The PC sends that block in one of two shapes:
//!
//! ```text
//! terse:    .. 13 | title operands...
//! verbose:  .. 13 | 00 len [counter] title operands... [terminator]
//! ```
//!
//! [`EcuRequest::parse`] resolves the shape once, so each decoder only sees
//! the block title and the operand bytes that follow it.

use crate::config::CompatConfig;
use crate::error::DispatchError;
use crate::memory::EcuMemory;
use crate::packet::{status, Packet, PacketError, Reply, PAYLOAD_OFFSET, REPLY_DATA_OFFSET};
use crate::registry::ProtocolType;

pub mod bosch;
pub mod fiat9141;
pub mod kwp71;
pub mod marelli;

/// Packets with a length field above this carry more than a terse block.
const TERSE_MAX_LENGTH: u8 = 8;

/// Title offset inside a verbose block for protocols without a block counter.
pub const DEFAULT_VERBOSE_TITLE_OFFSET: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadForm {
    /// Block title right after the opcode.
    Terse,
    /// Full protocol block behind a zero placeholder byte.
    Verbose,
}

/// A command-to-ECU payload with its offsets resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcuRequest<'a> {
    pub form: PayloadForm,
    pub title: u8,
    operands: &'a [u8],
    operand_offset: usize,
}

impl<'a> EcuRequest<'a> {
    /// Resolve the payload shape. `verbose_title_offset` is where the title
    /// sits inside a verbose block for the protocol being decoded.
    pub fn parse(packet: &'a Packet, verbose_title_offset: usize) -> Result<Self, PacketError> {
        let long = packet.length_hi() != 0 || packet.length_field() > TERSE_MAX_LENGTH;
        let form = if long && packet.payload_byte(0)? == 0 {
            PayloadForm::Verbose
        } else {
            PayloadForm::Terse
        };

        let title_index = match form {
            PayloadForm::Terse => 0,
            PayloadForm::Verbose => verbose_title_offset,
        };
        let title = packet.payload_byte(title_index)?;

        Ok(Self {
            form,
            title,
            operands: &packet.payload()[title_index + 1..],
            operand_offset: PAYLOAD_OFFSET + title_index + 1,
        })
    }

    pub fn operands(&self) -> &'a [u8] {
        self.operands
    }

    pub fn operand(&self, index: usize) -> Result<u8, PacketError> {
        self.operands
            .get(index)
            .copied()
            .ok_or(PacketError::OutOfBounds {
                offset: self.operand_offset + index,
                width: 1,
                len: self.operand_offset + self.operands.len(),
            })
    }

    /// Big-endian 16-bit operand starting at `index`.
    pub fn operand_u16(&self, index: usize) -> Result<u16, PacketError> {
        Ok(u16::from_be_bytes([self.operand(index)?, self.operand(index + 1)?]))
    }
}

/// What a decoder did with a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Reply filled in.
    Replied,
    /// Block title not recognized; answered with a generic success.
    UnknownTitle(u8),
    /// Nothing produced; the reply still echoes the request.
    Unhandled(u8),
}

/// Storage and switches a decoder works against, plus narration it leaves
/// for the session to log.
pub struct EcuContext<'a> {
    pub memory: &'a mut EcuMemory,
    pub compat: &'a CompatConfig,
    notes: Vec<String>,
}

impl<'a> EcuContext<'a> {
    pub fn new(memory: &'a mut EcuMemory, compat: &'a CompatConfig) -> Self {
        Self {
            memory,
            compat,
            notes: Vec::new(),
        }
    }

    pub fn note(&mut self, text: impl Into<String>) {
        self.notes.push(text.into());
    }

    pub fn into_notes(self) -> Vec<String> {
        self.notes
    }
}

pub trait EcuProtocol: Send + Sync {
    fn protocol(&self) -> ProtocolType;

    /// Title offset inside a verbose block.
    fn verbose_title_offset(&self) -> usize {
        DEFAULT_VERBOSE_TITLE_OFFSET
    }

    fn handle(
        &self,
        request: &EcuRequest<'_>,
        ctx: &mut EcuContext<'_>,
        reply: &mut Reply,
    ) -> Result<Outcome, DispatchError>;
}

/// Decoder for a protocol, if one exists.
pub fn decoder_for(protocol: ProtocolType) -> Option<&'static dyn EcuProtocol> {
    match protocol {
        ProtocolType::Kwp71 => Some(&kwp71::Kwp71),
        ProtocolType::Fiat9141 => Some(&fiat9141::Fiat9141),
        ProtocolType::Marelli1Af => Some(&marelli::Marelli1Af),
        ProtocolType::BoschAlarm => Some(&bosch::BoschAlarm),
        ProtocolType::BilsteinSuspension => None,
    }
}

// =============================================================================
// Blocks shared by KWP71 and FIAT9141
// =============================================================================

/// ECU identification block: length, response type, part number, terminator.
pub const ID_BLOCK: [u8; 9] = [0x08, 0xF6, b'1', b'1', b'2', b'3', b'5', b'8', 0x03];

/// Response type of a RAM read block.
pub const RAM_READ_RESPONSE: u8 = 0xFD;
/// Last byte of every KWP71-style block.
pub const BLOCK_TERMINATOR: u8 = 0x03;

pub(crate) fn put_id_block(reply: &mut Reply) -> Result<(), DispatchError> {
    reply.set_length(REPLY_DATA_OFFSET + ID_BLOCK.len() - 1)?;
    reply.set_status(status::OK);
    reply.put_slice(REPLY_DATA_OFFSET, &ID_BLOCK)?;
    Ok(())
}

/// `count+2, FD, data..., 03` with every address created on first read.
pub(crate) fn put_ram_block(
    reply: &mut Reply,
    memory: &mut EcuMemory,
    addr: u16,
    count: u8,
) -> Result<(), DispatchError> {
    let count = count as usize;
    // Size check first so a rejected read leaves memory untouched
    reply.set_length(REPLY_DATA_OFFSET + count + 2)?;

    let data = memory.read_ram_range(addr, count);
    reply.set_status(status::OK);
    reply.put(REPLY_DATA_OFFSET, (count + 2) as u8)?;
    reply.put(REPLY_DATA_OFFSET + 1, RAM_READ_RESPONSE)?;
    reply.put_slice(REPLY_DATA_OFFSET + 2, &data)?;
    reply.put(REPLY_DATA_OFFSET + 2 + count, BLOCK_TERMINATOR)?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    fn packet(payload: &[u8]) -> Packet {
        Packet::request(0x55, 0, 0x13, payload).unwrap()
    }

    #[test]
    fn short_payload_is_terse() {
        let p = packet(&[0x00]);
        let req = EcuRequest::parse(&p, 3).unwrap();
        assert_eq!(req.form, PayloadForm::Terse);
        assert_eq!(req.title, 0x00);
        assert!(req.operands().is_empty());
    }

    #[test]
    fn terse_title_with_operands() {
        let p = packet(&[0x01, 0x02, 0x12, 0x34]);
        let req = EcuRequest::parse(&p, 3).unwrap();
        assert_eq!(req.form, PayloadForm::Terse);
        assert_eq!(req.title, 0x01);
        assert_eq!(req.operand(0).unwrap(), 0x02);
        assert_eq!(req.operand_u16(1).unwrap(), 0x1234);
    }

    #[test]
    fn placeholder_marks_verbose_block() {
        // 00 | len counter title | count hi lo | terminator
        let p = packet(&[0x00, 0x06, 0x05, 0x01, 0x02, 0x12, 0x34, 0x03]);
        let req = EcuRequest::parse(&p, 3).unwrap();
        assert_eq!(req.form, PayloadForm::Verbose);
        assert_eq!(req.title, 0x01);
        assert_eq!(req.operand(0).unwrap(), 0x02);

        let req = EcuRequest::parse(&p, 2).unwrap();
        assert_eq!(req.title, 0x05);
    }

    #[test]
    fn missing_operand_is_an_error() {
        let p = packet(&[0x01, 0x02]);
        let req = EcuRequest::parse(&p, 2).unwrap();
        assert_eq!(
            req.operand_u16(1),
            Err(PacketError::OutOfBounds {
                offset: 9,
                width: 1,
                len: 9
            })
        );
    }

    #[test]
    fn every_protocol_but_bilstein_has_a_decoder() {
        for protocol in [
            ProtocolType::Kwp71,
            ProtocolType::Fiat9141,
            ProtocolType::Marelli1Af,
            ProtocolType::BoschAlarm,
        ] {
            assert_eq!(decoder_for(protocol).map(|d| d.protocol()), Some(protocol));
        }
        assert!(decoder_for(ProtocolType::BilsteinSuspension).is_none());
    }
}
