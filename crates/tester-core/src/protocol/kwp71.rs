//! KWP71 decoder
//!
//! Verbose KWP71 blocks carry a block counter before the title:
//! `00 len counter title operands... 03`.

use super::{put_id_block, put_ram_block, EcuContext, EcuProtocol, EcuRequest, Outcome};
use crate::error::DispatchError;
use crate::packet::{status, Reply, MAX_PACKET_LEN, REPLY_DATA_OFFSET};
use crate::registry::ProtocolType;

/// Block titles
pub mod title {
    pub const REQUEST_ID: u8 = 0x00;
    pub const READ_RAM: u8 = 0x01;
    pub const READ_ERROR_MEMORY: u8 = 0x07;
}

/// Most error memory bytes one reply frame can carry.
const MAX_ERROR_MEMORY_REPLY: usize = MAX_PACKET_LEN - REPLY_DATA_OFFSET;

pub struct Kwp71;

impl EcuProtocol for Kwp71 {
    fn protocol(&self) -> ProtocolType {
        ProtocolType::Kwp71
    }

    fn verbose_title_offset(&self) -> usize {
        3
    }

    fn handle(
        &self,
        request: &EcuRequest<'_>,
        ctx: &mut EcuContext<'_>,
        reply: &mut Reply,
    ) -> Result<Outcome, DispatchError> {
        match request.title {
            title::REQUEST_ID => {
                ctx.note("KWP71: request for ECU ID");
                put_id_block(reply)?;
            }
            title::READ_RAM => {
                let count = request.operand(0)?;
                let addr = request.operand_u16(1)?;
                ctx.note(format!("KWP71: read {count} byte(s) of RAM at 0x{addr:04X}"));
                put_ram_block(reply, ctx.memory, addr, count)?;
            }
            title::READ_ERROR_MEMORY => {
                let stored = ctx.memory.error_memory();
                let stored_len = stored.len();
                let block = stored[..stored_len.min(MAX_ERROR_MEMORY_REPLY)].to_vec();
                if block.len() < stored_len {
                    ctx.note(format!(
                        "KWP71: read trouble codes (cut to {} of {stored_len} bytes)",
                        block.len()
                    ));
                } else {
                    ctx.note("KWP71: read trouble codes");
                }
                reply.set_length(REPLY_DATA_OFFSET + block.len() - 1)?;
                reply.set_status(status::OK);
                reply.put_slice(REPLY_DATA_OFFSET, &block)?;
            }
            other => {
                reply.success();
                return Ok(Outcome::UnknownTitle(other));
            }
        }
        Ok(Outcome::Replied)
    }
}
