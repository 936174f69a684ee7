//! Marelli 1AF decoder
//!
//! Every reply block is a self-describing frame starting at reply byte 8:
//! a byte count, the echoed block title, the data and a checksum. The ID
//! block uses the 8-bit checksum, everything else the 16-bit one.

use super::{EcuContext, EcuProtocol, EcuRequest, Outcome};
use crate::checksum::{add_16bit_checksum, add_8bit_checksum};
use crate::error::DispatchError;
use crate::packet::{status, Reply, REPLY_DATA_OFFSET};
use crate::registry::ProtocolType;

pub mod title {
    pub const ACTUATOR_START: u8 = 0x20;
    pub const ACTUATOR_STOP: u8 = 0x21;
    pub const READ_MEMORY: u8 = 0x30;
    pub const READ_VALUE: u8 = 0x31;
    pub const READ_SNAPSHOT: u8 = 0x32;
    pub const ID_INFO: u8 = 0x51;
}

/// Identification string following the title in the ID block.
pub const ECU_ID: [u8; 15] = *b"IAW1AF.16 V2.03";

pub struct Marelli1Af;

enum Width {
    Eight,
    Sixteen,
}

/// Place `body` in a self-describing frame at reply byte 8 and set the
/// reply length to cover it.
fn put_frame(reply: &mut Reply, body: &[u8], width: Width) -> Result<(), DispatchError> {
    let checksum_len = match width {
        Width::Eight => 1,
        Width::Sixteen => 2,
    };
    let count = body.len() + checksum_len;
    reply.set_length(REPLY_DATA_OFFSET + count)?;

    let mut frame = Vec::with_capacity(count + 1);
    frame.push(count as u8);
    frame.extend_from_slice(body);
    frame.resize(count + 1, 0);
    match width {
        Width::Eight => {
            add_8bit_checksum(&mut frame)?;
        }
        Width::Sixteen => {
            add_16bit_checksum(&mut frame)?;
        }
    }

    reply.set_status(status::OK);
    reply.put_slice(REPLY_DATA_OFFSET, &frame)?;
    Ok(())
}

impl EcuProtocol for Marelli1Af {
    fn protocol(&self) -> ProtocolType {
        ProtocolType::Marelli1Af
    }

    fn handle(
        &self,
        request: &EcuRequest<'_>,
        ctx: &mut EcuContext<'_>,
        reply: &mut Reply,
    ) -> Result<Outcome, DispatchError> {
        let block = request.title;
        match block {
            title::ID_INFO => {
                ctx.note("Marelli 1AF: request for ID info");
                let mut body = vec![block];
                body.extend_from_slice(&ECU_ID);
                put_frame(reply, &body, Width::Eight)?;
            }
            title::ACTUATOR_START | title::ACTUATOR_STOP => {
                let actuator = request.operand(0)?;
                let action = if block == title::ACTUATOR_START {
                    "start"
                } else {
                    "stop"
                };
                ctx.note(format!("Marelli 1AF: {action} actuator 0x{actuator:02X}"));
                put_frame(reply, &[block, actuator, 0x00], Width::Sixteen)?;
            }
            title::READ_MEMORY => {
                let addr = request.operand_u16(0)?;
                let count = request.operand(2)? as usize;
                ctx.note(format!(
                    "Marelli 1AF: read {count} byte(s) of memory at 0x{addr:04X}"
                ));
                // title + data + 16-bit checksum; refuse before touching memory
                reply.set_length(REPLY_DATA_OFFSET + count + 3)?;
                let mut body = vec![block];
                body.extend(ctx.memory.read_ram_range(addr, count));
                put_frame(reply, &body, Width::Sixteen)?;
            }
            title::READ_VALUE => {
                let code = request.operand(0)?;
                let value = if ctx.compat.alias_value_reads_to_ram {
                    ctx.memory.read_ram(code as u16) as u32
                } else {
                    ctx.memory.read_value(code)
                };
                ctx.note(format!(
                    "Marelli 1AF: read value 0x{code:02X} = 0x{value:08X}"
                ));
                let mut body = vec![block, code];
                body.extend_from_slice(&value.to_be_bytes());
                body.push(0x00);
                put_frame(reply, &body, Width::Sixteen)?;
            }
            title::READ_SNAPSHOT => {
                let index = request.operand(0)?;
                ctx.note(format!("Marelli 1AF: read snapshot {index}"));
                let mut body = vec![block];
                body.extend_from_slice(ctx.memory.snapshot(index));
                put_frame(reply, &body, Width::Sixteen)?;
            }
            other => {
                reply.success();
                return Ok(Outcome::UnknownTitle(other));
            }
        }
        Ok(Outcome::Replied)
    }
}
