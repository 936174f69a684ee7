//! Bosch alarm / immobilizer decoder
//!
//! Both known requests read back one stored byte. Anything else is left
//! alone, and the session decides whether the echoed request goes back.

use super::{EcuContext, EcuProtocol, EcuRequest, Outcome};
use crate::error::DispatchError;
use crate::packet::{status, Reply, REPLY_DATA_OFFSET};
use crate::registry::ProtocolType;

pub mod title {
    /// Read with a 16-bit sub-address.
    pub const READ_WIDE: u8 = 0x52;
    /// Read with an 8-bit sub-address.
    pub const READ_SHORT: u8 = 0x44;
}

pub struct BoschAlarm;

impl EcuProtocol for BoschAlarm {
    fn protocol(&self) -> ProtocolType {
        ProtocolType::BoschAlarm
    }

    fn handle(
        &self,
        request: &EcuRequest<'_>,
        ctx: &mut EcuContext<'_>,
        reply: &mut Reply,
    ) -> Result<Outcome, DispatchError> {
        let addr = match request.title {
            title::READ_WIDE => request.operand_u16(0)?,
            title::READ_SHORT => request.operand(0)? as u16,
            other => return Ok(Outcome::Unhandled(other)),
        };

        let value = ctx.memory.read_ram(addr);
        ctx.note(format!("Bosch alarm: read 0x{addr:04X} = 0x{value:02X}"));
        reply.set_length(REPLY_DATA_OFFSET)?;
        reply.set_status(status::OK);
        reply.put(REPLY_DATA_OFFSET, value)?;
        Ok(Outcome::Replied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompatConfig;
    use crate::memory::EcuMemory;
    use crate::protocol::test_util::run;
    use pretty_assertions::assert_eq;

    #[test]
    fn wide_and_short_reads() {
        let mut memory = EcuMemory::new();
        memory.poke_ram(0x0123, 0x77);
        memory.poke_ram(0x0045, 0x88);
        let compat = CompatConfig::default();

        let (outcome, reply) = run(&BoschAlarm, &mut memory, &compat, &[0x52, 0x01, 0x23]);
        assert_eq!(outcome, Outcome::Replied);
        assert_eq!(reply.wire_bytes(), &[0x54, 0x00, 0x08, 0, 0, 0, 0x13, 0x01, 0x77]);

        let (_, reply) = run(&BoschAlarm, &mut memory, &compat, &[0x44, 0x45]);
        assert_eq!(reply.byte(8), 0x88);
    }

    #[test]
    fn first_read_creates_location() {
        let mut memory = EcuMemory::new();
        let (_, reply) = run(&BoschAlarm, &mut memory, &CompatConfig::default(), &[0x44, 0x10]);
        assert_eq!(reply.byte(8), 0x00);
        assert_eq!(memory.peek_ram(0x0010), Some(0));
    }

    #[test]
    fn unknown_leading_byte_leaves_echo() {
        let mut memory = EcuMemory::new();
        let (outcome, reply) = run(
            &BoschAlarm,
            &mut memory,
            &CompatConfig::default(),
            &[0x99, 0x01],
        );
        assert_eq!(outcome, Outcome::Unhandled(0x99));
        assert_eq!(
            reply.wire_bytes(),
            &[0x54, 0x00, 0x08, 0, 0, 0, 0x13, 0x99, 0x01]
        );
    }
}
