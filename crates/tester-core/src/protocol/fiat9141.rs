//! FIAT 9141 decoder
//!
//! Same ID and RAM read replies as KWP71, but the RAM read operands come in
//! the order address high, address low, count.

use super::{put_id_block, put_ram_block, EcuContext, EcuProtocol, EcuRequest, Outcome};
use crate::error::DispatchError;
use crate::packet::Reply;
use crate::registry::ProtocolType;

pub mod title {
    pub const REQUEST_ID: u8 = 0x00;
    pub const READ_RAM: u8 = 0x01;
}

pub struct Fiat9141;

impl EcuProtocol for Fiat9141 {
    fn protocol(&self) -> ProtocolType {
        ProtocolType::Fiat9141
    }

    fn handle(
        &self,
        request: &EcuRequest<'_>,
        ctx: &mut EcuContext<'_>,
        reply: &mut Reply,
    ) -> Result<Outcome, DispatchError> {
        match request.title {
            title::REQUEST_ID => {
                ctx.note("FIAT9141: request for ECU ID");
                put_id_block(reply)?;
            }
            title::READ_RAM => {
                let addr = request.operand_u16(0)?;
                let count = request.operand(2)?;
                ctx.note(format!("FIAT9141: read {count} byte(s) of RAM at 0x{addr:04X}"));
                put_ram_block(reply, ctx.memory, addr, count)?;
            }
            other => {
                reply.success();
                return Ok(Outcome::UnknownTitle(other));
            }
        }
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
    fn ram_read_operand_order() {
        let mut memory = EcuMemory::new();
        memory.poke_ram(0x2000, 0x11);
        memory.poke_ram(0x2001, 0x22);
        let (outcome, reply) = run(
            &Fiat9141,
            &mut memory,
            &CompatConfig::default(),
            &[0x01, 0x20, 0x00, 0x02],
        );
        assert_eq!(outcome, Outcome::Replied);
        assert_eq!(&reply.wire_bytes()[7..], &[0x01, 0x04, 0xFD, 0x11, 0x22, 0x03]);
    }

    #[test]
    fn verbose_title_has_no_counter() {
        let mut memory = EcuMemory::new();
        let (_, reply) = run(
            &Fiat9141,
            &mut memory,
            &CompatConfig::default(),
            &[0x00, 0x05, 0x01, 0x00, 0x40, 0x01, 0x03],
        );
        assert_eq!(&reply.wire_bytes()[7..], &[0x01, 0x03, 0xFD, 0x00, 0x03]);
        assert_eq!(memory.peek_ram(0x0040), Some(0));
    }

    #[test]
    fn id_and_unknown_titles() {
        let mut memory = EcuMemory::new();
        let compat = CompatConfig::default();
        let (_, reply) = run(&Fiat9141, &mut memory, &compat, &[0x00]);
        assert_eq!(reply.length_field(), 16);
        assert_eq!(reply.byte(9), 0xF6);

        let (outcome, reply) = run(&Fiat9141, &mut memory, &compat, &[0x09]);
        assert_eq!(outcome, Outcome::UnknownTitle(0x09));
        assert_eq!(reply.length_field(), 7);
        assert_eq!(reply.status(), 1);
    }
}
