//! Tester identity and housekeeping opcodes

use crate::error::DispatchError;
use crate::packet::{status, Packet, Reply, PAYLOAD_OFFSET, REPLY_DATA_OFFSET, STATUS_OFFSET};
use crate::session::Session;

/// Loader 3.1 (25.09.1998) and OS 5.5 (04.03.1999), BCD dates.
const FIRMWARE_VERSIONS: [u8; 12] = [
    0x03, 0x01, 0x25, 0x09, 0x19, 0x98, // system loader
    0x05, 0x05, 0x04, 0x03, 0x19, 0x99, // operating system
];
const TESTER_INFO_LEN: usize = 0x18;
const FREE_FLASH_OFFSET: usize = 19;
const INFO_SERIAL_OFFSET: usize = 23;

const SERIAL_NUMBER_LEN: usize = 8;

const QUERY_09_LEN: usize = 7;
const QUERY_09_VALUE: u8 = 0x10;

const WORKSHOP_DATA_LEN: usize = 0x76;
const WORKSHOP_NAME_OFFSET: usize = 9;
const WORKSHOP_NAME_LEN: usize = 10;
const WORKSHOP_CODE_OFFSET: usize = 20;
const WORKSHOP_CODE_LEN: usize = 9;

/// Display text starts after the screen position bytes.
const DISPLAY_TEXT_OFFSET: usize = 14;

const DATE_TIME_LEN: usize = 0x0D;
const DATE_TIME: [u8; 7] = [0x06, 0x31, 0x50, 0x02, 0x12, 0x23, 0x06];

const ERASE_FLASH_LEN: usize = 8;

pub(super) fn tester_info(session: &Session, reply: &mut Reply) -> Result<(), DispatchError> {
    session.note("Request for Tester info");
    let identity = &session.config.identity;
    reply.set_length(TESTER_INFO_LEN)?;
    reply.put_slice(STATUS_OFFSET, &FIRMWARE_VERSIONS)?;
    reply.put_slice(FREE_FLASH_OFFSET, &identity.free_flash.to_be_bytes())?;
    reply.put_slice(INFO_SERIAL_OFFSET, &identity.serial_number.to_be_bytes())?;
    Ok(())
}

pub(super) fn serial_number(session: &Session, reply: &mut Reply) -> Result<(), DispatchError> {
    session.note("Request for Tester serial no.");
    reply.set_length(SERIAL_NUMBER_LEN)?;
    reply.put_slice(
        STATUS_OFFSET,
        &session.config.identity.serial_number.to_be_bytes(),
    )?;
    Ok(())
}

pub(super) fn query_09(reply: &mut Reply) -> Result<(), DispatchError> {
    reply.set_length(QUERY_09_LEN)?;
    reply.put(STATUS_OFFSET, QUERY_09_VALUE)?;
    Ok(())
}

/// Copy `text` into a fixed-width NUL-padded field.
fn fixed_field(text: &str, width: usize) -> Vec<u8> {
    let mut field: Vec<u8> = text.bytes().take(width).collect();
    field.resize(width, 0);
    field
}

pub(super) fn workshop_data(
    session: &Session,
    packet: &Packet,
    reply: &mut Reply,
) -> Result<(), DispatchError> {
    session.note("Request for workshop data");
    let identity = &session.config.identity;
    let selector = packet.payload_byte(0).unwrap_or(0);

    reply.set_length(WORKSHOP_DATA_LEN)?;
    // Everything after the echoed selector is zero unless set below
    reply
        .slice_mut(REPLY_DATA_OFFSET, WORKSHOP_DATA_LEN + 1 - REPLY_DATA_OFFSET)?
        .fill(0);
    reply.set_status(status::OK);
    reply.put(REPLY_DATA_OFFSET, selector)?;
    reply.put_slice(
        WORKSHOP_NAME_OFFSET,
        &fixed_field(&identity.workshop_name, WORKSHOP_NAME_LEN),
    )?;
    reply.put_slice(
        WORKSHOP_CODE_OFFSET,
        &fixed_field(&identity.workshop_code, WORKSHOP_CODE_LEN),
    )?;
    Ok(())
}

pub(super) fn display_string(
    session: &Session,
    packet: &Packet,
    reply: &mut Reply,
) -> Result<(), DispatchError> {
    let text = packet
        .as_bytes()
        .get(DISPLAY_TEXT_OFFSET..)
        .unwrap_or_default();
    let end = text.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    session.note(&format!(
        "Display string on Tester screen: {}",
        String::from_utf8_lossy(&text[..end])
    ));
    reply.success();
    Ok(())
}

pub(super) fn date_time(session: &Session, reply: &mut Reply) -> Result<(), DispatchError> {
    session.note("Request for Tester date/time");
    reply.set_length(DATE_TIME_LEN)?;
    reply.put_slice(STATUS_OFFSET, &DATE_TIME)?;
    Ok(())
}

pub(super) fn erase_flash(
    session: &Session,
    packet: &Packet,
    reply: &mut Reply,
) -> Result<(), DispatchError> {
    session.note("Command to erase flash on Tester");
    let area = packet.byte(PAYLOAD_OFFSET).unwrap_or(0);
    reply.set_length(ERASE_FLASH_LEN)?;
    reply.set_status(status::OK);
    reply.put(REPLY_DATA_OFFSET, area)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::events::LogBuffer;
    use crate::registry::EcuRegistry;
    use crate::state::TesterState;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn exchange(opcode: u8, payload: &[u8]) -> Vec<u8> {
        exchange_logged(opcode, payload).0
    }

    fn exchange_logged(opcode: u8, payload: &[u8]) -> (Vec<u8>, Arc<LogBuffer>) {
        let log = Arc::new(LogBuffer::new());
        let mut session = Session::new(
            Arc::new(TesterState::new()),
            Arc::new(EcuRegistry::builtin()),
            Arc::new(SimConfig::default()),
            log.clone(),
        );
        let packet = Packet::request(0x55, 0, opcode, payload).unwrap();
        let reply = session.process(&packet).reply.wire_bytes().to_vec();
        (reply, log)
    }

    fn warned(log: &LogBuffer) -> bool {
        log.lines().iter().any(|l| l.starts_with("Warning:"))
    }

    #[test]
    fn tester_info_layout() {
        let reply = exchange(0x01, &[]);
        assert_eq!(reply.len(), 0x19);
        assert_eq!(
            &reply[7..],
            &[
                0x03, 0x01, 0x25, 0x09, 0x19, 0x98, 0x05, 0x05, 0x04, 0x03, 0x19, 0x99, 0x00,
                0x23, 0x33, 0x33, 0x00, 0xD4
            ]
        );
    }

    #[test]
    fn serial_and_query_09() {
        assert_eq!(&exchange(0x02, &[])[..], &[0x54, 0, 8, 0, 0, 0, 0x02, 0x00, 0xD4]);
        assert_eq!(&exchange(0x09, &[])[..], &[0x54, 0, 7, 0, 0, 0, 0x09, 0x10]);
    }

    #[test]
    fn workshop_data_layout() {
        let reply = exchange(0x0A, &[0x05, 0xEE, 0xEE]);
        assert_eq!(reply.len(), 0x77);
        assert_eq!(reply[7], 1);
        assert_eq!(reply[8], 0x05);
        assert_eq!(&reply[9..19], b"abcdefghij");
        assert_eq!(reply[19], 0);
        assert_eq!(&reply[20..29], b"klmnopqrs");
        assert!(reply[29..].iter().all(|&b| b == 0));
    }

    #[test]
    fn fixed_fields_pad_and_truncate() {
        assert_eq!(fixed_field("ab", 4), vec![b'a', b'b', 0, 0]);
        assert_eq!(fixed_field("abcdef", 3), b"abc".to_vec());
    }

    #[test]
    fn date_time_and_erase() {
        assert_eq!(
            &exchange(0x3A, &[])[7..],
            &[0x06, 0x31, 0x50, 0x02, 0x12, 0x23, 0x06]
        );
        assert_eq!(&exchange(0x3D, &[0x02])[..], &[0x54, 0, 8, 0, 0, 0, 0x3D, 0x01, 0x02]);
    }

    #[test]
    fn missing_selector_bytes_default_to_zero() {
        let (reply, log) = exchange_logged(0x0A, &[]);
        assert_eq!(reply.len(), 0x77);
        assert_eq!(reply[7], 1);
        assert_eq!(reply[8], 0);
        assert_eq!(&reply[9..19], b"abcdefghij");
        assert!(!warned(&log));

        let (reply, log) = exchange_logged(0x3D, &[]);
        assert_eq!(&reply[..], &[0x54, 0, 8, 0, 0, 0, 0x3D, 0x01, 0x00]);
        assert!(!warned(&log));
    }

    #[test]
    fn display_string_is_generic_success() {
        let mut payload = vec![0u8; 7];
        payload.extend_from_slice(b"HELLO\0");
        let reply = exchange(0x15, &payload);
        assert_eq!(&reply[..], &[0x54, 0, 7, 0, 0, 0, 0x15, 0x01]);
    }
}
