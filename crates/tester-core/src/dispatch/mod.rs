//! Opcode dispatch
//!
//! Every request is answered. Handlers start from a reply seeded with the
//! request bytes and overwrite what their opcode defines; opcodes nobody
//! handles get a status-only success.

use std::time::Duration;

use tracing::debug;

use crate::error::DispatchError;
use crate::packet::{Packet, Reply};
use crate::session::Session;

mod ecu;
mod files;
mod identity;

/// Request opcodes understood by the Tester
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    TesterInfo = 0x01,
    SerialNumber = 0x02,
    Query09 = 0x09,
    WorkshopData = 0x0A,
    StartApplication = 0x0B,
    SlowInit = 0x11,
    IsoKeyword = 0x12,
    CommandToEcu = 0x13,
    DisplayString = 0x15,
    ShutdownThread = 0x1C,
    CloseFile = 0x1E,
    OpenFileForWriting = 0x20,
    WriteToFile = 0x21,
    OpenFileForReading = 0x23,
    ReadFromFile = 0x24,
    VerifyChecksum = 0x25,
    ChangeDirectory = 0x2A,
    NextDirectoryEntry = 0x2B,
    DateTime = 0x3A,
    EraseFlash = 0x3D,
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        let opcode = match byte {
            0x01 => Opcode::TesterInfo,
            0x02 => Opcode::SerialNumber,
            0x09 => Opcode::Query09,
            0x0A => Opcode::WorkshopData,
            0x0B => Opcode::StartApplication,
            0x11 => Opcode::SlowInit,
            0x12 => Opcode::IsoKeyword,
            0x13 => Opcode::CommandToEcu,
            0x15 => Opcode::DisplayString,
            0x1C => Opcode::ShutdownThread,
            0x1E => Opcode::CloseFile,
            0x20 => Opcode::OpenFileForWriting,
            0x21 => Opcode::WriteToFile,
            0x23 => Opcode::OpenFileForReading,
            0x24 => Opcode::ReadFromFile,
            0x25 => Opcode::VerifyChecksum,
            0x2A => Opcode::ChangeDirectory,
            0x2B => Opcode::NextDirectoryEntry,
            0x3A => Opcode::DateTime,
            0x3D => Opcode::EraseFlash,
            _ => return None,
        };
        Some(opcode)
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A reply plus any latency the handler adds on top of the reply delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub reply: Reply,
    pub delay: Duration,
}

pub(crate) fn dispatch(session: &mut Session, packet: &Packet) -> Response {
    let mut reply = Reply::for_request(packet);
    let opcode = Opcode::from_byte(packet.opcode());

    let result = match opcode {
        Some(opcode) => handle(opcode, session, packet, &mut reply),
        None => {
            debug!(opcode = format!("0x{:02X}", packet.opcode()), "Unhandled opcode");
            session.note(&format!("Unhandled opcode 0x{:02X}", packet.opcode()));
            reply.success();
            Ok(())
        }
    };

    if let Err(e) = result {
        session.warn(&format!("opcode 0x{:02X}: {}", packet.opcode(), e));
        reply = Reply::for_request(packet);
        reply.success();
    }

    session.last_was_write = opcode == Some(Opcode::WriteToFile);

    let timing = &session.config.timing;
    let delay = match opcode {
        Some(Opcode::StartApplication) => timing.start_application_delay(),
        Some(Opcode::CommandToEcu) => timing.ecu_command_delay(),
        _ => Duration::ZERO,
    };

    Response { reply, delay }
}

fn handle(
    opcode: Opcode,
    session: &mut Session,
    packet: &Packet,
    reply: &mut Reply,
) -> Result<(), DispatchError> {
    match opcode {
        Opcode::TesterInfo => identity::tester_info(session, reply),
        Opcode::SerialNumber => identity::serial_number(session, reply),
        Opcode::Query09 => identity::query_09(reply),
        Opcode::WorkshopData => identity::workshop_data(session, packet, reply),
        Opcode::DisplayString => identity::display_string(session, packet, reply),
        Opcode::DateTime => identity::date_time(session, reply),
        Opcode::EraseFlash => identity::erase_flash(session, packet, reply),
        Opcode::StartApplication => ecu::start_application(session, packet, reply),
        Opcode::SlowInit => ecu::slow_init(session, packet, reply),
        Opcode::IsoKeyword => ecu::iso_keyword(session, reply),
        Opcode::CommandToEcu => ecu::command_to_ecu(session, packet, reply),
        Opcode::ShutdownThread => ecu::shutdown_thread(session, packet, reply),
        Opcode::CloseFile => files::close(session, reply),
        Opcode::OpenFileForWriting => files::open_for_writing(session, packet, reply),
        Opcode::WriteToFile => files::write(session, packet, reply),
        Opcode::OpenFileForReading => files::open_for_reading(session, packet, reply),
        Opcode::ReadFromFile => files::read(session, packet, reply),
        Opcode::VerifyChecksum => files::verify_checksum(session, reply),
        Opcode::ChangeDirectory => files::change_directory(session, packet, reply),
        Opcode::NextDirectoryEntry => files::next_entry(session, packet, reply),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_bytes_round_trip() {
        for byte in 0..=u8::MAX {
            if let Some(opcode) = Opcode::from_byte(byte) {
                assert_eq!(opcode.as_byte(), byte);
            }
        }
        assert_eq!(Opcode::from_byte(0x13), Some(Opcode::CommandToEcu));
        assert_eq!(Opcode::from_byte(0x7F), None);
    }
}
