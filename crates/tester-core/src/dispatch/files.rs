//! Flash filesystem opcodes

use crate::error::DispatchError;
use crate::packet::{status, Packet, Reply, PAYLOAD_OFFSET, REPLY_DATA_OFFSET, STATUS_ONLY_LEN};
use crate::session::Session;
use crate::vfs::{path_from_payload, FsError, CHUNK_SIZE};

/// Write requests: 4 sequence bytes, then data up to the last byte.
const WRITE_DATA_OFFSET: usize = 11;

/// Read and directory replies echo the 4-byte request sequence number.
const SEQUENCE_LEN: usize = 4;
/// First byte after the echoed sequence number.
const SEQUENCE_END: usize = REPLY_DATA_OFFSET + SEQUENCE_LEN;

const CHECKSUM_REPLY_LEN: usize = REPLY_DATA_OFFSET + CHUNK_SIZE - 1;

/// Directory entry type marker for a regular file.
const ENTRY_TYPE_FILE: u8 = 2;
const ENTRY_SIZE_OFFSET: usize = SEQUENCE_END + 1;
const ENTRY_TIMESTAMP_OFFSET: usize = ENTRY_SIZE_OFFSET + 4;
/// Every file reports the same modification time.
const ENTRY_TIMESTAMP: &[u8; 21] = b"AUG-06-1998  13:24:55";
const ENTRY_NAME_OFFSET: usize = ENTRY_TIMESTAMP_OFFSET + ENTRY_TIMESTAMP.len();
const ENTRY_NAME_MAX: usize = 89;

fn no_open_file(session: &Session, reply: &mut Reply, action: &str) {
    session.warn(&format!("file {action} without an open file"));
    reply.success();
}

fn echo_sequence(packet: &Packet, reply: &mut Reply) -> Result<(), DispatchError> {
    let sequence = packet.slice(PAYLOAD_OFFSET, SEQUENCE_LEN)?;
    reply.put_slice(REPLY_DATA_OFFSET, sequence)?;
    Ok(())
}

pub(super) fn close(session: &Session, reply: &mut Reply) -> Result<(), DispatchError> {
    match session.state.with_fs(|fs| fs.close()) {
        Some(path) => session.note(&format!("Close file (which is currently {path})")),
        None => session.note("Close file (none open)"),
    }
    reply.success();
    Ok(())
}

pub(super) fn open_for_writing(
    session: &Session,
    packet: &Packet,
    reply: &mut Reply,
) -> Result<(), DispatchError> {
    let path = path_from_payload(packet.payload());
    let opened = session.state.with_fs(|fs| fs.open_for_write(&path));
    session.note(&format!("Open file for writing: {opened}"));
    reply.success();
    Ok(())
}

pub(super) fn write(
    session: &Session,
    packet: &Packet,
    reply: &mut Reply,
) -> Result<(), DispatchError> {
    // The byte at the length field offset closes the request and is not data
    let end = packet.length_field() as usize;
    let data = packet
        .as_bytes()
        .get(WRITE_DATA_OFFSET..end)
        .unwrap_or_default();

    match session.state.with_fs(|fs| fs.write(data)) {
        Ok(size) => {
            if session.last_was_write {
                session.still_writing();
            } else {
                session.note(&format!(
                    "Write {} bytes to file (now {size} bytes)",
                    data.len()
                ));
            }
            reply.success();
        }
        Err(FsError::NoOpenFile) => no_open_file(session, reply, "write"),
        Err(e) => {
            session.warn(&e.to_string());
            reply.success();
        }
    }
    Ok(())
}

pub(super) fn open_for_reading(
    session: &Session,
    packet: &Packet,
    reply: &mut Reply,
) -> Result<(), DispatchError> {
    let path = path_from_payload(packet.payload());
    let opened = session.state.with_fs(|fs| fs.open_for_read(&path));
    session.note(&format!("Open file for reading: {opened}"));
    reply.success();
    Ok(())
}

pub(super) fn read(
    session: &Session,
    packet: &Packet,
    reply: &mut Reply,
) -> Result<(), DispatchError> {
    let chunk = match session.state.with_fs(|fs| fs.read_chunk()) {
        Ok(chunk) => chunk,
        Err(_) => {
            no_open_file(session, reply, "read");
            return Ok(());
        }
    };

    let n = chunk.data.len();
    session.note(&format!(
        "Read from file ({} bytes left in file, {n} bytes to send in this chunk starting at file pos {:08X})",
        chunk.remaining, chunk.position
    ));

    reply.set_length(SEQUENCE_END + n)?;
    reply.set_status(status::OK);
    echo_sequence(packet, reply)?;
    if n == 0 {
        reply.put(SEQUENCE_END, 0)?;
    } else {
        reply.put_slice(SEQUENCE_END, &chunk.data)?;
        reply.put(SEQUENCE_END + n, chunk.checksum)?;
        session.note(&format!(
            "Computed checksum of {:02X} for this chunk",
            chunk.checksum
        ));
    }
    Ok(())
}

pub(super) fn verify_checksum(session: &Session, reply: &mut Reply) -> Result<(), DispatchError> {
    session.note("Request for checksum verification of file");
    let columns = session.state.with_fs(|fs| fs.accumulator().complement());
    reply.set_length(CHECKSUM_REPLY_LEN)?;
    reply.set_status(status::OK);
    reply.put_slice(REPLY_DATA_OFFSET, &columns)?;
    Ok(())
}

pub(super) fn change_directory(
    session: &Session,
    packet: &Packet,
    reply: &mut Reply,
) -> Result<(), DispatchError> {
    let dir = path_from_payload(packet.payload());
    session.note(&format!("Change directory: {dir}"));
    session.state.with_fs(|fs| fs.change_dir(&dir));
    reply.success();
    Ok(())
}

pub(super) fn next_entry(
    session: &Session,
    packet: &Packet,
    reply: &mut Reply,
) -> Result<(), DispatchError> {
    session.note("Request for next directory entry");
    let Some(entry) = session.state.with_fs(|fs| fs.next_entry()) else {
        reply.set_length(STATUS_ONLY_LEN as usize)?;
        reply.set_status(status::END_OF_DIRECTORY);
        return Ok(());
    };

    let name = &entry.name.as_bytes()[..entry.name.len().min(ENTRY_NAME_MAX)];
    session.note(&format!(" File: {}, size {}", entry.name, entry.size));

    reply.set_length(ENTRY_NAME_OFFSET - 1 + name.len())?;
    reply.set_status(status::OK);
    echo_sequence(packet, reply)?;
    reply.put(SEQUENCE_END, ENTRY_TYPE_FILE)?;
    reply.put_slice(ENTRY_SIZE_OFFSET, &entry.size.to_be_bytes())?;
    reply.put_slice(ENTRY_TIMESTAMP_OFFSET, ENTRY_TIMESTAMP)?;
    reply.put_slice(ENTRY_NAME_OFFSET, name)?;
    Ok(())
}
