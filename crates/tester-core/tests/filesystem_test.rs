//! Flash filesystem over the link, and persisting it between runs.

mod common;

use common::{path, success, TestLink};
use pretty_assertions::assert_eq;
use tester_core::{FsError, PersistError};

const SEQUENCE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Write request payload: sequence number, data, closing byte.
fn write_payload(data: &[u8]) -> Vec<u8> {
    let mut payload = SEQUENCE.to_vec();
    payload.extend_from_slice(data);
    payload.push(0x00);
    payload
}

fn write_file(link: &mut TestLink, name: &str, content: &[u8]) {
    assert_eq!(link.send(0x20, &path(name)), success(0, 0x20));
    for chunk in content.chunks(100) {
        assert_eq!(link.send(0x21, &write_payload(chunk)), success(0, 0x21));
    }
    assert_eq!(link.send(0x1E, &[]), success(0, 0x1E));
}

fn complemented_sum(bytes: &[u8]) -> u8 {
    !bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

#[test]
fn write_then_read_reconstructs_file() {
    let mut link = TestLink::start();
    let content: Vec<u8> = (0..150u32).map(|i| (i * 7 + 3) as u8).collect();
    write_file(&mut link, "/DATA/ECU.BIN", &content);
    assert_eq!(link.log.still_writing_count(), 1);

    link.send(0x23, &path("/DATA/ECU.BIN"));
    let mut read_back = Vec::new();
    loop {
        let reply = link.send(0x24, &SEQUENCE);
        assert_eq!(reply[7], 0x01);
        assert_eq!(&reply[8..12], &SEQUENCE);
        let n = reply[2] as usize - 12;
        if n == 0 {
            assert_eq!(reply.len(), 13);
            assert_eq!(reply[12], 0);
            break;
        }
        let data = &reply[12..12 + n];
        assert_eq!(reply[12 + n], complemented_sum(data));
        read_back.extend_from_slice(data);
    }
    assert_eq!(read_back, content);

    // Column sums over the two chunks, complemented
    let mut columns = [0u8; 110];
    for chunk in content.chunks(110) {
        for (column, &b) in columns.iter_mut().zip(chunk) {
            *column = column.wrapping_add(b);
        }
    }
    let reply = link.send(0x25, &[]);
    assert_eq!(reply[2], 117);
    assert_eq!(reply[7], 0x01);
    let expected: Vec<u8> = columns.iter().map(|c| !c).collect();
    assert_eq!(&reply[8..118], &expected[..]);
}

#[test]
fn reopening_for_read_clears_checksum() {
    let mut link = TestLink::start();
    write_file(&mut link, "/DATA/A.BIN", &[0x10, 0x20]);

    link.send(0x23, &path("/DATA/A.BIN"));
    link.send(0x24, &SEQUENCE);
    link.send(0x23, &path("/DATA/A.BIN"));
    let reply = link.send(0x25, &[]);
    assert!(reply[8..118].iter().all(|&b| b == 0xFF));
}

#[test]
fn missing_file_reads_empty() {
    let mut link = TestLink::start();
    link.send(0x23, &path("/NOPE/X.BIN"));
    assert_eq!(
        link.send(0x24, &SEQUENCE),
        vec![0x54, 0, 12, 0, 0, 0, 0x24, 0x01, 0, 0, 0, 1, 0]
    );
}

#[test]
fn read_without_open_file_warns_and_succeeds() {
    let mut link = TestLink::start();
    assert_eq!(link.send(0x24, &SEQUENCE), success(0, 0x24));
    assert!(link.log.contains("without an open file"));
}

#[test]
fn empty_directory_lists_nothing() {
    let mut link = TestLink::start();
    assert_eq!(link.send(0x2A, &path("/EMPTY")), success(0, 0x2A));
    assert_eq!(
        link.send(0x2B, &SEQUENCE),
        vec![0x54, 0, 7, 0, 0, 0, 0x2B, 0x04]
    );
}

#[test]
fn directory_listing_reports_files() {
    let mut link = TestLink::start();
    write_file(&mut link, "/DATA/ECU.BIN", &[1, 2, 3]);

    link.send(0x2A, &path("/DATA"));
    let reply = link.send(0x2B, &SEQUENCE);
    assert_eq!(reply[2] as usize, 37 + "ECU.BIN".len());
    assert_eq!(reply[7], 0x01);
    assert_eq!(&reply[8..12], &SEQUENCE);
    assert_eq!(reply[12], 2);
    assert_eq!(&reply[13..17], &[0, 0, 0, 3]);
    assert_eq!(&reply[17..38], b"AUG-06-1998  13:24:55");
    assert_eq!(&reply[38..], b"ECU.BIN");

    assert_eq!(link.send(0x2B, &SEQUENCE)[7], 0x04);
}

#[test]
fn long_names_are_cut_in_listing() {
    let mut link = TestLink::start();
    let name: String = (0..100u8).map(|i| (b'A' + i % 26) as char).collect();
    write_file(&mut link, &format!("/DATA/{name}"), &[7]);

    link.send(0x2A, &path("/DATA"));
    let reply = link.send(0x2B, &SEQUENCE);
    assert_eq!(reply[2], 126);
    assert_eq!(reply.len(), 127);
    assert_eq!(reply[7], 0x01);
    assert_eq!(&reply[38..], &name.as_bytes()[..89]);
}

#[test]
fn disconnect_closes_open_file() {
    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("state");

    let mut link = TestLink::start();
    write_file(&mut link, "/D/F", &[0x01]);
    link.emulator.save_state(&state_file).unwrap();
    assert_eq!(link.send(0x20, &path("/D/F")), success(0, 0x20));
    link.send(0x2A, &path("/D"));

    assert_eq!(link.reconnect(), tester_core::LinkEnd::Closed);
    assert!(!link.emulator.state().with_fs(|fs| fs.is_file_open()));
    link.emulator.load_state(&state_file).unwrap();

    // The new session has nothing open to append to
    assert_eq!(link.send(0x21, &write_payload(&[0xAA, 0xBB])), success(0, 0x21));
    assert!(link.log.contains("without an open file"));
    assert_eq!(
        link.emulator.state().file_tree()["/D"]["F"],
        vec![0x01]
    );
}

// =============================================================================
// Persisted state
// =============================================================================

#[test]
fn saved_state_loads_into_fresh_emulator() {
    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("sd2-saved-state");

    let mut link = TestLink::start();
    write_file(&mut link, "/DATA/ECU.BIN", &[0xDE, 0xAD, 0xBE, 0xEF]);
    link.emulator.save_state(&state_file).unwrap();
    drop(link);

    let mut link = TestLink::start();
    link.emulator.load_state(&state_file).unwrap();
    link.send(0x23, &path("/DATA/ECU.BIN"));
    let reply = link.send(0x24, &SEQUENCE);
    assert_eq!(&reply[12..16], &[0xDE, 0xAD, 0xBE, 0xEF]);
}

#[test]
fn load_is_refused_while_file_is_open() {
    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("state");

    let mut link = TestLink::start();
    write_file(&mut link, "/DATA/ECU.BIN", &[1]);
    link.emulator.save_state(&state_file).unwrap();

    link.send(0x20, &path("/DATA/OTHER.BIN"));
    let err = link.emulator.load_state(&state_file).unwrap_err();
    assert!(matches!(
        err,
        PersistError::Filesystem(FsError::FileOpen(_))
    ));
    assert!(link.log.contains("could not load state"));

    link.send(0x1E, &[]);
    link.emulator.load_state(&state_file).unwrap();
}
