//! Shared harness: an emulator serving one end of a socket pair, driven from
//! the other end the way the PC software would.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

use tester_core::{CompatConfig, Emulator, LinkEnd, LogBuffer, SessionHandle, SimConfig, TimingConfig};

/// Request prefix used by the PC in linked mode.
pub const REQUEST_PREFIX: u8 = 0x55;

pub struct TestLink {
    pub emulator: Emulator,
    pub log: Arc<LogBuffer>,
    peer: UnixStream,
    handle: Option<SessionHandle>,
}

impl TestLink {
    pub fn start() -> Self {
        Self::with_compat(CompatConfig::default())
    }

    pub fn with_compat(compat: CompatConfig) -> Self {
        let config = SimConfig {
            timing: TimingConfig::immediate(),
            compat,
            ..SimConfig::default()
        };
        let log = Arc::new(LogBuffer::new());
        let emulator = Emulator::new(config).with_sink(log.clone());

        let (ours, peer) = UnixStream::pair().unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let handle = emulator.start(ours).unwrap();

        Self {
            emulator,
            log,
            peer,
            handle: Some(handle),
        }
    }

    /// Raw frame bytes in, full reply frame out.
    pub fn send_raw(&mut self, frame: &[u8]) -> Vec<u8> {
        self.peer.write_all(frame).unwrap();
        let mut header = [0u8; 3];
        self.peer.read_exact(&mut header).unwrap();
        let mut reply = header.to_vec();
        reply.resize(header[2] as usize + 1, 0);
        self.peer.read_exact(&mut reply[3..]).unwrap();
        reply
    }

    pub fn request(&mut self, channel: u8, opcode: u8, payload: &[u8]) -> Vec<u8> {
        self.send_raw(&frame(channel, opcode, payload))
    }

    pub fn send(&mut self, opcode: u8, payload: &[u8]) -> Vec<u8> {
        self.request(0, opcode, payload)
    }

    /// Select an ECU by starting its application on `pipe`.
    pub fn start_application(&mut self, ecu_id: u16, pipe: u8) -> Vec<u8> {
        let [hi, lo] = ecu_id.to_be_bytes();
        self.send(0x0B, &[hi, lo, pipe])
    }

    pub fn peer(&mut self) -> &mut UnixStream {
        &mut self.peer
    }

    /// Wait for the session to end on its own.
    pub fn join(mut self) -> tester_core::Result<LinkEnd> {
        self.handle.take().unwrap().join()
    }

    /// Close the PC side of the connection and wait for the session.
    pub fn hang_up(self) -> tester_core::Result<LinkEnd> {
        self.peer.shutdown(Shutdown::Both).unwrap();
        self.join()
    }

    /// Hang up, then connect again to the same emulator. Returns how the
    /// first session ended.
    pub fn reconnect(&mut self) -> LinkEnd {
        self.peer.shutdown(Shutdown::Both).unwrap();
        let end = self.handle.take().unwrap().join().unwrap();

        let (ours, peer) = UnixStream::pair().unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        self.handle = Some(self.emulator.start(ours).unwrap());
        self.peer = peer;
        end
    }

    /// Stop the session and return how it ended.
    pub fn finish(mut self) -> LinkEnd {
        let handle = self.handle.take().unwrap();
        handle.stop();
        handle.join().unwrap()
    }
}

impl Drop for TestLink {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.stop();
            let _ = handle.join();
        }
    }
}

/// Build a request frame with the length field filled in.
pub fn frame(channel: u8, opcode: u8, payload: &[u8]) -> Vec<u8> {
    let mut bytes = vec![REQUEST_PREFIX, 0, 0, 0, 0, channel, opcode];
    bytes.extend_from_slice(payload);
    bytes[2] = (bytes.len() - 1) as u8;
    bytes
}

/// Status-only success reply to `opcode`.
pub fn success(channel: u8, opcode: u8) -> Vec<u8> {
    vec![0x54, 0, 7, 0, 0, channel, opcode, 0x01]
}

/// NUL-terminated path payload.
pub fn path(p: &str) -> Vec<u8> {
    let mut bytes = p.as_bytes().to_vec();
    bytes.push(0);
    bytes
}
