//! Blocking framing loop
//!
//! Reads length-prefixed request frames from a connected byte stream, hands
//! each one to the [`Session`] and writes the reply back after the configured
//! delay. The loop owns the worker thread it runs on; other threads end it
//! through a [`StopHandle`].

use std::io::{ErrorKind, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::TransportError;
use crate::packet::{frame_size, Packet, HEADER_LEN, LENGTH_HI_OFFSET, MIN_PACKET_LEN};
use crate::session::Session;

/// Why the loop returned without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEnd {
    /// The peer closed the connection between packets.
    Closed,
    /// A [`StopHandle`] asked the loop to end.
    Stopped,
}

/// Ends a running link loop from another thread.
///
/// Stopping sets a shared flag and runs the shutdown action, which must make
/// a blocked read on the stream return.
#[derive(Clone)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
    shutdown: Arc<dyn Fn() + Send + Sync>,
}

impl StopHandle {
    pub fn new(shutdown: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            stopped: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(shutdown),
        }
    }

    /// Stop handle that shuts a Unix socket down in both directions.
    pub fn for_unix_stream(stream: &UnixStream) -> std::io::Result<Self> {
        let stream = stream.try_clone()?;
        Ok(Self::new(move || {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                debug!(error = %e, "Socket shutdown failed");
            }
        }))
    }

    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            (self.shutdown)();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopHandle")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

enum Fill {
    Complete,
    /// EOF after this many bytes.
    Eof(usize),
    Stopped,
}

/// Fill `buf` completely, retrying short and interrupted reads.
fn read_full<S: Read>(
    stream: &mut S,
    buf: &mut [u8],
    stop: &StopHandle,
) -> Result<Fill, TransportError> {
    let mut filled = 0;
    while filled < buf.len() {
        if stop.is_stopped() {
            return Ok(Fill::Stopped);
        }
        match stream.read(&mut buf[filled..]) {
            // A shutdown from the stop handle looks like EOF to the reader
            Ok(0) if stop.is_stopped() => return Ok(Fill::Stopped),
            Ok(0) => return Ok(Fill::Eof(filled)),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) if stop.is_stopped() => return Ok(Fill::Stopped),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Fill::Complete)
}

/// Run the framing loop until the peer disconnects, the handle stops it, or
/// the stream can no longer be trusted.
pub fn run_link<S: Read + Write>(
    stream: &mut S,
    session: &mut Session,
    reply_delay: Duration,
    stop: &StopHandle,
) -> Result<LinkEnd, TransportError> {
    loop {
        let mut header = [0u8; HEADER_LEN];
        match read_full(stream, &mut header, stop)? {
            Fill::Complete => {}
            Fill::Eof(got) => {
                if got > 0 {
                    debug!(got, "Connection closed inside a packet header");
                }
                return Ok(LinkEnd::Closed);
            }
            Fill::Stopped => return Ok(LinkEnd::Stopped),
        }

        if header[LENGTH_HI_OFFSET] != 0 {
            session.warn(&format!(
                "high length byte is 0x{:02X}, ignoring it",
                header[LENGTH_HI_OFFSET]
            ));
        }

        let size = frame_size(&header);
        if size < MIN_PACKET_LEN {
            return Err(TransportError::PacketTooShort { size });
        }

        let mut bytes = vec![0u8; size];
        bytes[..HEADER_LEN].copy_from_slice(&header);
        match read_full(stream, &mut bytes[HEADER_LEN..], stop)? {
            Fill::Complete => {}
            Fill::Eof(got) => {
                return Err(TransportError::TruncatedBody {
                    expected: size,
                    got: HEADER_LEN + got,
                })
            }
            Fill::Stopped => return Ok(LinkEnd::Stopped),
        }

        let packet = Packet::from_bytes(bytes)?;
        let response = session.process(&packet);
        let wire = response.reply.wire_bytes();
        if wire.is_empty() {
            continue;
        }

        let delay = reply_delay + response.delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if stop.is_stopped() {
            return Ok(LinkEnd::Stopped);
        }

        trace!(len = wire.len(), "Writing reply");
        match stream.write_all(wire).and_then(|()| stream.flush()) {
            Ok(()) => {}
            Err(_) if stop.is_stopped() => return Ok(LinkEnd::Stopped),
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::events::LogBuffer;
    use crate::registry::EcuRegistry;
    use crate::state::TesterState;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    /// In-memory stream: reads from a script, collects writes.
    struct Scripted {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Scripted {
        fn new(input: Vec<u8>) -> Self {
            Self {
                input: Cursor::new(input),
                output: Vec::new(),
            }
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            // One byte at a time exercises the partial read path
            let n = buf.len().min(1);
            self.input.read(&mut buf[..n])
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn session(log: Arc<LogBuffer>) -> Session {
        Session::new(
            Arc::new(TesterState::new()),
            Arc::new(EcuRegistry::builtin()),
            Arc::new(SimConfig::default()),
            log,
        )
    }

    fn run(input: Vec<u8>) -> (Result<LinkEnd, TransportError>, Vec<u8>, Arc<LogBuffer>) {
        let log = Arc::new(LogBuffer::new());
        let mut session = session(log.clone());
        let mut stream = Scripted::new(input);
        let stop = StopHandle::new(|| {});
        let end = run_link(&mut stream, &mut session, Duration::ZERO, &stop);
        (end, stream.output, log)
    }

    #[test]
    fn answers_then_reports_close() {
        let (end, output, _) = run(vec![0x55, 0, 6, 0, 0, 0, 0x7F]);
        assert_eq!(end.unwrap(), LinkEnd::Closed);
        assert_eq!(output, vec![0x54, 0, 7, 0, 0, 0, 0x7F, 0x01]);
    }

    #[test]
    fn short_frame_is_fatal() {
        let (end, output, _) = run(vec![0x55, 0, 3, 0, 0, 0, 0x01]);
        assert!(matches!(end, Err(TransportError::PacketTooShort { size: 4 })));
        assert!(output.is_empty());
    }

    #[test]
    fn truncated_body_is_fatal() {
        let (end, _, _) = run(vec![0x55, 0, 8, 0, 0]);
        assert!(matches!(
            end,
            Err(TransportError::TruncatedBody { expected: 9, got: 5 })
        ));
    }

    #[test]
    fn high_length_byte_is_warned_and_ignored() {
        let (end, output, log) = run(vec![0x55, 0x01, 6, 0, 0, 0, 0x09]);
        assert_eq!(end.unwrap(), LinkEnd::Closed);
        assert_eq!(output, vec![0x54, 0, 7, 0, 0, 0, 0x09, 0x10]);
        assert!(log.contains("high length byte"));
    }

    #[test]
    fn stopped_handle_ends_loop_before_reading() {
        let log = Arc::new(LogBuffer::new());
        let mut session = session(log);
        let mut stream = Scripted::new(vec![0x55, 0, 6, 0, 0, 0, 0x3A]);
        let stop = StopHandle::new(|| {});
        stop.stop();
        let end = run_link(&mut stream, &mut session, Duration::ZERO, &stop).unwrap();
        assert_eq!(end, LinkEnd::Stopped);
        assert!(stream.output.is_empty());
    }

    #[test]
    fn stop_runs_shutdown_once() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        let stop = StopHandle::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        stop.stop();
        stop.clone().stop();
        assert!(stop.is_stopped());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
