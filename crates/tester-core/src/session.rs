//! Per-connection session state
//!
//! A [`Session`] lives as long as one link connection. It tracks what the PC
//! has set up so far (selected ECU, running application pipes) and owns the
//! narration: packet dumps, handler lines and warnings all go through the
//! session so that a repeated packet can silence everything but warnings.

use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::SimConfig;
use crate::dispatch::{self, Response};
use crate::events::EventSink;
use crate::packet::{hex_dump, Packet};
use crate::registry::EcuRegistry;
use crate::state::TesterState;

/// Number of logical application pipes.
pub const PIPE_COUNT: usize = 16;

pub struct Session {
    pub(crate) state: Arc<TesterState>,
    pub(crate) registry: Arc<EcuRegistry>,
    pub(crate) config: Arc<SimConfig>,
    sink: Arc<dyn EventSink>,
    pub(crate) current_ecu: Option<u16>,
    pub(crate) pipes: [bool; PIPE_COUNT],
    pub(crate) last_was_write: bool,
    last_packet: Option<Vec<u8>>,
    quiet: bool,
}

impl Session {
    pub fn new(
        state: Arc<TesterState>,
        registry: Arc<EcuRegistry>,
        config: Arc<SimConfig>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            state,
            registry,
            config,
            sink,
            current_ecu: None,
            pipes: [false; PIPE_COUNT],
            last_was_write: false,
            last_packet: None,
            quiet: false,
        }
    }

    /// Handle one request packet and produce the reply to send.
    pub fn process(&mut self, packet: &Packet) -> Response {
        self.quiet = self.repeats_last(packet);
        if self.quiet {
            self.sink.repeated();
        } else {
            self.dump(packet.as_bytes());
        }

        let response = dispatch::dispatch(self, packet);

        let wire = response.reply.wire_bytes();
        if !self.quiet && !wire.is_empty() {
            self.dump(wire);
        }
        self.last_packet = Some(packet.as_bytes().to_vec());
        response
    }

    /// Same as the previous packet over the first length-field bytes. The
    /// final byte is not compared.
    fn repeats_last(&self, packet: &Packet) -> bool {
        let compared = packet.length_field() as usize;
        match (&self.last_packet, packet.as_bytes().get(..compared)) {
            (Some(last), Some(current)) => last.get(..compared) == Some(current),
            _ => false,
        }
    }

    pub fn current_ecu(&self) -> Option<u16> {
        self.current_ecu
    }

    pub fn pipe_running(&self, pipe: u8) -> bool {
        self.pipes.get(pipe as usize).copied().unwrap_or(false)
    }

    pub fn state(&self) -> &Arc<TesterState> {
        &self.state
    }

    // -------------------------------------------------------------------------
    // Narration
    // -------------------------------------------------------------------------

    /// A handler line. Dropped while answering a repeated packet.
    pub(crate) fn note(&self, text: &str) {
        if self.quiet {
            return;
        }
        self.sink.line(text);
    }

    /// Always reported, repeated packet or not.
    pub(crate) fn warn(&self, text: &str) {
        self.sink.warning(text);
    }

    pub(crate) fn still_writing(&self) {
        self.sink.still_writing();
    }

    fn dump(&self, bytes: &[u8]) {
        let line = format!("{} : {}", timestamp(SystemTime::now()), hex_dump(bytes));
        debug!(len = bytes.len(), "Packet");
        self.sink.line(&line);
    }
}

/// Unix time as `seconds.millis`.
fn timestamp(now: SystemTime) -> String {
    let time = DateTime::<Utc>::from(now);
    format!("{}.{:03}", time.timestamp(), time.timestamp_subsec_millis())
}
