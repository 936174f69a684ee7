//! ECU session opcodes: application start/stop, slow init and command
//! forwarding to the selected ECU's protocol decoder.

use std::sync::Arc;

use crate::error::DispatchError;
use crate::packet::{status, Packet, Reply, PAYLOAD_OFFSET, REPLY_DATA_OFFSET, STATUS_ONLY_LEN};
use crate::protocol::{decoder_for, EcuContext, EcuRequest, Outcome};
use crate::session::{Session, PIPE_COUNT};

/// Nothing handled the request: keep the echoed request, or answer with a
/// plain success when echoing is switched off.
fn unhandled(session: &Session, reply: &mut Reply) {
    if !session.config.compat.echo_unhandled_requests {
        reply.success();
    }
}

pub(super) fn start_application(
    session: &mut Session,
    packet: &Packet,
    reply: &mut Reply,
) -> Result<(), DispatchError> {
    let ecu_id = packet.u16_be(PAYLOAD_OFFSET)?;
    let pipe = packet.payload_byte(2)?;
    session.note(&format!(
        "Starting application for ECU {ecu_id:04} on pipe {pipe}"
    ));

    if (pipe as usize) < PIPE_COUNT {
        session.pipes[pipe as usize] = true;
    } else {
        session.warn(&format!(
            "pipe {pipe} out of range (0..{PIPE_COUNT}), not tracked"
        ));
    }
    if session.registry.get(ecu_id).is_none() {
        session.warn(&format!("ECU {ecu_id:04} is not in the registry"));
    }
    session.current_ecu = Some(ecu_id);

    reply.success();
    Ok(())
}

/// Reply with the selected ECU's keyword bytes, optionally followed by its
/// extra init info.
fn put_keyword(
    session: &Session,
    reply: &mut Reply,
    with_init_info: bool,
) -> Result<(), DispatchError> {
    let profile = session
        .current_ecu
        .and_then(|id| session.registry.get(id));
    let Some(profile) = profile else {
        let id = session.current_ecu.unwrap_or(0);
        session.warn(&format!("no ISO byte record for ECU ID {id:04}"));
        unhandled(session, reply);
        return Ok(());
    };

    let mut bytes = profile.iso_keyword.clone();
    if with_init_info {
        bytes.extend_from_slice(&profile.extra_init_info);
    }
    reply.set_length(STATUS_ONLY_LEN as usize + bytes.len())?;
    reply.set_status(status::OK);
    reply.put_slice(REPLY_DATA_OFFSET, &bytes)?;
    Ok(())
}

pub(super) fn slow_init(
    session: &Session,
    packet: &Packet,
    reply: &mut Reply,
) -> Result<(), DispatchError> {
    let address = packet.payload_byte(0).unwrap_or(0);
    session.note(&format!("Do 5-baud slow init for ECU address 0x{address:02X}"));
    put_keyword(session, reply, true)
}

pub(super) fn iso_keyword(session: &Session, reply: &mut Reply) -> Result<(), DispatchError> {
    session.note("Request for ISO keyword");
    put_keyword(session, reply, false)
}

pub(super) fn command_to_ecu(
    session: &Session,
    packet: &Packet,
    reply: &mut Reply,
) -> Result<(), DispatchError> {
    let Some(ecu_id) = session.current_ecu else {
        session.warn("command to ECU with no ECU selected");
        unhandled(session, reply);
        return Ok(());
    };
    let Some(protocol) = session.registry.protocol(ecu_id) else {
        session.warn(&format!("command to unknown ECU {ecu_id:04}"));
        unhandled(session, reply);
        return Ok(());
    };
    let Some(decoder) = decoder_for(protocol) else {
        session.warn(&format!(
            "no decoder for {protocol} protocol (ECU {ecu_id:04})"
        ));
        unhandled(session, reply);
        return Ok(());
    };

    let request = EcuRequest::parse(packet, decoder.verbose_title_offset())?;
    let config = Arc::clone(&session.config);
    let (outcome, notes) = session.state.with_memory(|memory| {
        let mut ctx = EcuContext::new(memory, &config.compat);
        let outcome = decoder.handle(&request, &mut ctx, reply);
        (outcome, ctx.into_notes())
    });
    for note in &notes {
        session.note(note);
    }

    match outcome? {
        Outcome::Replied => {}
        Outcome::UnknownTitle(title) => {
            session.warn(&format!("{protocol}: unhandled block title 0x{title:02X}"));
        }
        Outcome::Unhandled(title) => {
            session.warn(&format!(
                "{protocol}: unrecognized request 0x{title:02X}, no reply payload"
            ));
            unhandled(session, reply);
        }
    }
    Ok(())
}

pub(super) fn shutdown_thread(
    session: &mut Session,
    packet: &Packet,
    reply: &mut Reply,
) -> Result<(), DispatchError> {
    let pipe = packet.channel();
    session.note(&format!("Shut down ECU application thread on pipe {pipe}"));

    if session.pipe_running(pipe) {
        session.pipes[pipe as usize] = false;
        reply.success();
    } else {
        session.note("Thread not running; replying with negative status");
        reply.set_length(STATUS_ONLY_LEN as usize)?;
        reply.set_channel(0);
        reply.set_status(status::NOT_RUNNING);
    }
    Ok(())
}
