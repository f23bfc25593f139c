//! Host command dispatch.
//!
//! A host drives the reader role with a single flag-word command: which
//! selection families to try, whether to run an ISO 14443-4 exchange or a
//! raw one, and the connection housekeeping around them. [`process`] walks
//! the requested actions in a fixed order, emits one status-carrying reply
//! per action and stops the chain at the first failure, the disconnect
//! request is honoured regardless.

use crate::checksum::CrcKind;
use crate::consts::MAX_FRAME_SIZE;
use crate::error::{Error, Status};
use crate::hal::{CancelToken, Diagnostics, Radio, SampleTransport, TickClock, TraceSink};
use crate::link::{ApduResponse, CardSelect, CtsCard, PicopassHeader, Session};

/// Energise the field and reset session parameters first.
pub const CONNECT: u16 = 1 << 0;
/// Drop the field when everything else is done.
pub const DISCONNECT: u16 = 1 << 1;
/// Exchange the payload as an ISO 14443-4 block.
pub const APDU: u16 = 1 << 2;
/// Exchange the payload as a raw frame.
pub const RAW: u16 = 1 << 3;
/// Raise the scope trigger line around transmissions.
pub const REQUEST_TRIGGER: u16 = 1 << 4;
/// Append a checksum to the raw payload before sending.
pub const APPEND_CRC: u16 = 1 << 5;
/// Run standard Type B selection.
pub const SELECT_STD: u16 = 1 << 6;
/// Run SRx selection.
pub const SELECT_SR: u16 = 1 << 7;
/// Apply the command's timeout before anything else.
pub const SET_TIMEOUT: u16 = 1 << 8;
/// Flag the outgoing I-block for chaining.
pub const SEND_CHAINING: u16 = 1 << 9;
/// Run ASK CTS selection.
pub const SELECT_CTS: u16 = 1 << 10;
/// Discard the protocol trace before starting.
pub const CLEAR_TRACE: u16 = 1 << 11;
/// Run Xerox selection.
pub const SELECT_XRX: u16 = 1 << 12;
/// Run Picopass selection; also selects the Picopass checksum for
/// [`APPEND_CRC`].
pub const SELECT_PICOPASS: u16 = 1 << 13;

/// One host command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawCommand {
    /// Action flags, see the `SELECT_*`/`APDU`/`RAW` constants.
    pub flags: u16,
    /// Receive timeout in ETUs, applied when [`SET_TIMEOUT`] is set.
    pub timeout_etu: u32,
    /// Payload for [`APDU`] or [`RAW`].
    pub data: heapless::Vec<u8, MAX_FRAME_SIZE>,
}

/// Payload of one reply to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyData {
    /// Status only.
    None,
    /// A standard, SRx or Xerox selection result.
    Select(CardSelect),
    /// A CTS selection result.
    Cts(CtsCard),
    /// A Picopass selection result.
    Picopass(PicopassHeader),
    /// A raw exchange answer.
    Bytes(heapless::Vec<u8, MAX_FRAME_SIZE>),
    /// An ISO 14443-4 exchange answer.
    Apdu(ApduResponse),
}

/// Executes one host command against a session, calling `reply` once per
/// performed action.
pub fn process<T, R, C, S, D, A, F>(
    session: &mut Session<T, R, C, S, D, A>,
    cmd: &RawCommand,
    mut reply: F,
) where
    T: SampleTransport,
    R: Radio,
    C: TickClock,
    S: TraceSink,
    D: Diagnostics,
    A: CancelToken,
    F: FnMut(Status, ReplyData),
{
    if cmd.flags & REQUEST_TRIGGER != 0 {
        session.set_trigger(true);
    }
    if cmd.flags & CONNECT != 0 {
        session.connect();
    }
    if cmd.flags & SET_TIMEOUT != 0 {
        session.set_timeout_etu(cmd.timeout_etu);
    }
    if cmd.flags & CLEAR_TRACE != 0 {
        session.channel_mut().trace.clear();
    }

    'actions: {
        if cmd.flags & SELECT_STD != 0 {
            match session.select_standard() {
                Ok(card) => reply(Status::Success, ReplyData::Select(card)),
                Err(e) => {
                    reply(e.into(), ReplyData::None);
                    break 'actions;
                }
            }
        }
        if cmd.flags & SELECT_SR != 0 {
            match session.select_srx() {
                Ok(card) => reply(Status::Success, ReplyData::Select(card)),
                Err(e) => {
                    reply(e.into(), ReplyData::None);
                    break 'actions;
                }
            }
        }
        if cmd.flags & SELECT_XRX != 0 {
            match session.select_xrx() {
                Ok(card) => reply(Status::Success, ReplyData::Select(card)),
                Err(e) => {
                    reply(e.into(), ReplyData::None);
                    break 'actions;
                }
            }
        }
        if cmd.flags & SELECT_CTS != 0 {
            match session.select_cts() {
                Ok(card) => reply(Status::Success, ReplyData::Cts(card)),
                Err(e) => {
                    reply(e.into(), ReplyData::None);
                    break 'actions;
                }
            }
        }
        if cmd.flags & SELECT_PICOPASS != 0 {
            match session.select_picopass() {
                Ok(hdr) => reply(Status::Success, ReplyData::Picopass(hdr)),
                Err(e) => {
                    reply(e.into(), ReplyData::None);
                    break 'actions;
                }
            }
        }

        if cmd.flags & (APDU | RAW) != 0 && !session.is_connected() {
            reply(Error::FieldOff.into(), ReplyData::None);
            break 'actions;
        }
        if cmd.flags & APDU != 0 {
            match session.exchange_apdu(&cmd.data, cmd.flags & SEND_CHAINING != 0) {
                Ok(resp) => reply(Status::Success, ReplyData::Apdu(resp)),
                Err(e) => {
                    reply(e.into(), ReplyData::None);
                    break 'actions;
                }
            }
        }
        if cmd.flags & RAW != 0 {
            let kind = if cmd.flags & SELECT_PICOPASS != 0 {
                CrcKind::Picopass
            } else {
                CrcKind::Iso14443b
            };
            match session.send_raw(&cmd.data, cmd.flags & APPEND_CRC != 0, kind) {
                Ok(resp) => reply(Status::Success, ReplyData::Bytes(resp)),
                Err(e) => reply(e.into(), ReplyData::None),
            }
        }
    }

    if cmd.flags & REQUEST_TRIGGER != 0 {
        session.set_trigger(false);
    }
    if cmd.flags & DISCONNECT != 0 {
        session.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::checksum;
    use crate::hal::{NullDiagnostics, TransportEvent};
    use crate::testutil::{
        tag_iq_events, FlagCancel, RecordingRadio, RecordingTrace, ScriptedTransport, TestClock,
    };

    type TestSession = Session<
        ScriptedTransport,
        RecordingRadio,
        TestClock,
        RecordingTrace,
        NullDiagnostics,
        FlagCancel,
    >;

    const ATQB: [u8; 14] = [
        0x50, 0x82, 0x0D, 0xE1, 0x74, 0x20, 0x38, 0x19, 0x22, 0x00, 0x21, 0x85, 0x5E, 0xD7,
    ];

    fn session_with(scripts: Vec<Vec<TransportEvent>>) -> TestSession {
        let mut transport = ScriptedTransport::new();
        for s in scripts {
            transport.push_script(s);
        }
        Session::new(Channel::new(
            transport,
            RecordingRadio::new(),
            TestClock::new(),
            RecordingTrace::new(),
            NullDiagnostics,
            FlagCancel::new(),
        ))
    }

    fn framed_events(payload: &[u8]) -> Vec<TransportEvent> {
        tag_iq_events(&checksum::framed(CrcKind::Iso14443b, payload).unwrap())
    }

    fn run(session: &mut TestSession, cmd: &RawCommand) -> Vec<(Status, ReplyData)> {
        let mut replies = Vec::new();
        process(session, cmd, |status, data| replies.push((status, data)));
        replies
    }

    fn command(flags: u16, data: &[u8]) -> RawCommand {
        let mut cmd = RawCommand::default();
        cmd.flags = flags;
        cmd.data.extend_from_slice(data).unwrap();
        cmd
    }

    #[test]
    fn connect_select_exchange_disconnect() {
        let mut session = session_with(vec![
            tag_iq_events(&ATQB),
            framed_events(&[0x01]),             // ATTRIB answer
            framed_events(&[0x02, 0x90, 0x00]), // I-block answer
        ]);
        let cmd = command(CONNECT | SELECT_STD | APDU | DISCONNECT, &[0x00, 0xA4]);
        let replies = run(&mut session, &cmd);

        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].0, Status::Success);
        assert!(matches!(replies[0].1, ReplyData::Select(card) if card.uid_len == 4));
        assert_eq!(replies[1].0, Status::Success);
        assert!(
            matches!(&replies[1].1, ReplyData::Apdu(resp) if resp.response_byte == 0x02)
        );
        assert!(!session.is_connected());
    }

    #[test]
    fn failed_selection_stops_the_chain() {
        let mut session = session_with(vec![]);
        let mut cmd = command(
            CONNECT | SET_TIMEOUT | SELECT_STD | APDU | DISCONNECT,
            &[0x00],
        );
        cmd.timeout_etu = 64;
        let replies = run(&mut session, &cmd);

        // one reply for the failed select, none for the skipped exchange
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0], (Status::Timeout, ReplyData::None));
        // the disconnect request survives the failure
        assert!(!session.is_connected());
    }

    #[test]
    fn exchange_without_field_reports_field_off() {
        let mut session = session_with(vec![]);
        let replies = run(&mut session, &command(RAW, &[0x05, 0x00, 0x00]));
        assert_eq!(replies, vec![(Status::FieldOff, ReplyData::None)]);
    }

    #[test]
    fn raw_exchange_with_crc() {
        let mut session = session_with(vec![framed_events(&[0x11, 0x22])]);
        let cmd = command(CONNECT | RAW | APPEND_CRC, &[0x05, 0x00, 0x08]);
        let replies = run(&mut session, &cmd);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].0, Status::Success);
        assert!(matches!(&replies[0].1, ReplyData::Bytes(b) if b.len() == 4));
        // the command went out with its checksum attached
        let sent = &session.channel_mut().trace.records[0].1;
        assert_eq!(&sent[..], &[0x05, 0x00, 0x08, 0x39, 0x73]);
    }

    #[test]
    fn trace_clearing_and_trigger_flags() {
        let mut session = session_with(vec![]);
        let replies = run(&mut session, &command(CONNECT | CLEAR_TRACE, &[]));
        assert!(replies.is_empty());
        assert_eq!(session.channel_mut().trace.cleared, 1);
        assert!(session.is_connected());
    }
}
