//! Type B tag simulation.
//!
//! [`TagSim`] answers a reader's selection dialogue the way a simple ISO
//! 14443-3 B card does: ATQB to REQB/WUPB, an OK answer to ATTRIB and
//! HLTB, silence to everything else. The activation state machine is pure
//! ([`TagSim::transition`]) and separately testable; the run loop wires it
//! to the channel, gates it on field presence and stops on cancellation.

use log::{debug, info};

use crate::channel::Channel;
use crate::checksum::{self, CrcKind};
use crate::error::Error;
use crate::hal::{CancelToken, Diagnostics, Radio, RadioMode, SampleTransport, TickClock, TraceSink};
use crate::uart::ReaderUart;

/// ATQB sent when no PUPI override is given: PUPI 820de174, 32-byte
/// frames, FWI 8, checksum included.
pub const DEFAULT_ATQB: [u8; 14] = [
    0x50, 0x82, 0x0D, 0xE1, 0x74, 0x20, 0x38, 0x19, 0x22, 0x00, 0x21, 0x85, 0x5E, 0xD7,
];

/// Answer to ATTRIB and HLTB.
pub const OK_RESPONSE: [u8; 3] = [0x00, 0x78, 0xF0];

/// Activation states of the simulated card.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimState {
    /// No carrier field.
    PowerOff,
    /// Powered, not yet addressed.
    Idle,
    /// Answered a REQB or WUPB.
    Ready,
    /// Selected by ATTRIB.
    Active,
    /// Halted, only WUPB wakes it.
    Halt,
}

/// Reader commands the simulated card understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimCommand {
    /// WUPB (REQB with the wake-up flag).
    Wupb,
    /// REQB.
    Reqb,
    /// HLTB.
    Hltb,
    /// ATTRIB.
    Attrib,
    /// Anything else, ignored.
    Unknown,
}

/// What the state machine wants sent back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimReply {
    /// Stay silent.
    None,
    /// Send the ATQB.
    Atqb,
    /// Send [`OK_RESPONSE`].
    Ok,
}

/// Builds the ATQB for a PUPI. An all-zero PUPI keeps the default; any
/// other value is patched in and the checksum refreshed.
pub fn atqb_for(pupi: [u8; 4]) -> [u8; 14] {
    let mut atqb = DEFAULT_ATQB;
    if pupi != [0u8; 4] {
        atqb[1..5].copy_from_slice(&pupi);
        let crc = checksum::compute(CrcKind::Iso14443b, &atqb[..12]);
        atqb[12] = (crc & 0xFF) as u8;
        atqb[13] = (crc >> 8) as u8;
    }
    atqb
}

/// Classifies a received reader frame by opcode and length. The checksum
/// is not verified, a real card in a noisy field answers on shape alone.
pub fn classify(frame: &[u8]) -> SimCommand {
    match frame {
        [0x05, _, p2, _, _] if p2 & 0x08 != 0 => SimCommand::Wupb,
        [0x05, _, _, _, _] => SimCommand::Reqb,
        [0x50, _, _, _, _, _, _] => SimCommand::Hltb,
        [0x1D, ..] if frame.len() == 11 => SimCommand::Attrib,
        _ => SimCommand::Unknown,
    }
}

/// A simulated Type B tag bound to one channel.
pub struct TagSim<T, R, C, S, D, A> {
    ch: Channel<T, R, C, S, D, A>,
    uart: ReaderUart,
    state: SimState,
    atqb: [u8; 14],
}

impl<T, R, C, S, D, A> TagSim<T, R, C, S, D, A>
where
    T: SampleTransport,
    R: Radio,
    C: TickClock,
    S: TraceSink,
    D: Diagnostics,
    A: CancelToken,
{
    /// Creates a simulated tag announcing `pupi` (all-zero keeps the
    /// default PUPI).
    pub fn new(ch: Channel<T, R, C, S, D, A>, pupi: [u8; 4]) -> Self {
        Self {
            ch,
            uart: ReaderUart::new(),
            state: SimState::PowerOff,
            atqb: atqb_for(pupi),
        }
    }

    /// Current activation state.
    pub fn state(&self) -> SimState {
        self.state
    }

    /// The underlying channel.
    pub fn channel_mut(&mut self) -> &mut Channel<T, R, C, S, D, A> {
        &mut self.ch
    }

    /// The activation state machine, one step per received command.
    pub fn transition(state: SimState, cmd: SimCommand) -> (SimState, SimReply) {
        match (state, cmd) {
            // WUPB wakes a halted card, REQB does not
            (SimState::Active, SimCommand::Wupb) => (SimState::Active, SimReply::Atqb),
            (_, SimCommand::Wupb) => (SimState::Ready, SimReply::Atqb),
            (SimState::Halt, SimCommand::Reqb) => (SimState::Halt, SimReply::None),
            (SimState::Active, SimCommand::Reqb) => (SimState::Active, SimReply::Atqb),
            (_, SimCommand::Reqb) => (SimState::Ready, SimReply::Atqb),
            (SimState::Halt, SimCommand::Hltb) => (SimState::Halt, SimReply::None),
            (SimState::Ready, SimCommand::Hltb) => (SimState::Halt, SimReply::Ok),
            (s, SimCommand::Hltb) => (s, SimReply::Ok),
            (SimState::Halt, SimCommand::Attrib) => (SimState::Halt, SimReply::None),
            (SimState::Ready, SimCommand::Attrib) => (SimState::Active, SimReply::Ok),
            (s, SimCommand::Attrib) => (s, SimReply::Ok),
            (s, SimCommand::Unknown) => (s, SimReply::None),
        }
    }

    /// Runs the simulation until cancelled. Returns the number of reader
    /// commands seen, recognised or not.
    pub fn run(&mut self) -> Result<u32, Error> {
        self.ch.radio.set_mode(RadioMode::TagReceive);
        self.state = SimState::PowerOff;
        let mut commands: u32 = 0;
        loop {
            if self.ch.cancel.is_cancelled() {
                break;
            }
            // card logic is powered by the reader's field
            if !self.ch.radio.field_present() {
                self.state = SimState::PowerOff;
                continue;
            }
            if self.state == SimState::PowerOff {
                self.state = SimState::Idle;
                debug!("field present, card powered");
            }

            match self.ch.receive_reader_command(&mut self.uart) {
                Ok(_) => {}
                Err(Error::Aborted) => break,
                // an overlong frame is the reader's problem, keep listening
                Err(Error::Overflow) => continue,
                Err(e) => return Err(e),
            }
            commands += 1;

            let cmd = classify(self.uart.frame());
            let (next, reply) = Self::transition(self.state, cmd);
            debug!("{:?} in {:?} -> {:?}", cmd, self.state, next);
            self.state = next;
            match reply {
                SimReply::Atqb => self.ch.send_tag_frame(&self.atqb)?,
                SimReply::Ok => self.ch.send_tag_frame(&OK_RESPONSE)?,
                SimReply::None => {}
            }
        }
        info!("simulation stopped after {} reader commands", commands);
        Ok(commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{NullDiagnostics, TransportEvent};
    use crate::testutil::{
        reader_bit_events, CountdownCancel, RecordingRadio, RecordingTrace, ScriptedTransport,
        TestClock,
    };

    type TestSim = TagSim<
        ScriptedTransport,
        RecordingRadio,
        TestClock,
        RecordingTrace,
        NullDiagnostics,
        CountdownCancel,
    >;

    const WUPB: [u8; 5] = [0x05, 0x00, 0x08, 0x39, 0x73];
    const REQB: [u8; 5] = [0x05, 0x00, 0x00, 0x71, 0xFF];
    const HLTB: [u8; 7] = [0x50, 0x82, 0x0D, 0xE1, 0x74, 0xB9, 0x91];
    const ATTRIB: [u8; 11] = [
        0x1D, 0x82, 0x0D, 0xE1, 0x74, 0x00, 0x08, 0x01, 0x00, 0x1A, 0x2B,
    ];

    fn step(state: SimState, cmd: SimCommand) -> (SimState, SimReply) {
        TestSim::transition(state, cmd)
    }

    #[test]
    fn classification_by_shape() {
        assert_eq!(classify(&WUPB), SimCommand::Wupb);
        assert_eq!(classify(&REQB), SimCommand::Reqb);
        assert_eq!(classify(&HLTB), SimCommand::Hltb);
        assert_eq!(classify(&ATTRIB), SimCommand::Attrib);
        assert_eq!(classify(&[0x05, 0x00, 0x00]), SimCommand::Unknown);
        assert_eq!(classify(&[0xB2]), SimCommand::Unknown);
    }

    #[test]
    fn activation_walk() {
        let (s, r) = step(SimState::Idle, SimCommand::Reqb);
        assert_eq!((s, r), (SimState::Ready, SimReply::Atqb));
        let (s, r) = step(s, SimCommand::Attrib);
        assert_eq!((s, r), (SimState::Active, SimReply::Ok));
        // a selected card still answers polling
        let (s, r) = step(s, SimCommand::Reqb);
        assert_eq!((s, r), (SimState::Active, SimReply::Atqb));
    }

    #[test]
    fn halt_only_wakes_on_wupb() {
        let (s, r) = step(SimState::Ready, SimCommand::Hltb);
        assert_eq!((s, r), (SimState::Halt, SimReply::Ok));
        assert_eq!(
            step(SimState::Halt, SimCommand::Reqb),
            (SimState::Halt, SimReply::None)
        );
        assert_eq!(
            step(SimState::Halt, SimCommand::Attrib),
            (SimState::Halt, SimReply::None)
        );
        assert_eq!(
            step(SimState::Halt, SimCommand::Wupb),
            (SimState::Ready, SimReply::Atqb)
        );
    }

    #[test]
    fn unknown_commands_are_ignored() {
        for state in [SimState::Idle, SimState::Ready, SimState::Active, SimState::Halt] {
            assert_eq!(step(state, SimCommand::Unknown), (state, SimReply::None));
        }
    }

    #[test]
    fn atqb_pupi_patching() {
        assert_eq!(atqb_for([0u8; 4]), DEFAULT_ATQB);
        let patched = atqb_for([0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(&patched[1..5], &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(checksum::verify(CrcKind::Iso14443b, &patched));
    }

    #[test]
    fn run_answers_selection_dialogue() {
        let mut transport = ScriptedTransport::new();
        transport.push_script(reader_bit_events(&WUPB, true));
        transport.push_script(reader_bit_events(&ATTRIB, true));
        transport.push_script(vec![TransportEvent::Wrapped; 4]);
        let ch = Channel::new(
            transport,
            RecordingRadio::new(),
            TestClock::new(),
            RecordingTrace::new(),
            NullDiagnostics,
            // two clean loop passes, then stop at the next buffer wrap
            CountdownCancel::after(3),
        );
        let mut sim = TagSim::new(ch, [0u8; 4]);
        let commands = sim.run().unwrap();
        assert_eq!(commands, 2);
        assert_eq!(sim.state(), SimState::Active);

        let trace = &sim.ch.trace.records;
        assert_eq!(trace.len(), 4);
        assert_eq!(&trace[0].1[..], &WUPB);
        assert_eq!(&trace[1].1[..], &DEFAULT_ATQB);
        assert_eq!(&trace[2].1[..], &ATTRIB);
        assert_eq!(&trace[3].1[..], &OK_RESPONSE);
    }

    #[test]
    fn field_loss_powers_the_card_off() {
        let ch = Channel::new(
            ScriptedTransport::new(),
            RecordingRadio::new(),
            TestClock::new(),
            RecordingTrace::new(),
            NullDiagnostics,
            CountdownCancel::after(2),
        );
        let mut sim = TagSim::new(ch, [0u8; 4]);
        sim.channel_mut().radio.field_present = false;
        let commands = sim.run().unwrap();
        assert_eq!(commands, 0);
        assert_eq!(sim.state(), SimState::PowerOff);
    }
}
