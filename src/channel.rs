//! Frame transport: framed bytes over the half-duplex channel.
//!
//! [`Channel`] owns the hardware seams and turns them into four verbs:
//! send a reader frame, receive a tag frame, receive a reader command,
//! send a tag frame. It is responsible for everything the decoders and the
//! link layer are not: guard times, transmit scheduling, timestamps, the
//! receive timeout and cooperative cancellation.
//!
//! The receive loops poll the transport without blocking and do their
//! housekeeping (watchdog kick, cancellation check) once per ring-buffer
//! wrap, so a stuck card cannot wedge the device.

use log::debug;

use crate::consts::{
    etu_to_ticks, DEADTIME_PICC_TO_PCD, EOF_LOW_ETUS, SOF_HIGH_ETUS, SOF_LOW_ETUS,
    TAG_OVERSAMPLE, TAG_REPLY_GUARD_US, TICKS_PER_ETU, TR0_TICKS, us_to_ticks,
};
use crate::demod::{DemodState, TagDemod};
use crate::encode;
use crate::error::Error;
use crate::hal::{
    CancelToken, Diagnostics, Direction, Indicator, Radio, RadioMode, Sample, SampleTransport,
    TickClock, TraceSink, TransportEvent,
};
use crate::uart::ReaderUart;

/// Ticks between a frame ending on the air and its last sample reaching
/// the poll loop.
const RECEIVE_ARM_DELAY_TICKS: u32 = 32;

/// Start and end timestamps of a frame, in ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTiming {
    /// First symbol on the air.
    pub start: u32,
    /// Last symbol on the air.
    pub end: u32,
}

/// The half-duplex frame channel over one set of hardware seams.
pub struct Channel<T, R, C, S, D, A> {
    /// Demodulated sample stream.
    pub transport: T,
    /// Carrier and modulator.
    pub radio: R,
    /// Tick counter.
    pub clock: C,
    /// Protocol trace.
    pub trace: S,
    /// Indicators and watchdog.
    pub diag: D,
    /// Cancellation input.
    pub cancel: A,
}

impl<T, R, C, S, D, A> Channel<T, R, C, S, D, A>
where
    T: SampleTransport,
    R: Radio,
    C: TickClock,
    S: TraceSink,
    D: Diagnostics,
    A: CancelToken,
{
    /// Bundles the seams into a channel.
    pub fn new(transport: T, radio: R, clock: C, trace: S, diag: D, cancel: A) -> Self {
        Self {
            transport,
            radio,
            clock,
            trace,
            diag,
            cancel,
        }
    }

    /// Encodes and transmits one reader-to-tag frame.
    ///
    /// The frame is scheduled no earlier than `earliest_start` and never
    /// inside the TR0 guard; the start is aligned down to a 16-tick
    /// boundary so consecutive frames keep the bit grid. If the requested
    /// slot has already passed, the frame goes out at the next boundary.
    pub fn send_reader_frame(
        &mut self,
        cmd: &[u8],
        framed: bool,
        earliest_start: u32,
    ) -> Result<FrameTiming, Error> {
        let symbols = encode::reader_frame(cmd, framed)?;
        self.radio.set_mode(RadioMode::ReaderTransmit);
        let mut start = earliest_start.max(TR0_TICKS) & !0xF;
        if self.clock.now() > start {
            start = (self.clock.now() + TICKS_PER_ETU) & !0xF;
        }
        self.clock.wait_until(start);
        self.diag.indicate(Indicator::Transmitting, true);
        self.radio.transmit(&symbols);
        self.diag.indicate(Indicator::Transmitting, false);
        let end = start.wrapping_add(etu_to_ticks(symbols.len() as u32));
        self.trace.record(Direction::ReaderToTag, cmd, start, end);
        Ok(FrameTiming { start, end })
    }

    /// Listens for one tag-to-reader frame.
    ///
    /// `timeout` ticks of silence end the wait with [`Error::Timeout`];
    /// once the demodulator has locked onto a candidate frame the timeout
    /// no longer applies, subcarrier loss ends the frame instead. The
    /// assembled bytes stay readable in `demod` until it is fed again.
    ///
    /// Returns the byte count and the end-of-frame timestamp.
    pub fn receive_tag_frame(
        &mut self,
        demod: &mut TagDemod,
        timeout: u32,
    ) -> Result<(usize, u32), Error> {
        demod.reset();
        self.radio.set_mode(RadioMode::ReaderReceive);
        self.transport.start();
        let listen_start = self.clock.now();
        let eof;
        loop {
            match self.transport.poll() {
                Ok(TransportEvent::Sample(Sample::Iq(iq))) => {
                    if demod.feed(iq.i, iq.q) {
                        eof = self.clock.now().wrapping_sub(RECEIVE_ARM_DELAY_TICKS);
                        break;
                    }
                }
                Ok(TransportEvent::Sample(Sample::Bits(_))) => {
                    // wrong front-end mode, nothing to decode
                }
                Ok(TransportEvent::Wrapped) => {
                    self.diag.heartbeat();
                    if self.cancel.is_cancelled() {
                        self.transport.stop();
                        return Err(Error::Aborted);
                    }
                }
                Err(nb::Error::WouldBlock) => {}
            }
            if demod.state() == DemodState::Unsynced
                && self.clock.elapsed_since(listen_start) > timeout
            {
                self.transport.stop();
                return Err(Error::Timeout);
            }
        }
        self.transport.stop();
        if demod.overflowed() {
            return Err(Error::Overflow);
        }
        let len = demod.len();
        if len > 0 {
            let frame_etu = (len * 10 + SOF_LOW_ETUS + SOF_HIGH_ETUS + EOF_LOW_ETUS) as u32;
            let sof = eof.wrapping_sub(etu_to_ticks(frame_etu));
            self.trace.record(Direction::TagToReader, demod.frame(), sof, eof);
        }
        Ok((len, eof.wrapping_sub(DEADTIME_PICC_TO_PCD)))
    }

    /// Listens for one reader-to-tag command (tag role).
    ///
    /// Blocks until a frame decodes; there is no timeout in this
    /// direction, a simulated tag waits as long as the reader keeps the
    /// field up. Cancellation is honoured once per buffer wrap.
    pub fn receive_reader_command(&mut self, uart: &mut ReaderUart) -> Result<usize, Error> {
        uart.reset();
        self.radio.set_mode(RadioMode::TagReceive);
        self.transport.start();
        loop {
            match self.transport.poll() {
                Ok(TransportEvent::Sample(Sample::Bits(levels))) => {
                    for shift in (0..8).rev() {
                        if uart.feed(levels & (1 << shift) != 0) {
                            self.transport.stop();
                            self.diag.indicate(Indicator::FrameSync, true);
                            self.trace.record(Direction::ReaderToTag, uart.frame(), 0, 0);
                            return Ok(uart.frame().len());
                        }
                    }
                    if uart.overflowed() {
                        self.transport.stop();
                        return Err(Error::Overflow);
                    }
                }
                Ok(TransportEvent::Sample(Sample::Iq(_))) => {}
                Ok(TransportEvent::Wrapped) => {
                    self.diag.heartbeat();
                    if self.cancel.is_cancelled() {
                        self.transport.stop();
                        return Err(Error::Aborted);
                    }
                }
                Err(nb::Error::WouldBlock) => {}
            }
        }
    }

    /// Encodes and transmits one tag-to-reader response after the TR0
    /// reply guard.
    pub fn send_tag_frame(&mut self, resp: &[u8]) -> Result<(), Error> {
        let symbols = encode::tag_frame(resp)?;
        let guard_end = self.clock.now().wrapping_add(us_to_ticks(TAG_REPLY_GUARD_US));
        self.clock.wait_until(guard_end);
        self.radio.set_mode(RadioMode::TagTransmit);
        self.diag.indicate(Indicator::Transmitting, true);
        self.radio.transmit(&symbols);
        self.diag.indicate(Indicator::Transmitting, false);
        let end = self
            .clock
            .now()
            .wrapping_add(etu_to_ticks((symbols.len() / TAG_OVERSAMPLE) as u32));
        self.trace.record(Direction::TagToReader, resp, guard_end, end);
        self.diag.indicate(Indicator::FrameSync, false);
        debug!("tag response sent, {} bytes", resp.len());
        Ok(())
    }
}
