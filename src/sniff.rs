//! Passive eavesdropping of a reader/card dialogue.
//!
//! In sniff mode the front end delivers I/Q pairs that carry both
//! directions at once: the reader's ASK modulation is hard-sliced into the
//! least significant bit of each component, the tag's subcarrier rides the
//! upper bits. [`Sniffer`] runs both decoders over the same stream and
//! gates each on the other, a tag answer must not retrigger the reader
//! decoder and vice versa.
//!
//! Timestamps are derived from the sample counter, 16 ticks per half-ETU
//! pair, so traces line up with reader-role captures.

use log::{debug, info};

use crate::channel::Channel;
use crate::consts::{etu_to_ticks, EOF_LOW_ETUS, SOF_HIGH_ETUS, SOF_LOW_ETUS, TICKS_PER_ETU};
use crate::demod::{DemodState, TagDemod};
use crate::error::Error;
use crate::hal::{
    CancelToken, Diagnostics, Direction, IqPair, Radio, RadioMode, Sample, SampleTransport,
    TickClock, TraceSink, TransportEvent,
};
use crate::uart::{ReaderUart, UartState};

/// Frame counts gathered over one sniffing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SniffStats {
    /// Reader-to-tag frames captured.
    pub reader_frames: u32,
    /// Tag-to-reader frames captured.
    pub tag_frames: u32,
    /// Reader-to-tag bytes captured.
    pub reader_bytes: u32,
    /// Tag-to-reader bytes captured.
    pub tag_bytes: u32,
}

/// Passive dual-decoder capture over one channel.
pub struct Sniffer<T, R, C, S, D, A> {
    ch: Channel<T, R, C, S, D, A>,
    uart: ReaderUart,
    demod: TagDemod,
    /// A reader frame completed and its answer has not yet.
    expect_tag_answer: bool,
    /// The tag decoder is inside a frame body.
    tag_is_active: bool,
    samples: u32,
    stats: SniffStats,
}

impl<T, R, C, S, D, A> Sniffer<T, R, C, S, D, A>
where
    T: SampleTransport,
    R: Radio,
    C: TickClock,
    S: TraceSink,
    D: Diagnostics,
    A: CancelToken,
{
    /// Wraps a channel into an idle sniffer.
    pub fn new(ch: Channel<T, R, C, S, D, A>) -> Self {
        Self {
            ch,
            uart: ReaderUart::new(),
            demod: TagDemod::new(),
            expect_tag_answer: false,
            tag_is_active: false,
            samples: 0,
            stats: SniffStats::default(),
        }
    }

    /// Counts gathered so far.
    pub fn stats(&self) -> SniffStats {
        self.stats
    }

    /// The underlying channel.
    pub fn channel_mut(&mut self) -> &mut Channel<T, R, C, S, D, A> {
        &mut self.ch
    }

    /// Tick timestamp of the most recently consumed sample.
    fn now_ticks(&self) -> u32 {
        self.samples.wrapping_mul(TICKS_PER_ETU / 2)
    }

    fn record_reader_frame(&mut self) {
        let end = self.now_ticks();
        let frame_etu = (self.uart.frame().len() * 10 + SOF_LOW_ETUS + SOF_HIGH_ETUS
            + EOF_LOW_ETUS) as u32;
        let sof = end.wrapping_sub(etu_to_ticks(frame_etu));
        self.ch
            .trace
            .record(Direction::ReaderToTag, self.uart.frame(), sof, end);
        self.stats.reader_frames += 1;
        self.stats.reader_bytes += self.uart.frame().len() as u32;
        self.uart.reset();
        self.demod.reset();
        self.expect_tag_answer = true;
    }

    fn record_tag_frame(&mut self) {
        let end = self.now_ticks();
        let frame_etu = (self.demod.len() * 10 + SOF_LOW_ETUS + SOF_HIGH_ETUS + EOF_LOW_ETUS)
            as u32;
        let sof = end.wrapping_sub(etu_to_ticks(frame_etu));
        self.ch
            .trace
            .record(Direction::TagToReader, self.demod.frame(), sof, end);
        self.stats.tag_frames += 1;
        self.stats.tag_bytes += self.demod.len() as u32;
        self.uart.reset();
        self.demod.reset();
        self.expect_tag_answer = false;
        self.tag_is_active = false;
    }

    /// Consumes one sniff-mode sample pair.
    fn feed_iq(&mut self, iq: IqPair) {
        self.samples = self.samples.wrapping_add(1);

        let mut reader_is_active = false;
        if !self.tag_is_active {
            for level in [iq.i & 1 != 0, iq.q & 1 != 0] {
                if self.uart.feed(level) {
                    self.record_reader_frame();
                    break;
                }
            }
            reader_is_active = self.uart.state() > UartState::GotSofFallingEdge;
        }

        if !reader_is_active && self.expect_tag_answer {
            // halve to make room for the reader bit in the LSB
            if self.demod.feed(iq.i / 2, iq.q / 2) {
                self.record_tag_frame();
            } else {
                self.tag_is_active = self.demod.state() > DemodState::WaitForSofRisingEdge;
            }
        }
    }

    /// Captures until cancelled. Frames land in the trace sink as they
    /// complete; returns the final counts.
    pub fn run(&mut self) -> Result<SniffStats, Error> {
        self.ch.radio.set_mode(RadioMode::Sniff);
        self.uart.reset();
        self.demod.reset();
        self.expect_tag_answer = false;
        self.tag_is_active = false;
        self.samples = 0;
        self.stats = SniffStats::default();
        self.ch.transport.start();
        loop {
            match self.ch.transport.poll() {
                Ok(TransportEvent::Sample(Sample::Iq(iq))) => self.feed_iq(iq),
                Ok(TransportEvent::Sample(Sample::Bits(_))) => {}
                Ok(TransportEvent::Wrapped) => {
                    self.ch.diag.heartbeat();
                    if self.ch.cancel.is_cancelled() {
                        break;
                    }
                }
                Err(nb::Error::WouldBlock) => {}
            }
        }
        self.ch.transport.stop();
        info!(
            "sniff done: {} reader frames ({} bytes), {} tag frames ({} bytes)",
            self.stats.reader_frames,
            self.stats.reader_bytes,
            self.stats.tag_frames,
            self.stats.tag_bytes
        );
        debug!(
            "decoders at exit: uart {:?}, demod {:?}, {} samples",
            self.uart.state(),
            self.demod.state(),
            self.samples
        );
        Ok(self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode;
    use crate::hal::NullDiagnostics;
    use crate::testutil::{
        FlagCancel, RecordingRadio, RecordingTrace, ScriptedTransport, TestClock,
    };

    const WUPB: [u8; 5] = [0x05, 0x00, 0x08, 0x39, 0x73];
    const ATQB: [u8; 14] = [
        0x50, 0x82, 0x0D, 0xE1, 0x74, 0x20, 0x38, 0x19, 0x22, 0x00, 0x21, 0x85, 0x5E, 0xD7,
    ];

    /// Sniff-mode samples for a reader frame: the hard-sliced line level
    /// sits in the LSB of both components, two quarter-periods per pair.
    fn reader_sniff_events(bytes: &[u8]) -> Vec<TransportEvent> {
        let symbols = encode::reader_frame(bytes, true).unwrap();
        let mut levels = Vec::new();
        for s in symbols.iter() {
            for _ in 0..4 {
                levels.push(s as i8);
            }
        }
        levels
            .chunks(2)
            .map(|pair| {
                TransportEvent::Sample(Sample::Iq(IqPair {
                    i: pair[0],
                    q: pair[1],
                }))
            })
            .collect()
    }

    /// Sniff-mode samples for a tag frame: subcarrier in the upper bits,
    /// reader LSB idle-low.
    fn tag_sniff_events(bytes: &[u8]) -> Vec<TransportEvent> {
        let symbols = encode::tag_frame(bytes).unwrap();
        symbols
            .iter()
            .enumerate()
            .filter(|(idx, _)| idx % 2 == 0)
            .map(|(_, high)| {
                let iq = if high {
                    IqPair { i: 40, q: 20 }
                } else {
                    IqPair { i: -40, q: -20 }
                };
                TransportEvent::Sample(Sample::Iq(iq))
            })
            .collect()
    }

    fn sniffer(transport: ScriptedTransport, cancel: FlagCancel) -> Sniffer<
        ScriptedTransport,
        RecordingRadio,
        TestClock,
        RecordingTrace,
        NullDiagnostics,
        FlagCancel,
    > {
        Sniffer::new(Channel::new(
            transport,
            RecordingRadio::new(),
            TestClock::new(),
            RecordingTrace::new(),
            NullDiagnostics,
            cancel,
        ))
    }

    #[test]
    fn captures_both_directions_in_order() {
        let mut script = reader_sniff_events(&WUPB);
        script.extend(tag_sniff_events(&ATQB));
        script.push(TransportEvent::Wrapped);
        let mut transport = ScriptedTransport::new();
        transport.push_script(script);
        let cancel = FlagCancel::new();
        cancel.set();
        let mut sniffer = sniffer(transport, cancel);

        let stats = sniffer.run().unwrap();
        assert_eq!(stats.reader_frames, 1);
        assert_eq!(stats.tag_frames, 1);
        assert_eq!(stats.reader_bytes, 5);
        assert_eq!(stats.tag_bytes, 14);

        let records = &sniffer.ch.trace.records;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].0, Direction::ReaderToTag);
        assert_eq!(&records[0].1[..], &WUPB);
        assert_eq!(records[1].0, Direction::TagToReader);
        assert_eq!(&records[1].1[..], &ATQB);
        // timestamps come from the sample counter and must be ordered
        assert!(records[0].3 <= records[1].3);
    }

    #[test]
    fn unanswered_tag_signal_is_not_captured() {
        // subcarrier activity with no preceding reader frame
        let mut script = tag_sniff_events(&ATQB);
        script.push(TransportEvent::Wrapped);
        let mut transport = ScriptedTransport::new();
        transport.push_script(script);
        let cancel = FlagCancel::new();
        cancel.set();
        let mut sniffer = sniffer(transport, cancel);

        let stats = sniffer.run().unwrap();
        assert_eq!(stats.tag_frames, 0);
        assert!(sniffer.ch.trace.records.is_empty());
    }

    #[test]
    fn one_answer_per_reader_frame() {
        // two tag frames but only one reader frame between them
        let mut script = reader_sniff_events(&WUPB);
        script.extend(tag_sniff_events(&ATQB));
        script.extend(tag_sniff_events(&ATQB));
        script.push(TransportEvent::Wrapped);
        let mut transport = ScriptedTransport::new();
        transport.push_script(script);
        let cancel = FlagCancel::new();
        cancel.set();
        let mut sniffer = sniffer(transport, cancel);

        let stats = sniffer.run().unwrap();
        assert_eq!(stats.reader_frames, 1);
        assert_eq!(stats.tag_frames, 1);
    }
}
