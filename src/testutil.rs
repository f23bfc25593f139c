//! Scripted seam implementations shared by the unit tests.

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::vec::Vec;

use crate::encode;
use crate::hal::{
    CancelToken, Direction, IqPair, Radio, RadioMode, Sample, SampleTransport, TickClock,
    TraceSink, TransportEvent,
};

/// Transport that replays prepared event scripts, one per `start()` call,
/// and reports `WouldBlock` once the current script runs dry.
pub struct ScriptedTransport {
    scripts: VecDeque<Vec<TransportEvent>>,
    current: VecDeque<TransportEvent>,
    pub started: u32,
    pub stopped: u32,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            scripts: VecDeque::new(),
            current: VecDeque::new(),
            started: 0,
            stopped: 0,
        }
    }

    pub fn push_script(&mut self, events: Vec<TransportEvent>) {
        self.scripts.push_back(events);
    }
}

impl SampleTransport for ScriptedTransport {
    fn start(&mut self) {
        self.started += 1;
        // re-arming discards whatever the previous window left behind
        self.current = self
            .scripts
            .pop_front()
            .map(Into::into)
            .unwrap_or_default();
    }

    fn stop(&mut self) {
        self.stopped += 1;
    }

    fn poll(&mut self) -> nb::Result<TransportEvent, core::convert::Infallible> {
        self.current.pop_front().ok_or(nb::Error::WouldBlock)
    }
}

/// Clock that advances a fixed step on every read, so busy-waits and
/// timeout loops terminate deterministically.
pub struct TestClock {
    now: u32,
    step: u32,
}

impl TestClock {
    pub fn new() -> Self {
        Self { now: 0, step: 16 }
    }
}

impl TickClock for TestClock {
    fn now(&mut self) -> u32 {
        self.now = self.now.wrapping_add(self.step);
        self.now
    }
}

/// Radio that records every mode change and transmitted symbol run.
pub struct RecordingRadio {
    pub modes: Vec<RadioMode>,
    pub frames: Vec<Vec<bool>>,
    pub field: bool,
    pub field_present: bool,
}

impl RecordingRadio {
    pub fn new() -> Self {
        Self {
            modes: Vec::new(),
            frames: Vec::new(),
            field: false,
            field_present: true,
        }
    }
}

impl Radio for RecordingRadio {
    fn set_mode(&mut self, mode: RadioMode) {
        self.modes.push(mode);
    }

    fn field_on(&mut self) {
        self.field = true;
    }

    fn field_off(&mut self) {
        self.field = false;
    }

    fn field_present(&mut self) -> bool {
        self.field_present
    }

    fn transmit(&mut self, symbols: &encode::SymbolBuffer) {
        self.frames.push(symbols.iter().collect());
    }
}

/// Trace sink that keeps everything.
pub struct RecordingTrace {
    pub records: Vec<(Direction, Vec<u8>, u32, u32)>,
    pub cleared: u32,
}

impl RecordingTrace {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            cleared: 0,
        }
    }
}

impl TraceSink for RecordingTrace {
    fn record(&mut self, dir: Direction, frame: &[u8], start: u32, end: u32) {
        self.records.push((dir, frame.to_vec(), start, end));
    }

    fn clear(&mut self) {
        self.cleared += 1;
        self.records.clear();
    }
}

/// Shared cancellation flag.
#[derive(Clone)]
pub struct FlagCancel(Rc<Cell<bool>>);

impl FlagCancel {
    pub fn new() -> Self {
        Self(Rc::new(Cell::new(false)))
    }

    pub fn set(&self) {
        self.0.set(true);
    }
}

impl CancelToken for FlagCancel {
    fn is_cancelled(&self) -> bool {
        self.0.get()
    }
}

/// Token that reports cancelled after a fixed number of polls, so loops
/// without an external stop condition terminate in tests.
pub struct CountdownCancel(Cell<u32>);

impl CountdownCancel {
    pub fn after(polls: u32) -> Self {
        Self(Cell::new(polls))
    }
}

impl CancelToken for CountdownCancel {
    fn is_cancelled(&self) -> bool {
        let left = self.0.get();
        if left == 0 {
            true
        } else {
            self.0.set(left - 1);
            false
        }
    }
}

/// I/Q events for a complete tag response at the demodulator's cadence.
/// Logic 1 rides the reference phase (40, 20).
pub fn tag_iq_events(bytes: &[u8]) -> Vec<TransportEvent> {
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

/// A short unmodulated subcarrier burst followed by silence: energy with
/// no decodable frame.
pub fn burst_iq_events(cycles: usize) -> Vec<TransportEvent> {
    let mut out = Vec::new();
    for _ in 0..cycles {
        out.push(TransportEvent::Sample(Sample::Iq(IqPair { i: 40, q: 20 })));
    }
    for _ in 0..8 {
        out.push(TransportEvent::Sample(Sample::Iq(IqPair { i: 0, q: 0 })));
    }
    out
}

/// Hard-level events for a reader command at the tag listener's cadence:
/// quarter-ETU samples packed eight per byte, MSB first.
pub fn reader_bit_events(bytes: &[u8], framed: bool) -> Vec<TransportEvent> {
    let symbols = encode::reader_frame(bytes, framed).unwrap();
    let mut out = Vec::new();
    let mut acc = 0u8;
    let mut filled = 0;
    for high in symbols.iter() {
        for _ in 0..4 {
            acc = (acc << 1) | high as u8;
            filled += 1;
            if filled == 8 {
                out.push(TransportEvent::Sample(Sample::Bits(acc)));
                acc = 0;
                filled = 0;
            }
        }
    }
    if filled > 0 {
        // pad with idle-high so the tail cannot fake a falling edge
        let pad = 8 - filled;
        acc = (acc << pad) | ((1u16 << pad) as u8).wrapping_sub(1);
        out.push(TransportEvent::Sample(Sample::Bits(acc)));
    }
    out
}
