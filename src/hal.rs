//! Hardware seams.
//!
//! The modem core never touches registers. Everything platform-specific
//! sits behind the traits in this module:
//!
//! - [`SampleTransport`]: the demodulated sample stream (in practice a DMA
//!   ring buffer), polled non-blockingly.
//! - [`Radio`]: carrier control and symbol transmission.
//! - [`TickClock`]: the free-running 3.39 MHz tick counter used for guard
//!   times and timeouts.
//! - [`TraceSink`]: protocol trace capture.
//! - [`Diagnostics`]: indicator LEDs and the watchdog kick.
//! - [`CancelToken`]: cooperative cancellation (button press, host abort).
//!
//! `Null*` implementations are provided for the sinks a deployment does not
//! care about, and [`LedDiagnostics`] maps indicators onto `embedded-hal`
//! output pins.

use core::convert::Infallible;
use core::sync::atomic::{AtomicBool, Ordering};

use embedded_hal::digital::OutputPin;

use crate::encode::SymbolBuffer;

/// One quantised I/Q pair from the subcarrier demodulator front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IqPair {
    /// In-phase component.
    pub i: i8,
    /// Quadrature component.
    pub q: i8,
}

/// A demodulated sample, in whichever form the current radio mode yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sample {
    /// Hard line levels, packed MSB first, quarter-ETU cadence. Produced
    /// while listening for reader commands.
    Bits(u8),
    /// An I/Q pair at half-ETU cadence. Produced while listening for tag
    /// responses or sniffing.
    Iq(IqPair),
}

/// What a transport poll can yield besides a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    /// A demodulated sample.
    Sample(Sample),
    /// The ring buffer wrapped around. The receive loops use this as their
    /// once-per-buffer housekeeping point (watchdog, cancellation).
    Wrapped,
}

/// Non-blocking source of demodulated samples.
pub trait SampleTransport {
    /// Arms the stream. Samples produced before this are discarded.
    fn start(&mut self);
    /// Disarms the stream.
    fn stop(&mut self);
    /// Polls for the next event. `WouldBlock` means no sample has arrived
    /// yet; the stream itself cannot fail.
    fn poll(&mut self) -> nb::Result<TransportEvent, Infallible>;
}

/// Front-end configuration of the radio path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioMode {
    /// Carrier control only, no modulation or listening.
    Idle,
    /// Reader role, ASK-modulating the carrier.
    ReaderTransmit,
    /// Reader role, listening for the BPSK subcarrier.
    ReaderReceive,
    /// Tag role, load-modulating the subcarrier.
    TagTransmit,
    /// Tag role, listening for reader modulation.
    TagReceive,
    /// Passive observation of both directions.
    Sniff,
}

/// Carrier and modulator control.
pub trait Radio {
    /// Reconfigures the front end.
    fn set_mode(&mut self, mode: RadioMode);
    /// Energises the carrier field.
    fn field_on(&mut self);
    /// Drops the carrier field.
    fn field_off(&mut self);
    /// True when an external carrier field is present (tag role).
    fn field_present(&mut self) -> bool;
    /// Clocks a symbol buffer out through the modulator. Blocks until the
    /// last symbol has left.
    fn transmit(&mut self, symbols: &SymbolBuffer);
}

/// Free-running tick counter at 32 ticks per ETU.
pub trait TickClock {
    /// Current tick count.
    fn now(&mut self) -> u32;
    /// Ticks elapsed since `start`, tolerating wraparound.
    fn elapsed_since(&mut self, start: u32) -> u32 {
        self.now().wrapping_sub(start)
    }
    /// Busy-waits until the counter reaches `deadline`. The deadline may
    /// lie past a counter wrap, up to half the counter range ahead.
    fn wait_until(&mut self, deadline: u32) {
        while (deadline.wrapping_sub(self.now()) as i32) > 0 {}
    }
}

/// Which way a traced frame travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Reader to tag.
    ReaderToTag,
    /// Tag to reader.
    TagToReader,
}

/// Protocol trace capture.
pub trait TraceSink {
    /// Records one frame with its start and end timestamps in ticks.
    fn record(&mut self, dir: Direction, frame: &[u8], start: u32, end: u32);
    /// Discards everything recorded so far.
    fn clear(&mut self) {}
}

/// Trace sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTrace;

impl TraceSink for NullTrace {
    fn record(&mut self, _dir: Direction, _frame: &[u8], _start: u32, _end: u32) {}
}

/// Operator-visible indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indicator {
    /// The carrier field is energised.
    Field,
    /// A transmission is in flight.
    Transmitting,
    /// A frame start was recognised.
    FrameSync,
    /// Scope trigger requested by the host.
    Trigger,
}

/// Indicator and liveness side channel.
pub trait Diagnostics {
    /// Turns an indicator on or off.
    fn indicate(&mut self, which: Indicator, on: bool);
    /// Liveness kick, called once per transport buffer wrap.
    fn heartbeat(&mut self) {}
}

/// Diagnostics sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDiagnostics;

impl Diagnostics for NullDiagnostics {
    fn indicate(&mut self, _which: Indicator, _on: bool) {}
}

/// Maps the four indicators onto output pins. Any subset may be wired;
/// pin errors are ignored, an indicator is best effort by nature.
pub struct LedDiagnostics<P: OutputPin> {
    /// Field indicator pin.
    pub field: Option<P>,
    /// Transmit indicator pin.
    pub transmitting: Option<P>,
    /// Frame-sync indicator pin.
    pub frame_sync: Option<P>,
    /// Trigger output pin.
    pub trigger: Option<P>,
}

impl<P: OutputPin> LedDiagnostics<P> {
    /// Creates a diagnostics block from whatever pins are wired.
    pub fn new(
        field: Option<P>,
        transmitting: Option<P>,
        frame_sync: Option<P>,
        trigger: Option<P>,
    ) -> Self {
        Self {
            field,
            transmitting,
            frame_sync,
            trigger,
        }
    }

    fn drive(pin: &mut Option<P>, on: bool) {
        if let Some(pin) = pin {
            let _ = if on { pin.set_high() } else { pin.set_low() };
        }
    }
}

impl<P: OutputPin> Diagnostics for LedDiagnostics<P> {
    fn indicate(&mut self, which: Indicator, on: bool) {
        match which {
            Indicator::Field => Self::drive(&mut self.field, on),
            Indicator::Transmitting => Self::drive(&mut self.transmitting, on),
            Indicator::FrameSync => Self::drive(&mut self.frame_sync, on),
            Indicator::Trigger => Self::drive(&mut self.trigger, on),
        }
    }
}

/// Cooperative cancellation check.
pub trait CancelToken {
    /// True once the operation should stop at the next safe point.
    fn is_cancelled(&self) -> bool;
}

/// Token that never cancels.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverCancel;

impl CancelToken for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

impl CancelToken for AtomicBool {
    fn is_cancelled(&self) -> bool {
        self.load(Ordering::Relaxed)
    }
}

impl<T: CancelToken + ?Sized> CancelToken for &T {
    fn is_cancelled(&self) -> bool {
        (**self).is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal_mock::eh1::digital::{
        Mock as PinMock, State as PinState, Transaction as PinTransaction,
    };

    #[test]
    fn led_diagnostics_drive_wired_pins() {
        let field = PinMock::new(&[
            PinTransaction::set(PinState::High),
            PinTransaction::set(PinState::Low),
        ]);
        let mut diag = LedDiagnostics::new(Some(field), None, None, None);
        diag.indicate(Indicator::Field, true);
        diag.indicate(Indicator::Field, false);
        // unwired indicators are a no-op
        diag.indicate(Indicator::Transmitting, true);
        diag.heartbeat();
        if let Some(pin) = diag.field.as_mut() {
            pin.done();
        }
    }

    struct StepClock(u32);

    impl TickClock for StepClock {
        fn now(&mut self) -> u32 {
            self.0 = self.0.wrapping_add(8);
            self.0
        }
    }

    #[test]
    fn wait_until_crosses_counter_wrap() {
        let mut clock = StepClock(u32::MAX - 64);
        clock.wait_until(32);
        // first reading at or past the wrapped deadline ends the wait
        assert_eq!(clock.0, 39);
        assert_eq!(clock.elapsed_since(u32::MAX - 64), 112);
    }

    #[test]
    fn elapsed_since_tolerates_wrap() {
        let mut clock = StepClock(u32::MAX - 4);
        assert_eq!(clock.elapsed_since(u32::MAX - 4), 8);
    }

    #[test]
    fn atomic_cancel_token() {
        let flag = AtomicBool::new(false);
        assert!(!(&flag).is_cancelled());
        flag.store(true, Ordering::Relaxed);
        assert!((&flag).is_cancelled());
        assert!(!NeverCancel.is_cancelled());
    }
}
