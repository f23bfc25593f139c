//! Tag-signal decoder.
//!
//! Recovers tag-to-reader responses from quantised I/Q pairs sampled twice
//! per ETU. The tag answers on a BPSK-keyed subcarrier, so the decoder
//! first trains a phase reference on the unmodulated TR1 run, then treats
//! every later sample as a soft decision against that reference: positive
//! means "same phase as TR1" (logic 1), negative means flipped (logic 0).
//!
//! Framing reuses the 10-bit character machinery: the SOF low phase decodes
//! as an all-zero character group before any byte has been stored, and an
//! all-zero group after at least one byte is the EOF. Loss of subcarrier
//! mid-frame decodes as zeros too, so a dying tag yields the bytes received
//! so far instead of hanging the receiver.

use crate::consts::{MAX_FRAME_SIZE, SUBCARRIER_DETECT_THRESHOLD};

/// Decoder states, in protocol order. Anything above `WaitForSofRisingEdge`
/// means a frame body may be in flight; the sniffer keys off that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DemodState {
    /// Hunting for subcarrier energy.
    Unsynced,
    /// Accumulating the phase reference over the TR1 run.
    PhaseRefTraining,
    /// SOF low phase seen in full, waiting for the closing highs.
    WaitForSofRisingEdge,
    /// Between characters, waiting for a start bit.
    AwaitingStartBit,
    /// Shifting in the 10 bits of a character.
    ReceivingData,
}

/// Training samples required before a phase flip is trusted as an SOF.
const PHASE_REF_SAMPLES: u16 = 10;

/// BPSK demodulator for the tag-to-reader direction.
#[derive(Debug)]
pub struct TagDemod {
    state: DemodState,
    /// Half-bit sample position; unit depends on the state.
    pos_count: u16,
    sum_i: i32,
    sum_q: i32,
    this_bit: i32,
    bit_count: u8,
    shift_reg: u16,
    frame: heapless::Vec<u8, MAX_FRAME_SIZE>,
    max_len: usize,
    overflowed: bool,
}

/// Rough magnitude of an I/Q pair without a square root:
/// `max(|i|,|q|) + min(|i|,|q|) / 2`.
fn amplitude(ci: i8, cq: i8) -> i32 {
    let ai = (ci as i32).abs();
    let aq = (cq as i32).abs();
    if ai > aq { ai + aq / 2 } else { aq + ai / 2 }
}

impl Default for TagDemod {
    fn default() -> Self {
        Self::new()
    }
}

impl TagDemod {
    /// Creates a decoder accepting frames up to [`MAX_FRAME_SIZE`] bytes.
    pub fn new() -> Self {
        Self {
            state: DemodState::Unsynced,
            pos_count: 0,
            sum_i: 0,
            sum_q: 0,
            this_bit: 0,
            bit_count: 0,
            shift_reg: 0,
            frame: heapless::Vec::new(),
            max_len: MAX_FRAME_SIZE,
            overflowed: false,
        }
    }

    /// Returns to the hunting state and discards any partial frame.
    pub fn reset(&mut self) {
        self.state = DemodState::Unsynced;
        self.pos_count = 0;
        self.sum_i = 0;
        self.sum_q = 0;
        self.this_bit = 0;
        self.bit_count = 0;
        self.shift_reg = 0;
        self.frame.clear();
        self.overflowed = false;
    }

    /// Caps accepted frame length (clamped to [`MAX_FRAME_SIZE`]).
    pub fn set_max_len(&mut self, max_len: usize) {
        self.max_len = max_len.min(MAX_FRAME_SIZE);
    }

    /// Current decoder state.
    pub fn state(&self) -> DemodState {
        self.state
    }

    /// The assembled frame bytes.
    pub fn frame(&self) -> &[u8] {
        &self.frame
    }

    /// Number of assembled bytes.
    pub fn len(&self) -> usize {
        self.frame.len()
    }

    /// True if nothing has been assembled.
    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }

    /// Raw sample position counter. Deliberately kept across a resync: a
    /// nonzero value after a timed-out listen window means subcarrier
    /// energy was seen even though no frame decoded, which the
    /// anticollision slot walk uses to tell "tag in this slot" from
    /// silence.
    pub fn pos_count(&self) -> u16 {
        self.pos_count
    }

    /// True if a frame was truncated at the length cap.
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    /// Soft decision of a sample against the trained phase reference.
    fn soft_decision(&self, ci: i8, cq: i8) -> i32 {
        let vi = if self.sum_i > 0 { ci as i32 } else { -(ci as i32) };
        let vq = if self.sum_q > 0 { cq as i32 } else { -(cq as i32) };
        vi + vq
    }

    /// Whether a training sample agrees in phase with the reference
    /// accumulated so far, judged on the stronger channel.
    fn phase_agrees(&self, ci: i8, cq: i8) -> bool {
        if self.sum_i.abs() > self.sum_q.abs() {
            (ci >= 0) == (self.sum_i > 0)
        } else {
            (cq >= 0) == (self.sum_q > 0)
        }
    }

    /// Consumes one half-ETU I/Q sample. Returns `true` when a frame
    /// completed on this sample; check [`TagDemod::overflowed`] before
    /// trusting the contents.
    pub fn feed(&mut self, ci: i8, cq: i8) -> bool {
        match self.state {
            DemodState::Unsynced => {
                if amplitude(ci, cq) > SUBCARRIER_DETECT_THRESHOLD {
                    self.sum_i = ci as i32;
                    self.sum_q = cq as i32;
                    self.pos_count = 1;
                    self.bit_count = 0;
                    self.shift_reg = 0;
                    self.frame.clear();
                    self.overflowed = false;
                    self.state = DemodState::PhaseRefTraining;
                }
                false
            }
            DemodState::PhaseRefTraining => {
                if amplitude(ci, cq) > SUBCARRIER_DETECT_THRESHOLD && self.phase_agrees(ci, cq) {
                    // still in the unmodulated run
                    if self.pos_count < PHASE_REF_SAMPLES {
                        self.sum_i += ci as i32;
                        self.sum_q += cq as i32;
                    }
                    self.pos_count += 1;
                    false
                } else if self.pos_count < PHASE_REF_SAMPLES {
                    // flipped or faded before the reference settled
                    self.state = DemodState::Unsynced;
                    false
                } else {
                    // phase flip: first half-bit of the SOF low phase
                    self.this_bit = self.soft_decision(ci, cq);
                    self.pos_count = 1;
                    self.bit_count = 0;
                    self.shift_reg = 0;
                    self.state = DemodState::ReceivingData;
                    false
                }
            }
            DemodState::WaitForSofRisingEdge => {
                let v = self.soft_decision(ci, cq);
                if v > 0 {
                    if self.pos_count < 18 {
                        self.state = DemodState::Unsynced;
                    } else {
                        self.pos_count = 0;
                        self.state = DemodState::AwaitingStartBit;
                    }
                } else {
                    self.pos_count += 1;
                    if self.pos_count > 24 {
                        // low phase exceeds 12 ETUs, not an SOF
                        self.state = DemodState::Unsynced;
                    }
                }
                false
            }
            DemodState::AwaitingStartBit => {
                let v = self.soft_decision(ci, cq);
                if v > 0 {
                    self.pos_count += 1;
                    if self.pos_count > 6 {
                        // no start bit within 3 ETUs. An SOF with no
                        // characters behind it is a valid answer on some
                        // families; anything partial is noise to resync from.
                        self.state = DemodState::Unsynced;
                        return self.frame.is_empty();
                    }
                    false
                } else {
                    self.this_bit = v;
                    self.pos_count = 1;
                    self.bit_count = 0;
                    self.shift_reg = 0;
                    self.state = DemodState::ReceivingData;
                    false
                }
            }
            DemodState::ReceivingData => {
                let v = self.soft_decision(ci, cq);
                if self.pos_count == 0 {
                    self.this_bit = v;
                    self.pos_count = 1;
                    false
                } else {
                    self.this_bit += v;
                    self.shift_reg >>= 1;
                    if self.this_bit > 0 {
                        self.shift_reg |= 0x200;
                    }
                    self.bit_count += 1;
                    self.pos_count = 0;
                    if self.bit_count == 10 {
                        self.character_done()
                    } else {
                        false
                    }
                }
            }
        }
    }

    fn character_done(&mut self) -> bool {
        let shift = self.shift_reg;
        self.bit_count = 0;
        self.shift_reg = 0;
        if shift & 0x200 != 0 && shift & 0x001 == 0 {
            if self.frame.push((shift >> 1) as u8).is_err() || self.frame.len() > self.max_len {
                self.overflowed = true;
                self.state = DemodState::Unsynced;
                return true;
            }
            self.state = DemodState::AwaitingStartBit;
            false
        } else if shift == 0 {
            if self.frame.is_empty() {
                // that was the SOF low phase
                self.pos_count = 20;
                self.state = DemodState::WaitForSofRisingEdge;
                false
            } else {
                // EOF, explicit or by subcarrier loss
                self.state = DemodState::Unsynced;
                true
            }
        } else if self.frame.is_empty() {
            self.state = DemodState::Unsynced;
            false
        } else {
            // garbled character ends the frame with what we have
            self.state = DemodState::Unsynced;
            true
        }
    }
}
