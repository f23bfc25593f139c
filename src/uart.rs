//! Reader-signal decoder.
//!
//! Recovers reader-to-tag commands from a stream of hard line levels
//! sampled four times per ETU. The shape on the wire is the Type B reader
//! framing: SOF of 10 to 12 low bit-periods closed by highs, then 10-bit
//! characters back to back, then an EOF of 10 low bit-periods.
//!
//! One sample is consumed per [`ReaderUart::feed`] call; the call returns
//! `true` exactly when a complete frame (at least one byte plus EOF) has
//! been assembled, after which the frame stays readable until the next
//! `feed` or [`ReaderUart::reset`].

use crate::consts::MAX_FRAME_SIZE;

/// Decoder states, in protocol order. The ordering is meaningful: anything
/// above `GotSofFallingEdge` means a frame body may be in flight, which the
/// sniffer uses to gate the other decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UartState {
    /// Waiting for the falling edge that opens an SOF.
    Unsynced,
    /// Counting the low bit-periods of a candidate SOF.
    GotSofFallingEdge,
    /// Between characters, waiting for a start bit.
    AwaitingStartBit,
    /// Shifting in the 10 bits of a character.
    ReceivingData,
}

/// Software UART for the reader-to-tag direction.
#[derive(Debug)]
pub struct ReaderUart {
    state: UartState,
    /// Sample position within the current bit period (quarter periods).
    pos_count: u8,
    bit_count: u8,
    shift_reg: u16,
    frame: heapless::Vec<u8, MAX_FRAME_SIZE>,
    max_len: usize,
    overflowed: bool,
}

/// Quarter periods a start bit may keep the line high between characters.
const INTER_BYTE_QUARTERS: u8 = 25;

impl Default for ReaderUart {
    fn default() -> Self {
        Self::new()
    }
}

impl ReaderUart {
    /// Creates a decoder accepting frames up to [`MAX_FRAME_SIZE`] bytes.
    pub fn new() -> Self {
        Self {
            state: UartState::Unsynced,
            pos_count: 0,
            bit_count: 0,
            shift_reg: 0,
            frame: heapless::Vec::new(),
            max_len: MAX_FRAME_SIZE,
            overflowed: false,
        }
    }

    /// Returns to the hunting state and discards any partial frame.
    pub fn reset(&mut self) {
        self.state = UartState::Unsynced;
        self.pos_count = 0;
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
    pub fn state(&self) -> UartState {
        self.state
    }

    /// The assembled frame bytes.
    pub fn frame(&self) -> &[u8] {
        &self.frame
    }

    /// True if a frame was dropped because it exceeded the length cap.
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    /// Consumes one quarter-ETU line sample. Returns `true` when a frame
    /// completed on this sample.
    pub fn feed(&mut self, high: bool) -> bool {
        match self.state {
            UartState::Unsynced => {
                if !high {
                    self.pos_count = 0;
                    self.bit_count = 0;
                    self.state = UartState::GotSofFallingEdge;
                }
                false
            }
            UartState::GotSofFallingEdge => {
                self.pos_count += 1;
                if self.pos_count == 2 {
                    if high {
                        if self.bit_count > 9 {
                            // SOF low phase long enough, highs close it
                            self.pos_count = 0;
                            self.frame.clear();
                            self.overflowed = false;
                            self.state = UartState::AwaitingStartBit;
                        } else {
                            self.state = UartState::Unsynced;
                        }
                    } else {
                        self.bit_count += 1;
                        if self.bit_count > 12 {
                            // low phase too long for an SOF
                            self.state = UartState::Unsynced;
                        }
                    }
                }
                if self.pos_count >= 4 {
                    self.pos_count = 0;
                }
                false
            }
            UartState::AwaitingStartBit => {
                self.pos_count += 1;
                if high {
                    if self.pos_count > INTER_BYTE_QUARTERS {
                        self.state = UartState::Unsynced;
                    }
                } else {
                    // start bit, first quarter already consumed
                    self.pos_count = 1;
                    self.bit_count = 0;
                    self.shift_reg = 0;
                    self.state = UartState::ReceivingData;
                }
                false
            }
            UartState::ReceivingData => {
                self.pos_count += 1;
                if self.pos_count == 2 {
                    // mid-bit sample
                    self.shift_reg >>= 1;
                    if high {
                        self.shift_reg |= 0x200;
                    }
                    self.bit_count += 1;
                }
                if self.pos_count >= 4 {
                    self.pos_count = 0;
                }
                if self.bit_count == 10 {
                    self.character_done()
                } else {
                    false
                }
            }
        }
    }

    /// Classifies a completed 10-bit character: data byte, EOF or noise.
    fn character_done(&mut self) -> bool {
        let shift = self.shift_reg;
        self.bit_count = 0;
        self.shift_reg = 0;
        if shift & 0x200 != 0 && shift & 0x001 == 0 {
            // start and stop bits in place
            if self.frame.push((shift >> 1) as u8).is_err() || self.frame.len() > self.max_len {
                self.overflowed = true;
                self.state = UartState::Unsynced;
            } else {
                self.pos_count = 0;
                self.state = UartState::AwaitingStartBit;
            }
            false
        } else if shift == 0 {
            // EOF, only meaningful after at least one byte
            self.state = UartState::Unsynced;
            !self.frame.is_empty()
        } else {
            self.state = UartState::Unsynced;
            false
        }
    }
}
