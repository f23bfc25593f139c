//! Bit encoder: turns command bytes into framed line symbols.
//!
//! Both roles share the 10-bit character shape (start bit low, eight data
//! bits LSB first, stop bit high) but frame and pace it differently:
//!
//! - the **reader role** emits one symbol per ETU, optionally wrapped in the
//!   Type B SOF (10 low + 2 high) and EOF (10 low) markers; slot markers go
//!   out unframed.
//! - the **tag role** emits four symbols per ETU and always frames, with a
//!   leading TR1 run of highs so the reader's demodulator can train its
//!   phase reference before the SOF arrives.
//!
//! Symbols are logical line levels. Whether a high means "carrier modulated"
//! or "subcarrier phase A" is the radio's business, not the encoder's.

use crate::consts::{
    EOF_LOW_ETUS, SOF_HIGH_ETUS, SOF_LOW_ETUS, TAG_OVERSAMPLE, TR1_ETUS,
};
use crate::error::Error;

/// Packed-bit capacity of a symbol buffer, in bytes.
///
/// Sized for a 256-byte frame with framing at reader pace; tag-role frames
/// are shorter in bytes than their bit count suggests because they pack
/// eight quarter-bit symbols per byte too.
pub const SYMBOL_BUF_BYTES: usize = 1536;

/// A bit-packed run of line symbols, MSB first within each byte.
#[derive(Debug, Clone, Default)]
pub struct SymbolBuffer {
    buf: heapless::Vec<u8, SYMBOL_BUF_BYTES>,
    bits: usize,
}

impl SymbolBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one symbol.
    pub fn push(&mut self, high: bool) -> Result<(), Error> {
        let offset = self.bits % 8;
        if offset == 0 {
            self.buf.push(0).map_err(|_| Error::Overflow)?;
        }
        if high {
            let last = self.buf.len() - 1;
            self.buf[last] |= 0x80 >> offset;
        }
        self.bits += 1;
        Ok(())
    }

    /// Appends `n` copies of the same symbol.
    pub fn push_run(&mut self, high: bool, n: usize) -> Result<(), Error> {
        for _ in 0..n {
            self.push(high)?;
        }
        Ok(())
    }

    /// Number of symbols stored.
    pub fn len(&self) -> usize {
        self.bits
    }

    /// True if no symbols are stored.
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Symbol at position `idx`. Out of range reads as low.
    pub fn get(&self, idx: usize) -> bool {
        if idx >= self.bits {
            return false;
        }
        self.buf[idx / 8] & (0x80 >> (idx % 8)) != 0
    }

    /// Iterates the symbols in transmission order.
    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.bits).map(move |i| self.get(i))
    }

    /// The packed symbol bytes. The final byte may be partially filled;
    /// see [`SymbolBuffer::trailing_bits`].
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Valid symbols in the final packed byte (0 when the buffer is empty
    /// or the final byte is full).
    pub fn trailing_bits(&self) -> usize {
        self.bits % 8
    }
}

/// Emits one 10-bit character at `symbols_per_bit` pace.
fn push_char(out: &mut SymbolBuffer, byte: u8, symbols_per_bit: usize) -> Result<(), Error> {
    out.push_run(false, symbols_per_bit)?;
    for bit in 0..8 {
        out.push_run(byte & (1 << bit) != 0, symbols_per_bit)?;
    }
    out.push_run(true, symbols_per_bit)
}

/// Encodes a reader-to-tag frame at one symbol per ETU.
///
/// With `framed` set the command is wrapped in SOF and EOF; without it the
/// bytes go out bare, which is how slot markers are probed during
/// anticollision.
pub fn reader_frame(cmd: &[u8], framed: bool) -> Result<SymbolBuffer, Error> {
    let mut out = SymbolBuffer::new();
    if framed {
        out.push_run(false, SOF_LOW_ETUS)?;
        out.push_run(true, SOF_HIGH_ETUS)?;
    }
    for &byte in cmd {
        push_char(&mut out, byte, 1)?;
    }
    if framed {
        out.push_run(false, EOF_LOW_ETUS)?;
        // line idles high between frames
        out.push(true)?;
    }
    Ok(out)
}

/// Encodes a tag-to-reader frame at four symbols per ETU.
///
/// The TR1 run of highs precedes the SOF so the reader can lock its phase
/// reference; the frame closes with an EOF and an idle-high tail.
pub fn tag_frame(resp: &[u8]) -> Result<SymbolBuffer, Error> {
    let mut out = SymbolBuffer::new();
    out.push_run(true, TR1_ETUS * TAG_OVERSAMPLE)?;
    out.push_run(false, SOF_LOW_ETUS * TAG_OVERSAMPLE)?;
    out.push_run(true, SOF_HIGH_ETUS * TAG_OVERSAMPLE)?;
    for &byte in resp {
        push_char(&mut out, byte, TAG_OVERSAMPLE)?;
    }
    out.push_run(false, EOF_LOW_ETUS * TAG_OVERSAMPLE)?;
    out.push_run(true, TAG_OVERSAMPLE)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(buf: &SymbolBuffer) -> Vec<bool> {
        buf.iter().collect()
    }

    #[test]
    fn framed_reader_symbol_count() {
        // SOF 12 + 2 characters of 10 + EOF 10 + idle 1
        let f = reader_frame(&[0xAA, 0x55], true).unwrap();
        assert_eq!(f.len(), 12 + 20 + 10 + 1);
    }

    #[test]
    fn unframed_reader_is_bare_characters() {
        let f = reader_frame(&[0xB1], false).unwrap();
        assert_eq!(f.len(), 10);
        let bits = collect(&f);
        // start bit low, stop bit high
        assert!(!bits[0]);
        assert!(bits[9]);
        // 0xB1 LSB first
        let data: Vec<bool> = bits[1..9].to_vec();
        let expect: Vec<bool> = (0..8).map(|i| 0xB1u8 & (1 << i) != 0).collect();
        assert_eq!(data, expect);
    }

    #[test]
    fn sof_shape() {
        let f = reader_frame(&[], true).unwrap();
        let bits = collect(&f);
        assert!(bits[..10].iter().all(|b| !b));
        assert!(bits[10] && bits[11]);
        // EOF lows follow immediately when there is no payload
        assert!(bits[12..22].iter().all(|b| !b));
        assert!(bits[22]);
    }

    #[test]
    fn tag_frame_is_oversampled() {
        let f = tag_frame(&[0x00]).unwrap();
        // (TR1 10 + SOF 12 + char 10 + EOF 10 + idle 1) * 4
        assert_eq!(f.len(), (10 + 12 + 10 + 10 + 1) * 4);
        let bits = collect(&f);
        // TR1 all high, then SOF lows
        assert!(bits[..40].iter().all(|b| *b));
        assert!(bits[40..80].iter().all(|b| !b));
    }

    #[test]
    fn packing_round_trip() {
        let mut buf = SymbolBuffer::new();
        for i in 0..19 {
            buf.push(i % 3 == 0).unwrap();
        }
        assert_eq!(buf.len(), 19);
        assert_eq!(buf.trailing_bits(), 3);
        for i in 0..19 {
            assert_eq!(buf.get(i), i % 3 == 0, "symbol {i}");
        }
        assert!(!buf.get(100));
    }

    #[test]
    fn overflow_is_reported() {
        let mut buf = SymbolBuffer::new();
        assert_eq!(
            buf.push_run(true, SYMBOL_BUF_BYTES * 8 + 1).unwrap_err(),
            Error::Overflow
        );
    }
}
