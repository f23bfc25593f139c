//! Protocol-wide timing and sizing constants for ISO 14443 Type B.
//!
//! All durations are expressed in one of three units:
//!
//! - **ETU**: elementary time unit, one bit period of the 106 kbit/s line
//!   code (9.44 µs at the 13.56 MHz carrier).
//! - **ticks**: the free-running clock the sample transport is driven by
//!   (3.39 MHz, carrier / 4). 1 ETU == 32 ticks.
//! - **quarter / half bit periods**: the cadences at which the two decoders
//!   are fed ([`crate::uart`] four samples per ETU, [`crate::demod`] two).
//!
//! The frame-waiting-time and max-frame-size tables follow the ISO 14443-4
//! parameter encodings negotiated during ATTRIB.

/// Hardware clock ticks per elementary time unit.
pub const TICKS_PER_ETU: u32 = 32;

/// Converts a duration in ETUs to clock ticks.
pub const fn etu_to_ticks(etu: u32) -> u32 {
    etu << 5
}

/// Converts microseconds to clock ticks (3.39 MHz, rounded down).
pub const fn us_to_ticks(us: u32) -> u32 {
    (us * 27) / 8
}

/// Ceiling for any receive timeout, in ticks (about 4.9 s).
pub const MAX_TIMEOUT_TICKS: u32 = 16_777_120;

/// Largest frame either decoder will accumulate, in bytes.
pub const MAX_FRAME_SIZE: usize = 256;

/// Frame-waiting-time integer assumed right after connecting, before ATTRIB
/// has negotiated the card's real value.
pub const DEFAULT_FWI: u8 = 8;

/// Highest frame-waiting-time integer the protocol defines.
pub const MAX_FWI: u8 = 14;

/// TR0 guard: earliest tick at which the reader may start transmitting.
pub const TR0_TICKS: u32 = etu_to_ticks(16);

/// TR2 frame delay: minimum gap between a tag response and the next reader
/// command.
pub const TR2_TICKS: u32 = etu_to_ticks(14);

/// Dead time between the end of a reader transmission and the earliest
/// point a tag answer can arrive.
pub const DEADTIME_PCD_TO_PICC: u32 = etu_to_ticks(15);

/// Dead time deducted from the end-of-frame timestamp of a tag answer.
pub const DEADTIME_PICC_TO_PCD: u32 = etu_to_ticks(14);

/// Guard before a simulated tag starts modulating its answer (TR0 minimum,
/// 1024 carrier cycles).
pub const TAG_REPLY_GUARD_US: u32 = 76;

/// Amplitude below which an I/Q pair is treated as "no subcarrier".
pub const SUBCARRIER_DETECT_THRESHOLD: i32 = 8;

/// Low bit-periods of a start-of-frame marker.
pub const SOF_LOW_ETUS: usize = 10;

/// High bit-periods closing a start-of-frame marker.
pub const SOF_HIGH_ETUS: usize = 2;

/// Low bit-periods of an end-of-frame marker.
pub const EOF_LOW_ETUS: usize = 10;

/// Unmodulated synchronisation run (TR1) preceding a tag response.
pub const TR1_ETUS: usize = 10;

/// Oversampling ratio of the tag-role encoder: quarter-bit symbols per ETU.
pub const TAG_OVERSAMPLE: usize = 4;

/// Maximum frame waiting time for a given FWT integer, in ETUs.
///
/// `32 << fwi`, with `fwi` clamped to [`MAX_FWI`].
pub const fn fwt_etu(fwi: u8) -> u32 {
    let fwi = if fwi > MAX_FWI { MAX_FWI } else { fwi };
    32u32 << fwi
}

/// Maximum frame waiting time for a given FWT integer, in ticks, clamped to
/// [`MAX_TIMEOUT_TICKS`].
pub const fn fwt_ticks(fwi: u8) -> u32 {
    let t = etu_to_ticks(fwt_etu(fwi));
    if t > MAX_TIMEOUT_TICKS { MAX_TIMEOUT_TICKS } else { t }
}

/// Resolves the 4-bit max-frame-size code from ATQB protocol info.
///
/// Codes 0..=4 map to `8n + 16`, 5..=8 to the fixed sizes 64/96/128/256,
/// anything above is reserved and resolves to 257.
pub const fn max_frame_size(code: u8) -> u16 {
    match code {
        n @ 0..=4 => 8 * (n as u16) + 16,
        5 => 64,
        6 => 96,
        7 => 128,
        8 => 256,
        _ => 257,
    }
}
