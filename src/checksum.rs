//! Frame checksums.
//!
//! Two 16-bit CRC variants cover every card family the link layer speaks:
//! the ISO 14443-3 Type B CRC (X-25) used by standard, SRx, CTS and Xerox
//! cards, and the Picopass variant which shares the polynomial but seeds
//! differently and skips the final complement. On that family the opcode
//! byte of a command is not covered; callers pass the argument bytes only.
//!
//! On the wire the CRC trails the payload low byte first.

use crc::{Algorithm, Crc, CRC_16_IBM_SDLC};

use crate::consts::MAX_FRAME_SIZE;
use crate::error::Error;

/// Picopass CRC: poly 0x1021 reflected, wire seed 0xE012 (0x4807 in the
/// crc crate's pre-reflection convention), no output xor.
const CRC_16_PICOPASS: Algorithm<u16> = Algorithm {
    width: 16,
    poly: 0x1021,
    init: 0x4807,
    refin: true,
    refout: true,
    xorout: 0x0000,
    check: 0x5D04,
    residue: 0x0000,
};

static CRC_B: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_SDLC);
static CRC_PICOPASS: Crc<u16> = Crc::<u16>::new(&CRC_16_PICOPASS);

/// Which checksum variant a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcKind {
    /// ISO 14443-3 Type B (X-25).
    Iso14443b,
    /// Picopass / iCLASS.
    Picopass,
}

/// Computes the checksum over `data`.
pub fn compute(kind: CrcKind, data: &[u8]) -> u16 {
    match kind {
        CrcKind::Iso14443b => CRC_B.checksum(data),
        CrcKind::Picopass => CRC_PICOPASS.checksum(data),
    }
}

/// Appends the checksum of the current contents to `buf`, low byte first.
pub fn append<const N: usize>(
    kind: CrcKind,
    buf: &mut heapless::Vec<u8, N>,
) -> Result<(), Error> {
    let crc = compute(kind, buf);
    buf.push((crc & 0xFF) as u8).map_err(|_| Error::Overflow)?;
    buf.push((crc >> 8) as u8).map_err(|_| Error::Overflow)?;
    Ok(())
}

/// Verifies a frame whose last two bytes are its checksum.
///
/// Frames shorter than three bytes cannot carry both payload and checksum
/// and never verify.
pub fn verify(kind: CrcKind, frame: &[u8]) -> bool {
    if frame.len() < 3 {
        return false;
    }
    let (payload, trailer) = frame.split_at(frame.len() - 2);
    let crc = compute(kind, payload);
    trailer[0] == (crc & 0xFF) as u8 && trailer[1] == (crc >> 8) as u8
}

/// Convenience: copies `payload` and appends its checksum.
pub fn framed(kind: CrcKind, payload: &[u8]) -> Result<heapless::Vec<u8, { MAX_FRAME_SIZE + 2 }>, Error> {
    let mut buf = heapless::Vec::new();
    buf.extend_from_slice(payload).map_err(|_| Error::Overflow)?;
    append(kind, &mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wakeup_command_crc() {
        // wake-up as it appears on the wire
        let wupb = [0x05, 0x00, 0x08, 0x39, 0x73];
        assert!(verify(CrcKind::Iso14443b, &wupb));

        let mut buf: heapless::Vec<u8, 8> = heapless::Vec::new();
        buf.extend_from_slice(&wupb[..3]).unwrap();
        append(CrcKind::Iso14443b, &mut buf).unwrap();
        assert_eq!(&buf[..], &wupb[..]);
    }

    #[test]
    fn request_command_crc() {
        let reqb = [0x05, 0x00, 0x00, 0x71, 0xFF];
        assert!(verify(CrcKind::Iso14443b, &reqb));
    }

    #[test]
    fn corrupted_frame_rejected() {
        let mut wupb = [0x05, 0x00, 0x08, 0x39, 0x73];
        wupb[2] ^= 0x01;
        assert!(!verify(CrcKind::Iso14443b, &wupb));
    }

    #[test]
    fn short_frames_never_verify() {
        assert!(!verify(CrcKind::Iso14443b, &[]));
        assert!(!verify(CrcKind::Iso14443b, &[0x39, 0x73]));
    }

    #[test]
    fn picopass_read_command_crc() {
        // block reads as they appear on the wire; the opcode byte is not
        // covered on this family, the checksum spans the arguments only
        let reads = [
            [0x0C, 0x01, 0xFA, 0x22],
            [0x0C, 0x05, 0xDE, 0x64],
            [0x0C, 0x02, 0x61, 0x10],
        ];
        for frame in reads {
            assert!(verify(CrcKind::Picopass, &frame[1..]));
            assert!(!verify(CrcKind::Picopass, &frame));
        }
        assert_eq!(compute(CrcKind::Picopass, &[0x01]), 0x22FA);
        assert!(!verify(CrcKind::Iso14443b, &[0x0C, 0x01, 0xFA, 0x22]));
    }

    #[test]
    fn framed_copies_and_appends() {
        let f = framed(CrcKind::Iso14443b, &[0x05, 0x00, 0x08]).unwrap();
        assert_eq!(&f[..], &[0x05, 0x00, 0x08, 0x39, 0x73]);
    }
}
