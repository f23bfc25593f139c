//! Session and link layer: card selection, parameters and block exchange.
//!
//! A [`Session`] owns the frame channel, both decoders and every piece of
//! negotiated protocol state (frame waiting time, max frame size, the ISO
//! 14443-4 block-number toggle, field flag). Selection procedures are
//! provided for the five card families that answer on this physical layer:
//! standard Type B, SRx storage tags, ASK CTS tags, Xerox consumable tags
//! and Picopass/iCLASS credentials.
//!
//! Every command/response step verifies the lengths and checksums the
//! family's protocol prescribes and maps mismatches to typed errors; a
//! failed selection leaves no card record behind.

use log::debug;

use crate::channel::Channel;
use crate::checksum::{self, CrcKind};
use crate::consts::{
    etu_to_ticks, fwt_ticks, max_frame_size, us_to_ticks, DEFAULT_FWI, MAX_FRAME_SIZE,
    MAX_FWI, MAX_TIMEOUT_TICKS, TR2_TICKS,
};
use crate::demod::TagDemod;
use crate::error::Error;
use crate::hal::{
    CancelToken, Diagnostics, Indicator, Radio, RadioMode, SampleTransport, TickClock, TraceSink,
};
use crate::uart::ReaderUart;

// ISO 14443-3 B opcodes
const REQB: u8 = 0x05;
const ATTRIB: u8 = 0x1D;
// SRx opcodes
const SRX_INITIATE: u8 = 0x06;
const SRX_SELECT: u8 = 0x0E;
const SRX_GET_UID: u8 = 0x0B;
const SRX_READ_BLK: u8 = 0x08;
// ASK CTS opcodes
const CTS_REQT: u8 = 0x10;
const CTS_SELECT: u8 = 0x9F;
// Picopass opcodes
const PICO_ACTALL: u8 = 0x0A;
const PICO_IDENTIFY: u8 = 0x0C;
const PICO_SELECT: u8 = 0x81;
const PICO_READCHECK: u8 = 0x88;

/// A selected Type B, SRx or Xerox card.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CardSelect {
    /// Unique identifier (PUPI for standard cards), left-aligned.
    pub uid: [u8; 10],
    /// Valid bytes in `uid`.
    pub uid_len: u8,
    /// Application data and protocol info from the ATQB.
    pub atqb: [u8; 7],
    /// Randomly generated chip id (SRx only).
    pub chip_id: u8,
    /// Card identifier from the ATTRIB answer (standard cards only).
    pub cid: u8,
}

/// A selected ASK CTS tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CtsCard {
    /// Product code.
    pub product_code: u8,
    /// Facility code.
    pub facility_code: u8,
    /// 4-byte UID, MSB half first.
    pub uid: [u8; 4],
}

/// Header blocks of a selected Picopass credential.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PicopassHeader {
    /// Card serial number.
    pub csn: [u8; 8],
    /// Configuration block.
    pub config: [u8; 8],
    /// E-purse block (on non-secure page maps this slot carries the
    /// issuer area, matching the card's block layout).
    pub epurse: [u8; 8],
    /// Application issuer area block.
    pub app_issuer_area: [u8; 8],
}

/// Result of an ISO 14443-4 block exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApduResponse {
    /// The protocol control byte the card answered with.
    pub response_byte: u8,
    /// Response payload with the trailing checksum still attached.
    pub data: heapless::Vec<u8, MAX_FRAME_SIZE>,
}

/// One reader-role session over a channel.
pub struct Session<T, R, C, S, D, A> {
    ch: Channel<T, R, C, S, D, A>,
    demod: TagDemod,
    uart: ReaderUart,
    timeout_ticks: u32,
    fwi: u8,
    max_frame_len: usize,
    pcb_block_num: u8,
    field_on: bool,
    trigger: bool,
    last_eof: u32,
}

impl<T, R, C, S, D, A> Session<T, R, C, S, D, A>
where
    T: SampleTransport,
    R: Radio,
    C: TickClock,
    S: TraceSink,
    D: Diagnostics,
    A: CancelToken,
{
    /// Wraps a channel into an idle session. The field stays off until
    /// [`Session::connect`].
    pub fn new(ch: Channel<T, R, C, S, D, A>) -> Self {
        Self {
            ch,
            demod: TagDemod::new(),
            uart: ReaderUart::new(),
            timeout_ticks: fwt_ticks(DEFAULT_FWI),
            fwi: DEFAULT_FWI,
            max_frame_len: MAX_FRAME_SIZE,
            pcb_block_num: 0,
            field_on: false,
            trigger: false,
            last_eof: 0,
        }
    }

    /// The underlying channel, for trace control and direct seam access.
    pub fn channel_mut(&mut self) -> &mut Channel<T, R, C, S, D, A> {
        &mut self.ch
    }

    /// Energises the field and resets all negotiated parameters.
    pub fn connect(&mut self) {
        self.ch.radio.set_mode(RadioMode::ReaderTransmit);
        self.ch.radio.field_on();
        self.ch.diag.indicate(Indicator::Field, true);
        self.demod.reset();
        self.uart.reset();
        self.set_fwt(DEFAULT_FWI);
        self.set_max_frame_size(MAX_FRAME_SIZE as u16);
        self.pcb_block_num = 0;
        self.last_eof = 0;
        self.field_on = true;
    }

    /// Drops the field. No HALT is sent, the card simply loses power.
    pub fn disconnect(&mut self) {
        self.ch.radio.field_off();
        self.ch.radio.set_mode(RadioMode::Idle);
        self.ch.diag.indicate(Indicator::Field, false);
        self.field_on = false;
    }

    /// Whether the field is currently energised.
    pub fn is_connected(&self) -> bool {
        self.field_on
    }

    /// Requests or releases the scope trigger indicator raised on each
    /// transmission.
    pub fn set_trigger(&mut self, enable: bool) {
        self.trigger = enable;
        if !enable {
            self.ch.diag.indicate(Indicator::Trigger, false);
        }
    }

    /// Sets the receive timeout in ETUs, clamped to the protocol ceiling.
    pub fn set_timeout_etu(&mut self, etu: u32) {
        self.timeout_ticks = etu_to_ticks(etu).min(MAX_TIMEOUT_TICKS);
        debug!("timeout set to {} etu", etu);
    }

    /// Current receive timeout in ticks.
    pub fn timeout_ticks(&self) -> u32 {
        self.timeout_ticks
    }

    /// Adopts a frame-waiting-time integer and derives the timeout from it.
    pub fn set_fwt(&mut self, fwi: u8) {
        self.fwi = fwi.min(MAX_FWI);
        self.timeout_ticks = fwt_ticks(self.fwi);
        debug!("fwt index {}", self.fwi);
    }

    /// Caps the frame length both decoders will accept and outgoing
    /// exchanges may occupy.
    pub fn set_max_frame_size(&mut self, size: u16) {
        let cap = (size as usize).min(MAX_FRAME_SIZE);
        self.max_frame_len = cap;
        self.demod.set_max_len(cap);
        self.uart.set_max_len(cap);
        debug!("max frame size {} bytes", cap);
    }

    /// Negotiated frame length cap in bytes.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_len
    }

    /// Transmits one reader frame no earlier than `gap` ticks after the
    /// previous frame ended.
    fn transmit(&mut self, cmd: &[u8], framed: bool, gap: u32) -> Result<(), Error> {
        let earliest = self.last_eof.wrapping_add(gap);
        let t = self.ch.send_reader_frame(cmd, framed, earliest)?;
        if self.trigger {
            self.ch.diag.indicate(Indicator::Trigger, true);
        }
        self.last_eof = t.end;
        Ok(())
    }

    /// Waits for one tag frame with the session timeout.
    fn receive(&mut self) -> Result<usize, Error> {
        let (len, eof) = self.ch.receive_tag_frame(&mut self.demod, self.timeout_ticks)?;
        self.last_eof = eof;
        Ok(len)
    }

    fn transact(&mut self, cmd: &[u8], gap: u32) -> Result<usize, Error> {
        self.transmit(cmd, true, gap)?;
        self.receive()
    }

    /// Selects a standard ISO 14443-4 Type B card: REQB, then ATTRIB, then
    /// adopts the card's max frame size and frame waiting time.
    pub fn select_standard(&mut self) -> Result<CardSelect, Error> {
        // REQB, AFI 0, normal request, one slot
        const REQB_FRAME: [u8; 5] = [REQB, 0x00, 0x00, 0x71, 0xFF];
        let len = self.transact(&REQB_FRAME, TR2_TICKS)?;
        if len < 14 {
            return Err(Error::Length);
        }
        if !checksum::verify(CrcKind::Iso14443b, self.demod.frame()) {
            return Err(Error::Checksum);
        }
        let mut card = CardSelect::default();
        {
            let atqb = self.demod.frame();
            card.uid_len = 4;
            card.uid[..4].copy_from_slice(&atqb[1..5]);
            card.atqb.copy_from_slice(&atqb[5..12]);
        }

        // ATTRIB: PUPI, default TR0/TR1, 256-byte receive capability,
        // the card's protocol type echoed back, CID 0
        let mut attrib: heapless::Vec<u8, 11> = heapless::Vec::new();
        attrib.push(ATTRIB).map_err(|_| Error::Overflow)?;
        attrib
            .extend_from_slice(&card.uid[..4])
            .map_err(|_| Error::Overflow)?;
        attrib
            .extend_from_slice(&[0x00, 0x08, card.atqb[5] & 0x0F, 0x00])
            .map_err(|_| Error::Overflow)?;
        checksum::append(CrcKind::Iso14443b, &mut attrib)?;

        let len = self.transact(&attrib, TR2_TICKS)?;
        if len < 3 {
            return Err(Error::Length);
        }
        if !checksum::verify(CrcKind::Iso14443b, self.demod.frame()) {
            return Err(Error::Checksum);
        }
        card.cid = self.demod.frame()[0];

        self.set_max_frame_size(max_frame_size(card.atqb[5] >> 4));
        let fwi = card.atqb[6] >> 4;
        if fwi < 15 {
            self.set_fwt(fwi);
        }
        self.pcb_block_num = 0;
        Ok(card)
    }

    /// Selects an SRx storage tag: INITIATE yields a random chip id, which
    /// SELECT must echo, then GET UID.
    pub fn select_srx(&mut self) -> Result<CardSelect, Error> {
        const INITIATE: [u8; 4] = [SRX_INITIATE, 0x00, 0x97, 0x5B];
        let len = self.transact(&INITIATE, TR2_TICKS)?;
        if len != 3 {
            return Err(Error::Length);
        }
        if !checksum::verify(CrcKind::Iso14443b, self.demod.frame()) {
            return Err(Error::Checksum);
        }
        let chip_id = self.demod.frame()[0];

        let mut select: heapless::Vec<u8, 4> = heapless::Vec::new();
        select
            .extend_from_slice(&[SRX_SELECT, chip_id])
            .map_err(|_| Error::Overflow)?;
        checksum::append(CrcKind::Iso14443b, &mut select)?;
        let len = self.transact(&select, TR2_TICKS)?;
        if len != 3 {
            return Err(Error::Length);
        }
        if !checksum::verify(CrcKind::Iso14443b, self.demod.frame()) {
            return Err(Error::Checksum);
        }
        if self.demod.frame()[0] != chip_id {
            return Err(Error::UnexpectedResponse);
        }

        const GET_UID: [u8; 3] = [SRX_GET_UID, 0xAB, 0x4E];
        let len = self.transact(&GET_UID, TR2_TICKS)?;
        if len != 10 {
            return Err(Error::Length);
        }
        if !checksum::verify(CrcKind::Iso14443b, self.demod.frame()) {
            return Err(Error::Checksum);
        }
        let mut card = CardSelect::default();
        card.uid_len = 8;
        card.uid[..8].copy_from_slice(&self.demod.frame()[..8]);
        card.chip_id = chip_id;
        Ok(card)
    }

    /// Reads one 4-byte block from a selected SRx tag.
    pub fn read_srx_block(&mut self, block: u8) -> Result<[u8; 4], Error> {
        let mut cmd: heapless::Vec<u8, 4> = heapless::Vec::new();
        cmd.extend_from_slice(&[SRX_READ_BLK, block])
            .map_err(|_| Error::Overflow)?;
        checksum::append(CrcKind::Iso14443b, &mut cmd)?;
        let len = self.transact(&cmd, TR2_TICKS)?;
        if len != 6 {
            return Err(Error::UnexpectedResponse);
        }
        if !checksum::verify(CrcKind::Iso14443b, self.demod.frame()) {
            return Err(Error::Checksum);
        }
        let mut out = [0u8; 4];
        out.copy_from_slice(&self.demod.frame()[..4]);
        Ok(out)
    }

    /// Selects an ASK CTS tag: INITIATE, then read the two UID halves.
    pub fn select_cts(&mut self) -> Result<CtsCard, Error> {
        const INIT: [u8; 3] = [CTS_REQT, 0xF9, 0xE0];
        let mut msb_uid: heapless::Vec<u8, 5> = heapless::Vec::new();
        msb_uid
            .extend_from_slice(&[CTS_SELECT, 0xFF, 0xFF])
            .map_err(|_| Error::Overflow)?;
        checksum::append(CrcKind::Iso14443b, &mut msb_uid)?;
        let mut lsb_uid: heapless::Vec<u8, 3> = heapless::Vec::new();
        lsb_uid.push(0xC4).map_err(|_| Error::Overflow)?;
        checksum::append(CrcKind::Iso14443b, &mut lsb_uid)?;

        let mut card = CtsCard::default();

        let len = self.transact(&INIT, TR2_TICKS)?;
        if len != 4 {
            return Err(Error::Length);
        }
        if !checksum::verify(CrcKind::Iso14443b, self.demod.frame()) {
            return Err(Error::Checksum);
        }
        card.product_code = self.demod.frame()[0];
        card.facility_code = self.demod.frame()[1];

        let len = self.transact(&msb_uid, TR2_TICKS)?;
        if len != 4 {
            return Err(Error::Length);
        }
        if !checksum::verify(CrcKind::Iso14443b, self.demod.frame()) {
            return Err(Error::Checksum);
        }
        card.uid[..2].copy_from_slice(&self.demod.frame()[..2]);

        let len = self.transact(&lsb_uid, TR2_TICKS)?;
        if len != 4 {
            return Err(Error::Length);
        }
        if !checksum::verify(CrcKind::Iso14443b, self.demod.frame()) {
            return Err(Error::Checksum);
        }
        card.uid[2..].copy_from_slice(&self.demod.frame()[..2]);
        Ok(card)
    }

    /// Selects a Xerox consumable tag: double wake-up, a 32-round slotted
    /// anticollision walk recovering two UID bits per round, then ATTRIB
    /// and the fixed password step these chips insist on.
    pub fn select_xrx(&mut self) -> Result<CardSelect, Error> {
        const WUP1: [u8; 5] = [0x0D, 0x37, 0x21, 0x92, 0xF2];
        const WUP2: [u8; 5] = [0x5D, 0x37, 0x21, 0x71, 0x71];

        // these chips answer fast; long waits would blow the slot grid
        self.set_timeout_etu(24);

        self.transmit(&WUP1, true, TR2_TICKS)?;
        self.transmit(&WUP2, true, us_to_ticks(9000))?;

        let mut uid: u64 = 0;
        for bit_pos in (0..64u32).step_by(2) {
            let mut found = false;
            for slot in 0..4u8 {
                match self.receive() {
                    Ok(len) if len > 0 => {
                        debug!("unexpected data during anticollision, {} bytes", len);
                        return Err(Error::UnexpectedResponse);
                    }
                    Ok(_) | Err(Error::Timeout) => {}
                    Err(e) => return Err(e),
                }
                if self.demod.pos_count() != 0 {
                    // burst without a frame: the tag sits in this slot
                    uid |= (slot as u64) << bit_pos;
                    self.transmit(&[0xB1 + (slot << 1)], false, etu_to_ticks(30))?;
                    found = true;
                    break;
                }
                self.transmit(&[0xA1 + (slot << 1)], false, etu_to_ticks(30))?;
            }
            if !found {
                debug!("no answer to anticollision");
                return Err(Error::Timeout);
            }
        }
        debug!("anticollision uid {:016x}", uid);

        // the tag now sends its ATQB unprompted
        let len = self.receive()?;
        if len < 18 {
            return Err(Error::Length);
        }
        // fixed length, the EOF catch on these tags is unstable
        if !checksum::verify(CrcKind::Iso14443b, &self.demod.frame()[..18]) {
            return Err(Error::Checksum);
        }
        if self.demod.frame()[0] != 0x50 {
            return Err(Error::UnexpectedResponse);
        }
        let mut card = CardSelect::default();
        card.uid_len = 8;
        card.uid[..8].copy_from_slice(&self.demod.frame()[1..9]);
        card.atqb.copy_from_slice(&self.demod.frame()[9..16]);

        let uid_bytes = uid.to_le_bytes();

        let mut attrib: heapless::Vec<u8, 15> = heapless::Vec::new();
        attrib.push(ATTRIB).map_err(|_| Error::Overflow)?;
        attrib
            .extend_from_slice(&uid_bytes)
            .map_err(|_| Error::Overflow)?;
        attrib
            .extend_from_slice(&[0x00, 0x0F, 0x01, 0x0F])
            .map_err(|_| Error::Overflow)?;
        checksum::append(CrcKind::Iso14443b, &mut attrib)?;
        let len = self.transact(&attrib, TR2_TICKS)?;
        if len < 3 {
            return Err(Error::Length);
        }
        if !checksum::verify(CrcKind::Iso14443b, &self.demod.frame()[..3]) {
            return Err(Error::Checksum);
        }
        if self.demod.frame()[0] != 0x00 {
            return Err(Error::UnexpectedResponse);
        }

        let mut password: heapless::Vec<u8, 17> = heapless::Vec::new();
        password
            .extend_from_slice(&[0x02, 0x38])
            .map_err(|_| Error::Overflow)?;
        password
            .extend_from_slice(&uid_bytes)
            .map_err(|_| Error::Overflow)?;
        password
            .extend_from_slice(&[0x03, 0x4E, 0x4B, 0x53, 0x4F])
            .map_err(|_| Error::Overflow)?;
        checksum::append(CrcKind::Iso14443b, &mut password)?;
        let len = self.transact(&password, TR2_TICKS)?;
        if len < 4 {
            return Err(Error::Length);
        }
        if !checksum::verify(CrcKind::Iso14443b, &self.demod.frame()[..4]) {
            return Err(Error::Checksum);
        }
        if self.demod.frame()[0] != 0x02 || self.demod.frame()[1] != 0x00 {
            return Err(Error::UnexpectedResponse);
        }
        Ok(card)
    }

    /// Selects a Picopass credential and reads its header blocks. The
    /// page map in the configuration block decides whether the e-purse
    /// exists or the issuer area sits in its place.
    pub fn select_picopass(&mut self) -> Result<PicopassHeader, Error> {
        const ACT_ALL: [u8; 1] = [PICO_ACTALL];
        const IDENTIFY: [u8; 1] = [PICO_IDENTIFY];
        const READ_CONF: [u8; 4] = [PICO_IDENTIFY, 0x01, 0xFA, 0x22];
        const READ_AIA_BLK5: [u8; 4] = [PICO_IDENTIFY, 0x05, 0xDE, 0x64];
        const READ_AIA_BLK2: [u8; 4] = [PICO_IDENTIFY, 0x02, 0x61, 0x10];
        const READ_CHECK_CC: [u8; 2] = [PICO_READCHECK, 0x02];

        self.transmit(&ACT_ALL, true, TR2_TICKS)?;
        // the tag population needs to settle before addressing
        self.transmit(&IDENTIFY, true, us_to_ticks(330))?;
        let len = self.receive()?;
        if len != 10 {
            return Err(Error::Length);
        }

        // select with the anticollision CSN
        let mut select: heapless::Vec<u8, 9> = heapless::Vec::new();
        select.push(PICO_SELECT).map_err(|_| Error::Overflow)?;
        select
            .extend_from_slice(&self.demod.frame()[..8])
            .map_err(|_| Error::Overflow)?;
        let len = self.transact(&select, TR2_TICKS)?;
        if len != 10 {
            return Err(Error::Length);
        }
        let mut hdr = PicopassHeader::default();
        hdr.csn.copy_from_slice(&self.demod.frame()[..8]);

        let len = self.transact(&READ_CONF, TR2_TICKS)?;
        if len != 10 {
            return Err(Error::Length);
        }
        hdr.config.copy_from_slice(&self.demod.frame()[..8]);

        // crypt fuses encode the page map
        let pagemap = (hdr.config[7] & 0x18) >> 3;
        if pagemap != 0x01 {
            let len = self.transact(&READ_AIA_BLK5, TR2_TICKS)?;
            if len != 10 {
                return Err(Error::Length);
            }
            hdr.app_issuer_area
                .copy_from_slice(&self.demod.frame()[..8]);

            let len = self.transact(&READ_CHECK_CC, TR2_TICKS)?;
            if len != 8 {
                return Err(Error::Length);
            }
            hdr.epurse.copy_from_slice(&self.demod.frame()[..8]);
        } else {
            // non-secure page map keeps the issuer area where the
            // e-purse would sit, on block 2
            let len = self.transact(&READ_AIA_BLK2, TR2_TICKS)?;
            if len != 10 {
                return Err(Error::Length);
            }
            hdr.epurse.copy_from_slice(&self.demod.frame()[..8]);
        }
        Ok(hdr)
    }

    /// Exchanges one ISO 14443-4 block with the selected card.
    ///
    /// A non-empty `msg` goes out as an I-block (optionally flagged for
    /// chaining); an empty one sends an R(ACK), which is how chained
    /// responses are pulled. Waiting-time-extension requests from the card
    /// are honoured transparently, with the timeout scaled to
    /// `fwt * multiplier` for the retry only. The block-number toggle
    /// follows the matching rule from the standard.
    pub fn exchange_apdu(&mut self, msg: &[u8], send_chaining: bool) -> Result<ApduResponse, Error> {
        // PCB plus checksum must still fit the negotiated frame size
        if msg.len() + 3 > self.max_frame_len {
            return Err(Error::Unsupported);
        }
        let mut frame: heapless::Vec<u8, { MAX_FRAME_SIZE + 4 }> = heapless::Vec::new();
        if !msg.is_empty() {
            let mut pcb = 0x02 | self.pcb_block_num;
            if send_chaining {
                pcb |= 0x10;
            }
            frame.push(pcb).map_err(|_| Error::Overflow)?;
            frame.extend_from_slice(msg).map_err(|_| Error::Overflow)?;
        } else {
            frame
                .push(0xA2 | self.pcb_block_num)
                .map_err(|_| Error::Overflow)?;
        }
        checksum::append(CrcKind::Iso14443b, &mut frame)?;

        self.transmit(&frame, true, TR2_TICKS)?;
        let mut len = self.receive()?;
        let mut resp: heapless::Vec<u8, MAX_FRAME_SIZE> = heapless::Vec::new();
        resp.extend_from_slice(self.demod.frame())
            .map_err(|_| Error::Overflow)?;

        // serve waiting time extensions until a real block arrives
        while len >= 2 && (resp[0] & 0xF2) == 0xF2 {
            let saved_timeout = self.timeout_ticks;
            let wtxm = (resp[1] & 0x3F) as u32;
            self.timeout_ticks = fwt_ticks(self.fwi)
                .saturating_mul(wtxm)
                .min(MAX_TIMEOUT_TICKS);
            debug!("waiting time extension x{}", wtxm);

            let mut wtx_reply: heapless::Vec<u8, 4> = heapless::Vec::new();
            wtx_reply
                .extend_from_slice(&[resp[0], wtxm as u8])
                .map_err(|_| Error::Overflow)?;
            checksum::append(CrcKind::Iso14443b, &mut wtx_reply)?;

            let result = self
                .transmit(&wtx_reply, true, TR2_TICKS)
                .and_then(|_| self.receive());
            len = match result {
                Ok(len) => len,
                Err(_) => {
                    self.timeout_ticks = saved_timeout;
                    return Err(Error::Exchange);
                }
            };
            resp.clear();
            resp.extend_from_slice(self.demod.frame())
                .map_err(|_| Error::Overflow)?;
            self.timeout_ticks = saved_timeout;
        }

        // I-blocks and R(ACK)s carrying our block number flip the toggle
        if len >= 3
            && ((resp[0] & 0xC0) == 0 || (resp[0] & 0xD0) == 0x80)
            && (resp[0] & 0x01) == self.pcb_block_num
        {
            self.pcb_block_num ^= 1;
        }
        let response_byte = resp[0];

        if len >= 3 && !checksum::verify(CrcKind::Iso14443b, &resp) {
            return Err(Error::Checksum);
        }

        let mut out = ApduResponse {
            response_byte,
            data: heapless::Vec::new(),
        };
        out.data
            .extend_from_slice(&resp[1..])
            .map_err(|_| Error::Overflow)?;
        Ok(out)
    }

    /// Transmits raw bytes as a framed command and returns the raw answer.
    ///
    /// With `append_crc` the checksum of `kind` is added first; the
    /// Picopass variant excludes the opcode byte from the computation, as
    /// those cards do.
    pub fn send_raw(
        &mut self,
        data: &[u8],
        append_crc: bool,
        kind: CrcKind,
    ) -> Result<heapless::Vec<u8, MAX_FRAME_SIZE>, Error> {
        let overhead = if append_crc { 2 } else { 0 };
        if data.len() + overhead > self.max_frame_len {
            return Err(Error::Unsupported);
        }
        let mut frame: heapless::Vec<u8, { MAX_FRAME_SIZE + 2 }> = heapless::Vec::new();
        frame.extend_from_slice(data).map_err(|_| Error::Overflow)?;
        if append_crc && !data.is_empty() {
            let crc = match kind {
                CrcKind::Picopass => checksum::compute(kind, &data[1..]),
                CrcKind::Iso14443b => checksum::compute(kind, data),
            };
            frame.push((crc & 0xFF) as u8).map_err(|_| Error::Overflow)?;
            frame.push((crc >> 8) as u8).map_err(|_| Error::Overflow)?;
        }
        self.transmit(&frame, true, TR2_TICKS)?;
        self.receive()?;
        let mut out = heapless::Vec::new();
        out.extend_from_slice(self.demod.frame())
            .map_err(|_| Error::Overflow)?;
        Ok(out)
    }
}
