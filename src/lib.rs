//! # iso14b
//!
//! A portable, no_std software modem and link layer for ISO 14443 Type B
//! proximity cards, written for reader hardware that exposes a quadrature
//! sample stream instead of a hardwired NFC controller.
//!
//! The crate implements the 106 kbit/s bit layer in pure software:
//! - reader-to-card ASK framing (10-bit characters, SOF/EOF sequencing)
//! - card-to-reader BPSK subcarrier demodulation from quantised I/Q pairs
//! - guard times, frame waiting times and transmit scheduling on a
//!   3.39 MHz tick grid (32 ticks per ETU)
//!
//! On top of the bit layer sit three roles:
//! - **Reader** ([`link::Session`]): selection of standard Type B, SRx,
//!   ASK CTS, Xerox and Picopass cards, ISO 14443-4 block exchange with
//!   waiting-time extensions, raw frame exchange.
//! - **Tag** ([`sim::TagSim`]): a simulated Type B card answering the
//!   activation dialogue.
//! - **Sniffer** ([`sniff::Sniffer`]): passive capture of both directions
//!   from a single sample stream.
//!
//! All hardware access goes through the traits in [`hal`]; `embedded-hal`
//! output pins are supported for indicator LEDs and nothing else is
//! assumed about the platform.
//!
//! ## Crate features
//! | Feature | Description |
//! |---------|-------------|
//! | `std`   | Implements `std::error::Error` on [`Error`] and enables `log`'s std support |
//!
//! ## Usage
//!
//! ```ignore
//! use iso14b::channel::Channel;
//! use iso14b::link::Session;
//!
//! let ch = Channel::new(transport, radio, clock, trace, diag, cancel);
//! let mut session = Session::new(ch);
//! session.connect();
//! let card = session.select_standard()?;
//! let answer = session.exchange_apdu(&[0x00, 0xA4, 0x04, 0x00], false)?;
//! session.disconnect();
//! ```
//!
//! ## Integration notes
//!
//! - The tick clock must run at carrier/4 (3.39 MHz); every guard time in
//!   [`consts`] is expressed on that grid.
//! - The transport delivers hard-sliced line levels in tag role and I/Q
//!   pairs in reader and sniff roles; see [`hal::Sample`].
//! - Decoders are pure state machines and can be driven sample by sample
//!   from an interrupt handler or a DMA drain loop alike.

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

pub mod channel;
pub mod checksum;
pub mod command;
pub mod consts;
pub mod demod;
pub mod encode;
pub mod error;
pub mod hal;
pub mod link;
pub mod sim;
pub mod sniff;
pub mod uart;

#[cfg(test)]
mod testutil;

pub use channel::Channel;
pub use error::{Error, Status};
pub use link::Session;
pub use sim::TagSim;
pub use sniff::Sniffer;
