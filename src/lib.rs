//! Core of an NFC tag-access middleware: target transmission sequencing,
//! ISO/IEC 7816-4 APDU framing, and the NFC Forum Type 4 Tag NDEF
//! discovery/read state machine.
//!
//! This crate does not talk to a radio driver or present tag data to a user;
//! it assumes a [`target::Target`] has already been activated and handed to
//! it, and produces a parsed [`ndef::NdefRecord`] list as its output. See
//! [`type4::Type4Tag`] for the entry point.

pub mod apdu;
pub mod error;
pub mod ndef;
pub mod sequence;
pub mod submit;
pub mod target;
pub mod transport;
pub mod type4;

pub use error::{ApduError, IoStatus, ReactivateStatus};
pub use ndef::{NdefKind, NdefRecord};
pub use sequence::Sequence;
pub use target::{Protocol, Target, Tech};
pub use transport::{ChannelTransport, Transport};
pub use type4::{Type4Tag, iso_dep_transmit};
