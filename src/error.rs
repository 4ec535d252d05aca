use std::fmt;

/// Outcome of a raw transport exchange, as reported by [`crate::transport::Transport`].
///
/// `Ok` means "the card answered"; the two bytes of the status word are still part
/// of the raw response at that point and get split off by the submitter. Everything
/// else is a transport-level failure that never reaches the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
	Ok,
	IoErr,
	Timeout,
}

impl fmt::Display for IoStatus {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			IoStatus::Ok => write!(f, "ok"),
			IoStatus::IoErr => write!(f, "I/O error"),
			IoStatus::Timeout => write!(f, "timeout"),
		}
	}
}

/// Synthetic status word used whenever the transport reports anything other than
/// `IoStatus::Ok`, or a response is malformed (too short / absurdly long).
///
/// This value never occurs on the wire (real SW1 bytes from a card are always in
/// `0x6x`/`0x9x` ranges used by ISO/IEC 7816-4); it exists purely so callers can
/// treat it uniformly alongside card-reported status words.
pub const SW_IO_ERR: u16 = 0x0000;

/// Card-reported "command completed normally".
pub const SW_OK: u16 = 0x9000;

/// Card-reported "application or file not found" (used at AID-select and CC-select).
pub const SW_NOT_FOUND: u16 = 0x6A82;

/// Outcome of a `Transport::reactivate` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactivateStatus {
	Done,
	Timeout,
	Err,
}

/// Errors from the APDU encoder. These are the only errors in this crate that
/// escape as a `Result` to a caller outside the initialization state machine: see
/// §7 for why the state machine itself never surfaces a `Result` (it absorbs
/// every failure and proceeds to the next state).
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum ApduError {
	#[error("command data too long: {0} bytes (max 0xFFFF)")]
	LcTooLarge(usize),
	#[error("expected response length too large: {0} (max 0x10000)")]
	LeTooLarge(usize),
}
