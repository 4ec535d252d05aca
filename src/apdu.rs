//! ISO/IEC 7816-4 command APDU encoding and response APDU splitting.
//!
//! The encoder picks one of the seven wire shapes (Cases 1, 2s, 3s, 4s, 2e, 3e, 4e)
//! purely from the lengths of the command data (`Lc`) and the expected response
//! length (`Le`); see §4.1 for the full table.

use crate::error::ApduError;

/// Maximum command data length (`Lc`) the encoder will accept.
pub const MAX_LC: usize = 0xFFFF;
/// Maximum expected response length (`Le`) the encoder will accept. `0x10000`
/// means "read everything", matching the extended-Le escape value `0000`.
pub const MAX_LE: usize = 0x10000;

/// Encode a command APDU into `buf`, replacing its contents.
///
/// `data` is the command body (`Lc` bytes); `le` is the expected response length,
/// `0` meaning "no response data expected". On failure `buf` is cleared and an
/// error is returned; the caller (the submitter, §4.4) treats this exactly like
/// any other "submit failed" condition.
pub fn encode_command(
	buf: &mut Vec<u8>,
	cla: u8,
	ins: u8,
	p1: u8,
	p2: u8,
	data: Option<&[u8]>,
	le: usize,
) -> Result<(), ApduError> {
	let data = data.unwrap_or(&[]);
	let lc = data.len();

	if lc > MAX_LC {
		buf.clear();
		return Err(ApduError::LcTooLarge(lc));
	}
	if le > MAX_LE {
		buf.clear();
		return Err(ApduError::LeTooLarge(le));
	}

	buf.clear();
	buf.push(cla);
	buf.push(ins);
	buf.push(p1);
	buf.push(p2);

	if lc > 0 {
		if lc <= 0xFF {
			// Cases 3s / 4s
			buf.push(lc as u8);
		}
		else {
			// Cases 3e / 4e
			buf.push(0);
			buf.push((lc >> 8) as u8);
			buf.push(lc as u8);
		}
		buf.extend_from_slice(data);
	}

	if le > 0 {
		if le <= 0x100 && lc <= 0xFF {
			// Cases 2s / 4s. Le=0 means 256.
			let le_byte = if le == 0x100 { 0 } else { le as u8 };
			buf.push(le_byte);
		}
		else {
			// Cases 2e / 4e. Both bytes zero means 65536.
			if lc == 0 {
				// Case 2e: the extended-length escape hasn't been written yet.
				buf.push(0);
			}
			if le == 0x10000 {
				buf.push(0);
				buf.push(0);
			}
			else {
				buf.push((le >> 8) as u8);
				buf.push(le as u8);
			}
		}
	}

	Ok(())
}

/// Split a raw response APDU into its status word and payload.
///
/// Responses shorter than 2 bytes, or longer than [`MAX_LE`], are malformed and
/// mapped to the synthetic `SW_IO_ERR` status word with an empty payload (§4.1).
pub fn split_response(response: &[u8]) -> (u16, &[u8]) {
	if response.len() < 2 || response.len() > MAX_LE {
		return (crate::error::SW_IO_ERR, &[]);
	}
	let split_at = response.len() - 2;
	let sw = ((response[split_at] as u16) << 8) | response[split_at + 1] as u16;
	(sw, &response[..split_at])
}
