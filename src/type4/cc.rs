//! Capability Container parsing and validation (§4.5 "CC validation"), ported
//! from `nfc_iso_dep_ndef_read_new` in the original C implementation.
//!
//! The CC is a fixed 15-byte structure read from file `E103`:
//! `CCLEN:2 MappingVersion:1 MLe:2 MLc:2 T:1 L:2 FID:2 MaxFileSize:2
//! ReadAccess:1 WriteAccess:1`. `CCLEN` is read but not itself validated --
//! the only prerequisite is that the reader handed us at least 15 bytes.

pub const CC_LEN: usize = 15;

/// Reserved FIDs that must never be treated as the NDEF file, independent of
/// what the CC's NDEF-File-Control TLV claims.
const RESERVED_FIDS: [u16; 6] = [0x0000, 0xE102, 0xE103, 0x3F00, 0x3FFF, 0xFFFF];

const MIN_MLE: u16 = 0x000F;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CcError {
	#[error("capability container is {0} bytes, need at least {CC_LEN}")]
	TooShort(usize),
	#[error("unsupported mapping version {major}.{minor}, need major version 2")]
	UnsupportedVersion { major: u8, minor: u8 },
	#[error("NDEF-File-Control TLV tag is 0x{0:02X}, expected 0x04")]
	WrongTlvTag(u8),
	#[error("NDEF-File-Control TLV length is {0}, expected 6")]
	WrongTlvLength(u8),
	#[error("read access byte is 0x{0:02X}, expected 0x00 (granted)")]
	ReadNotGranted(u8),
	#[error("file identifier 0x{0:04X} is reserved")]
	ReservedFid(u16),
	#[error("MLe 0x{0:04X} is below the minimum 0x000F")]
	MleTooSmall(u16),
}

/// A validated Capability Container, stripped down to the fields the dialogue
/// actually needs: where the NDEF file lives and how much one READ_BINARY may
/// ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityContainer {
	pub ndef_fid: u16,
	pub max_file_size: u16,
	pub max_read: u16,
}

/// Parse and validate a Capability Container read from file `E103`.
pub fn parse(cc: &[u8]) -> Result<CapabilityContainer, CcError> {
	if cc.len() < CC_LEN {
		return Err(CcError::TooShort(cc.len()));
	}

	let mapping_version = cc[2];
	let major = mapping_version >> 4;
	let minor = mapping_version & 0x0F;
	if major != 2 {
		return Err(CcError::UnsupportedVersion { major, minor });
	}

	let mle = u16::from_be_bytes([cc[3], cc[4]]);
	let tlv_tag = cc[7];
	let tlv_len = cc[8];
	let fid = u16::from_be_bytes([cc[9], cc[10]]);
	let max_file_size = u16::from_be_bytes([cc[11], cc[12]]);
	let read_access = cc[13];

	if tlv_tag != 0x04 {
		return Err(CcError::WrongTlvTag(tlv_tag));
	}
	if tlv_len != 0x06 {
		return Err(CcError::WrongTlvLength(tlv_len));
	}
	if read_access != 0x00 {
		return Err(CcError::ReadNotGranted(read_access));
	}
	if RESERVED_FIDS.contains(&fid) {
		return Err(CcError::ReservedFid(fid));
	}
	if mle < MIN_MLE {
		return Err(CcError::MleTooSmall(mle));
	}

	Ok(CapabilityContainer { ndef_fid: fid, max_file_size, max_read: mle })
}
