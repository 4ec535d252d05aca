//! A parser for NFC Data Exchange Format messages, producing a singly-linked
//! list of typed records (§3 "Tag": `ndef`; §11 supplemented feature).
//!
//! Unlike a single-string "what does this tag say" reading, downstream
//! consumers dispatch on record type (a URI handler looks only at `Uri`
//! records, a text handler only at `Text`, and so on) -- hence a typed list
//! rather than a single parsed payload. Smart Poster records recurse: their
//! payload is itself a nested NDEF message.

use std::str;

/// NFC Forum Type Name Format values (3-bit field in the record header).
pub mod tnf {
	pub const EMPTY: u8 = 0x00;
	pub const WELL_KNOWN: u8 = 0x01;
	pub const MIME_MEDIA: u8 = 0x02;
	pub const ABSOLUTE_URI: u8 = 0x03;
	pub const EXTERNAL: u8 = 0x04;
	pub const UNKNOWN: u8 = 0x05;
	pub const UNCHANGED: u8 = 0x06;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NdefError {
	#[error("truncated NDEF record")]
	UnexpectedEnd,
	#[error("chunked NDEF records are not supported")]
	ChunkedUnsupported,
	#[error("invalid UTF-8/UTF-16 text in NDEF payload")]
	InvalidText,
}

/// The payload of one NDEF record, decoded by well-known type where recognised.
#[derive(Debug, Clone, PartialEq)]
pub enum NdefKind {
	/// A URI record (type `U`): protocol abbreviation already expanded.
	Uri(String),
	/// A Text record (type `T`).
	Text { lang: String, text: String },
	/// A Smart Poster record (type `Sp`): its payload is a nested NDEF message.
	SmartPoster(Option<Box<NdefRecord>>),
	/// Anything this crate doesn't specifically decode, carried through raw.
	Unknown { tnf: u8, rtype: Vec<u8>, id: Vec<u8>, payload: Vec<u8> },
}

/// One node of the singly-linked NDEF record list.
#[derive(Debug, Clone, PartialEq)]
pub struct NdefRecord {
	pub kind: NdefKind,
	pub next: Option<Box<NdefRecord>>,
}

impl NdefRecord {
	/// Walk the list starting at `self`.
	pub fn iter(&self) -> NdefIter<'_> {
		NdefIter { cur: Some(self) }
	}
}

pub struct NdefIter<'a> {
	cur: Option<&'a NdefRecord>,
}

impl<'a> Iterator for NdefIter<'a> {
	type Item = &'a NdefRecord;

	fn next(&mut self) -> Option<&'a NdefRecord> {
		let node = self.cur.take()?;
		self.cur = node.next.as_deref();
		Some(node)
	}
}

/// Parse a complete NDEF message into the head of a record list. Returns
/// `Ok(None)` for an empty message.
pub fn parse(data: &[u8]) -> Result<Option<Box<NdefRecord>>, NdefError> {
	let mut kinds = Vec::new();
	let mut offset = 0;
	while offset < data.len() {
		let (kind, consumed, message_end) = parse_record(&data[offset..])?;
		offset += consumed;
		kinds.push(kind);
		if message_end {
			break;
		}
	}

	let mut next = None;
	for kind in kinds.into_iter().rev() {
		next = Some(Box::new(NdefRecord { kind, next }));
	}
	Ok(next)
}

fn parse_record(buf: &[u8]) -> Result<(NdefKind, usize, bool), NdefError> {
	let header = *buf.first().ok_or(NdefError::UnexpectedEnd)?;
	let message_end = header & 0x40 != 0;
	let chunked = header & 0x20 != 0;
	let short_record = header & 0x10 != 0;
	let id_present = header & 0x08 != 0;
	let tnf = header & 0x07;

	if chunked {
		return Err(NdefError::ChunkedUnsupported);
	}

	let mut idx = 1usize;
	let type_len = *buf.get(idx).ok_or(NdefError::UnexpectedEnd)? as usize;
	idx += 1;

	let payload_len = if short_record {
		let v = *buf.get(idx).ok_or(NdefError::UnexpectedEnd)? as usize;
		idx += 1;
		v
	}
	else {
		let b = buf.get(idx..idx + 4).ok_or(NdefError::UnexpectedEnd)?;
		idx += 4;
		u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize
	};

	let id_len = if id_present {
		let v = *buf.get(idx).ok_or(NdefError::UnexpectedEnd)? as usize;
		idx += 1;
		v
	}
	else {
		0
	};

	let rtype = buf.get(idx..idx + type_len).ok_or(NdefError::UnexpectedEnd)?.to_vec();
	idx += type_len;

	let id = if id_present {
		let slice = buf.get(idx..idx + id_len).ok_or(NdefError::UnexpectedEnd)?.to_vec();
		idx += id_len;
		slice
	}
	else {
		Vec::new()
	};

	let payload = buf.get(idx..idx + payload_len).ok_or(NdefError::UnexpectedEnd)?.to_vec();
	idx += payload_len;

	let kind = match (tnf, rtype.as_slice()) {
		(tnf::WELL_KNOWN, [0x55]) => NdefKind::Uri(decode_uri(&payload)?),
		(tnf::WELL_KNOWN, [0x54]) => decode_text(&payload)?,
		(tnf::WELL_KNOWN, [0x53, 0x70]) => NdefKind::SmartPoster(parse(&payload)?),
		_ => NdefKind::Unknown { tnf, rtype, id, payload },
	};

	Ok((kind, idx, message_end))
}

fn decode_uri(payload: &[u8]) -> Result<String, NdefError> {
	if payload.is_empty() {
		return Ok(String::new());
	}
	let suffix = str::from_utf8(&payload[1..]).map_err(|_| NdefError::InvalidText)?;
	Ok(format!("{}{}", uri_protocol(payload[0]), suffix))
}

fn decode_text(payload: &[u8]) -> Result<NdefKind, NdefError> {
	let status = *payload.first().ok_or(NdefError::InvalidText)?;
	let utf16 = status & 0x80 != 0;
	let lang_len = (status & 0x3F) as usize;
	let lang_bytes = payload.get(1..1 + lang_len).ok_or(NdefError::InvalidText)?;
	let lang = str::from_utf8(lang_bytes).map_err(|_| NdefError::InvalidText)?.to_owned();
	let text_bytes = payload.get(1 + lang_len..).ok_or(NdefError::InvalidText)?;
	let text = if utf16 {
		if text_bytes.len() % 2 != 0 {
			return Err(NdefError::InvalidText);
		}
		let units: Vec<u16> = text_bytes.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]])).collect();
		String::from_utf16(&units).map_err(|_| NdefError::InvalidText)?
	}
	else {
		str::from_utf8(text_bytes).map_err(|_| NdefError::InvalidText)?.to_owned()
	};
	Ok(NdefKind::Text { lang, text })
}

/// NFC Forum URI record protocol abbreviation table.
fn uri_protocol(identifier: u8) -> &'static str {
	match identifier {
		0x00 => "",
		0x01 => "http://www.",
		0x02 => "https://www.",
		0x03 => "http://",
		0x04 => "https://",
		0x05 => "tel:",
		0x06 => "mailto:",
		0x07 => "ftp://anonymous:anonymous@",
		0x08 => "ftp://ftp.",
		0x09 => "ftps://",
		0x0A => "sftp://",
		0x0B => "smb://",
		0x0C => "nfs://",
		0x0D => "ftp://",
		0x0E => "dav://",
		0x0F => "news:",
		0x10 => "telnet://",
		0x11 => "imap:",
		0x12 => "rtsp://",
		0x13 => "urn:",
		0x14 => "pop:",
		0x15 => "sip:",
		0x16 => "sips:",
		0x17 => "tftp:",
		0x18 => "btspp://",
		0x19 => "btl2cap://",
		0x1A => "btgoep://",
		0x1B => "tcpobex://",
		0x1C => "irdaobex://",
		0x1D => "file://",
		0x1E => "urn:epc:id:",
		0x1F => "urn:epc:tag:",
		0x20 => "urn:epc:pat:",
		0x21 => "urn:epc:raw:",
		0x22 => "urn:epc:",
		0x23 => "urn:nfc:",
		_ => "",
	}
}

/// Build a short (`SR`) well-known-type record header + TYPE_LENGTH/PAYLOAD_LENGTH.
/// Exposed for tests and for callers constructing records to write back to a tag.
pub fn encode_short_record(mb: bool, me: bool, rtype: &[u8], payload: &[u8]) -> Vec<u8> {
	assert!(rtype.len() <= 0xFF && payload.len() <= 0xFF, "encode_short_record only builds SR records");
	let mut header = 0x10 | tnf::WELL_KNOWN; // SR, TNF=well-known
	if mb {
		header |= 0x80;
	}
	if me {
		header |= 0x40;
	}
	let mut out = vec![header, rtype.len() as u8, payload.len() as u8];
	out.extend_from_slice(rtype);
	out.extend_from_slice(payload);
	out
}
