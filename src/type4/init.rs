//! The Type 4 NDEF discovery/read dialogue (§4.5), ported step-for-step from
//! the response-callback chain in the original `nfc_tag_t4_init_*` functions.
//!
//! `InitState` names what the *next* response is expected to mean; dispatch
//! happens in [`on_response`], a single `match` over it, per the "explicit
//! state-variant" design note. Every failure path converges on
//! [`read_done`], which releases the sequence and reactivates -- the one
//! exception is a failure selecting the NDEF Tag Application itself, where
//! nothing on the card has been touched yet and reactivation is skipped
//! (see [`finish_without_reactivate`]).

use std::rc::Rc;

use log::{debug, trace, warn};

use crate::error::{ReactivateStatus, SW_IO_ERR, SW_NOT_FOUND, SW_OK};
use crate::ndef;
use crate::sequence::Sequence;
use crate::submit::submit;

use super::cc::{self, CapabilityContainer};
use super::{Type4Tag, CC_FID, NDEF_AID};

/// What the in-flight transmission's response means.
pub(crate) enum InitState {
	AwaitingSelectApp,
	AwaitingSelectCc,
	AwaitingReadCc,
	AwaitingSelectNdefFile { cc: CapabilityContainer },
	AwaitingReadNdefLen { cc: CapabilityContainer },
	AwaitingReadNdefBody { cc: CapabilityContainer, declared_len: u16, accum: Vec<u8> },
}

/// Kick off the dialogue. Called once, from [`Type4Tag::new`].
pub(crate) fn start(tag: &Rc<Type4Tag>) {
	if !tag.target.supports_reactivation() {
		debug!("target {} cannot be reactivated, skipping NDEF discovery", tag.target.id());
		finish_without_reactivate(tag);
		return;
	}

	let seq = tag.target.new_sequence();
	tag.state.borrow_mut().init_seq = Some(seq.clone());
	select_ndef_app(tag, seq);
}

fn select_ndef_app(tag: &Rc<Type4Tag>, seq: Sequence) {
	tag.state.borrow_mut().phase = Some(InitState::AwaitingSelectApp);
	let tag_resp = tag.clone();

	let id = submit_step(
		tag,
		0x00,
		0xA4,
		0x04,
		0x00,
		Some(&NDEF_AID),
		0x100,
		seq,
		Box::new(move |sw, payload| on_response(&tag_resp, sw, payload)),
	);
	if id == 0 {
		// Nothing has been selected on the card yet; no need to reactivate.
		warn!("failed to submit NDEF application select on target {}", tag.target.id());
		finish_without_reactivate(tag);
	}
}

fn select_cc(tag: &Rc<Type4Tag>, seq: Sequence) {
	tag.state.borrow_mut().phase = Some(InitState::AwaitingSelectCc);
	let tag_resp = tag.clone();

	let id = submit_step(
		tag,
		0x00,
		0xA4,
		0x00,
		0x0C,
		Some(&CC_FID.to_be_bytes()),
		0,
		seq,
		Box::new(move |sw, payload| on_response(&tag_resp, sw, payload)),
	);
	if id == 0 {
		// Nothing has been selected on the card yet; no need to reactivate.
		warn!("failed to submit Capability Container select on target {}", tag.target.id());
		finish_without_reactivate(tag);
	}
}

fn read_cc(tag: &Rc<Type4Tag>, seq: Sequence) {
	tag.state.borrow_mut().phase = Some(InitState::AwaitingReadCc);
	let tag_resp = tag.clone();

	let id = submit_step(
		tag,
		0x00,
		0xB0,
		0x00,
		0x00,
		None,
		cc::CC_LEN,
		seq,
		Box::new(move |sw, payload| on_response(&tag_resp, sw, payload)),
	);
	if id == 0 {
		read_done(tag);
	}
}

fn select_ndef_file(tag: &Rc<Type4Tag>, seq: Sequence, cc: CapabilityContainer) {
	tag.state.borrow_mut().phase = Some(InitState::AwaitingSelectNdefFile { cc });
	let tag_resp = tag.clone();

	let id = submit_step(
		tag,
		0x00,
		0xA4,
		0x00,
		0x0C,
		Some(&cc.ndef_fid.to_be_bytes()),
		0,
		seq,
		Box::new(move |sw, payload| on_response(&tag_resp, sw, payload)),
	);
	if id == 0 {
		read_done(tag);
	}
}

fn read_ndef_len(tag: &Rc<Type4Tag>, seq: Sequence, cc: CapabilityContainer) {
	tag.state.borrow_mut().phase = Some(InitState::AwaitingReadNdefLen { cc });
	let tag_resp = tag.clone();

	let id = submit_step(
		tag,
		0x00,
		0xB0,
		0x00,
		0x00,
		None,
		2,
		seq,
		Box::new(move |sw, payload| on_response(&tag_resp, sw, payload)),
	);
	if id == 0 {
		read_done(tag);
	}
}

fn read_ndef_body(tag: &Rc<Type4Tag>, seq: Sequence, cc: CapabilityContainer, declared_len: u16, accum: Vec<u8>) {
	let offset = 2usize + accum.len();
	let remaining = declared_len as usize - accum.len();
	let le = remaining.min(cc.max_read as usize);
	let p1 = (offset >> 8) as u8;
	let p2 = offset as u8;

	tag.state.borrow_mut().phase = Some(InitState::AwaitingReadNdefBody { cc, declared_len, accum });
	let tag_resp = tag.clone();

	let id = submit_step(
		tag,
		0x00,
		0xB0,
		p1,
		p2,
		None,
		le,
		seq,
		Box::new(move |sw, payload| on_response(&tag_resp, sw, payload)),
	);
	if id == 0 {
		read_done(tag);
	}
}

/// Dispatch the response according to the phase recorded when the
/// transmission was submitted.
fn on_response(tag: &Rc<Type4Tag>, sw: u16, payload: &[u8]) {
	let phase = tag.state.borrow_mut().phase.take();
	let seq = tag.state.borrow().init_seq.clone();
	let seq = match seq {
		Some(seq) => seq,
		None => return, // the tag was torn down mid-dialogue; nothing left to drive
	};

	match phase {
		Some(InitState::AwaitingSelectApp) => {
			if sw == SW_OK {
				debug!("found NDEF Tag Application on target {}", tag.target.id());
				select_cc(tag, seq);
			}
			else {
				if sw == SW_NOT_FOUND {
					debug!("NDEF Tag Application not found on target {}", tag.target.id());
				}
				else if sw != SW_IO_ERR {
					debug!("NDEF Tag Application selection error {:04X}", sw);
				}
				else {
					debug!("NDEF Tag Application selection I/O error");
				}
				// Nothing was selected; skip reactivation entirely.
				finish_without_reactivate(tag);
			}
		}

		Some(InitState::AwaitingSelectCc) => {
			if sw == SW_OK {
				trace!("NDEF Capability Container selected");
				read_cc(tag, seq);
			}
			else {
				if sw == SW_NOT_FOUND {
					debug!("NDEF Capability Container not found");
				}
				else if sw != SW_IO_ERR {
					debug!("NDEF Capability Container selection error {:04X}", sw);
				}
				else {
					debug!("NDEF Capability Container selection I/O error");
				}
				read_done(tag);
			}
		}

		Some(InitState::AwaitingReadCc) => {
			if sw == SW_OK {
				match cc::parse(payload) {
					Ok(cc) => select_ndef_file(tag, seq, cc),
					Err(err) => {
						debug!("malformed Capability Container: {}", err);
						read_done(tag);
					}
				}
			}
			else if sw != SW_IO_ERR {
				debug!("NDEF Capability Container read error {:04X}", sw);
				read_done(tag);
			}
			else {
				debug!("NDEF Capability Container read I/O error");
				read_done(tag);
			}
		}

		Some(InitState::AwaitingSelectNdefFile { cc }) => {
			if sw == SW_OK {
				debug!("selected NDEF file {:04X}", cc.ndef_fid);
				read_ndef_len(tag, seq, cc);
			}
			else {
				if sw != SW_IO_ERR {
					debug!("NDEF file selection error {:04X}", sw);
				}
				else {
					debug!("NDEF file selection I/O error");
				}
				read_done(tag);
			}
		}

		Some(InitState::AwaitingReadNdefLen { cc }) => {
			if sw == SW_OK && payload.len() == 2 {
				let declared_len = u16::from_be_bytes([payload[0], payload[1]]);
				if declared_len > 0 {
					debug!("reading {} bytes of NDEF data", declared_len);
					read_ndef_body(tag, seq, cc, declared_len, Vec::with_capacity(declared_len as usize));
					return;
				}
				debug!("NDEF is empty");
			}
			else if sw == SW_OK {
				debug!("unexpected number of bytes from NDEF file ({})", payload.len());
			}
			else if sw != SW_IO_ERR {
				debug!("NDEF read error {:04X}", sw);
			}
			else {
				debug!("NDEF read I/O error");
			}
			read_done(tag);
		}

		Some(InitState::AwaitingReadNdefBody { cc, declared_len, mut accum }) => {
			if sw == SW_OK && !payload.is_empty() {
				accum.extend_from_slice(payload);
				if accum.len() < declared_len as usize {
					read_ndef_body(tag, seq, cc, declared_len, accum);
					return;
				}
				match ndef::parse(&accum) {
					Ok(head) => tag.state.borrow_mut().ndef = head,
					Err(err) => debug!("failed to parse NDEF message: {}", err),
				}
			}
			else if sw == SW_OK {
				debug!("empty NDEF read");
			}
			else if sw != SW_IO_ERR {
				debug!("NDEF read error {:04X}", sw);
			}
			else {
				debug!("NDEF read I/O error");
			}
			read_done(tag);
		}

		None => {
			// Response arrived for a transmission that was already superseded
			// (shouldn't happen given the at-most-one-in-flight invariant, but
			// there is nothing useful to do with it).
		}
	}
}

/// The common terminal path for every failure beyond the NDEF Tag Application
/// select itself, and for a successful read: release the sequence, then
/// reactivate the target to restore its default application selection.
fn read_done(tag: &Rc<Type4Tag>) {
	debug!("reactivating target {}", tag.target.id());
	tag.state.borrow_mut().init_id = 0;

	let seq = tag.state.borrow_mut().init_seq.take();
	let seq = match seq {
		Some(seq) => seq,
		None => return,
	};

	let tag_done = tag.clone();
	let mut transport = tag.transport.borrow_mut();
	let accepted = transport.reactivate(
		seq,
		Box::new(move |status| {
			init_done(&tag_done, status);
		}),
	);
	drop(transport);
	if !accepted {
		debug!("failed to reactivate, leaving the tag as is");
		mark_initialized(tag);
	}
}

fn init_done(tag: &Rc<Type4Tag>, status: ReactivateStatus) {
	// Marking the tag initialized after a reactivation timeout makes no sense:
	// the tag is about to be deactivated and dropped right after this returns.
	if status != ReactivateStatus::Timeout {
		mark_initialized(tag);
	}
}

fn finish_without_reactivate(tag: &Rc<Type4Tag>) {
	tag.state.borrow_mut().init_id = 0;
	mark_initialized(tag);
}

fn mark_initialized(tag: &Rc<Type4Tag>) {
	tag.state.borrow_mut().initialized = true;
}

/// Encode and dispatch one command APDU belonging to the init dialogue.
/// Returns the transmission id, or `0` on any submission failure.
#[allow(clippy::too_many_arguments)]
fn submit_step(
	tag: &Rc<Type4Tag>,
	cla: u8,
	ins: u8,
	p1: u8,
	p2: u8,
	data: Option<&[u8]>,
	le: usize,
	seq: Sequence,
	on_response: Box<dyn FnOnce(u16, &[u8])>,
) -> u64 {
	let mut scratch = tag.scratch.take();
	let id = {
		let mut transport = tag.transport.borrow_mut();
		submit(&mut *transport, &mut scratch, cla, ins, p1, p2, data, le, Some(seq), on_response, Box::new(|| {}))
	};
	tag.scratch.replace(scratch);
	if id != 0 {
		tag.state.borrow_mut().init_id = id;
	}
	id
}

#[cfg(test)]
mod tests {
	use std::cell::RefCell;
	use std::rc::Rc;

	use crate::error::IoStatus;
	use crate::ndef::{self, NdefKind};
	use crate::target::{Protocol, Target, Tech};
	use crate::transport::ChannelTransport;
	use crate::type4::Type4Tag;

	fn tag_with_transport() -> (Rc<Type4Tag>, Rc<RefCell<ChannelTransport>>) {
		let target = Rc::new(Target::new(Tech::A, Protocol::T4A, true));
		let transport = Rc::new(RefCell::new(ChannelTransport::new(target.clone())));
		let tag = Type4Tag::new(target, transport.clone(), 256, None);
		(tag, transport)
	}

	fn sample_cc() -> Vec<u8> {
		// MLe = 0x0100 so a short test message never needs chunking.
		vec![0x00, 0x0F, 0x20, 0x01, 0x00, 0x00, 0x34, 0x04, 0x06, 0xE1, 0x04, 0x00, 0x32, 0x00, 0x00]
	}

	#[test]
	fn full_dialogue_reads_a_single_uri_record() {
		let (tag, transport) = tag_with_transport();

		// AID select
		assert_eq!(transport.borrow().outstanding(), 1);
		transport.borrow_mut().pump(IoStatus::Ok, &[0x90, 0x00]);
		// CC select
		transport.borrow_mut().pump(IoStatus::Ok, &[0x90, 0x00]);
		// CC read
		let mut cc_resp = sample_cc();
		cc_resp.extend_from_slice(&[0x90, 0x00]);
		transport.borrow_mut().pump(IoStatus::Ok, &cc_resp);
		// NDEF file select
		transport.borrow_mut().pump(IoStatus::Ok, &[0x90, 0x00]);
		// NDEF length
		let record = ndef::encode_short_record(true, true, &[0x55], &{
			let mut p = vec![0x04];
			p.extend_from_slice(b"example.com");
			p
		});
		let len_bytes = (record.len() as u16).to_be_bytes();
		transport.borrow_mut().pump(IoStatus::Ok, &[len_bytes[0], len_bytes[1], 0x90, 0x00]);
		// NDEF body
		let mut body_resp = record.clone();
		body_resp.extend_from_slice(&[0x90, 0x00]);
		transport.borrow_mut().pump(IoStatus::Ok, &body_resp);

		assert!(!tag.is_initialized());
		assert!(transport.borrow().reactivate_pending());
		transport.borrow_mut().complete_reactivate(crate::error::ReactivateStatus::Done);

		assert!(tag.is_initialized());
		let ndef = tag.ndef();
		let head = ndef.as_ref().expect("one NDEF record expected");
		assert_eq!(head.kind, NdefKind::Uri("https://example.com".to_string()));
	}

	#[test]
	fn app_select_not_found_skips_reactivation() {
		let (tag, transport) = tag_with_transport();
		transport.borrow_mut().pump(IoStatus::Ok, &[0x6A, 0x82]);
		assert!(tag.is_initialized());
		assert!(!transport.borrow().reactivate_pending());
		assert!(tag.ndef().is_none());
	}

	#[test]
	fn cc_select_not_found_still_reactivates() {
		let (tag, transport) = tag_with_transport();
		transport.borrow_mut().pump(IoStatus::Ok, &[0x90, 0x00]); // app select ok
		transport.borrow_mut().pump(IoStatus::Ok, &[0x6A, 0x82]); // cc select not found
		assert!(transport.borrow().reactivate_pending());
		transport.borrow_mut().complete_reactivate(crate::error::ReactivateStatus::Done);
		assert!(tag.is_initialized());
		assert!(tag.ndef().is_none());
	}

	#[test]
	fn short_cc_read_still_reactivates_with_empty_ndef() {
		let (tag, transport) = tag_with_transport();
		transport.borrow_mut().pump(IoStatus::Ok, &[0x90, 0x00]);
		transport.borrow_mut().pump(IoStatus::Ok, &[0x90, 0x00]);
		let mut short_cc = sample_cc();
		short_cc.truncate(13);
		short_cc.extend_from_slice(&[0x90, 0x00]);
		transport.borrow_mut().pump(IoStatus::Ok, &short_cc);
		transport.borrow_mut().complete_reactivate(crate::error::ReactivateStatus::Done);
		assert!(tag.is_initialized());
		assert!(tag.ndef().is_none());
	}

	#[test]
	fn zero_length_ndef_is_empty() {
		let (tag, transport) = tag_with_transport();
		transport.borrow_mut().pump(IoStatus::Ok, &[0x90, 0x00]);
		transport.borrow_mut().pump(IoStatus::Ok, &[0x90, 0x00]);
		let mut cc_resp = sample_cc();
		cc_resp.extend_from_slice(&[0x90, 0x00]);
		transport.borrow_mut().pump(IoStatus::Ok, &cc_resp);
		transport.borrow_mut().pump(IoStatus::Ok, &[0x90, 0x00]);
		transport.borrow_mut().pump(IoStatus::Ok, &[0x00, 0x00, 0x90, 0x00]);
		transport.borrow_mut().complete_reactivate(crate::error::ReactivateStatus::Done);
		assert!(tag.is_initialized());
		assert!(tag.ndef().is_none());
	}

	#[test]
	fn chunked_ndef_body_uses_increasing_offsets() {
		let (tag, transport) = tag_with_transport();
		transport.borrow_mut().pump(IoStatus::Ok, &[0x90, 0x00]);
		transport.borrow_mut().pump(IoStatus::Ok, &[0x90, 0x00]);

		// MLe = 0x0010 so chunking kicks in.
		let mut cc_resp = vec![0x00, 0x0F, 0x20, 0x00, 0x10, 0x00, 0x34, 0x04, 0x06, 0xE1, 0x04, 0x02, 0x00, 0x00, 0x00];
		cc_resp.extend_from_slice(&[0x90, 0x00]);
		transport.borrow_mut().pump(IoStatus::Ok, &cc_resp);
		transport.borrow_mut().pump(IoStatus::Ok, &[0x90, 0x00]);

		let declared_len: u16 = 0x0200;
		transport.borrow_mut().pump(IoStatus::Ok, &[0x02, 0x00, 0x90, 0x00]);

		let mut offsets = Vec::new();
		let mut remaining = declared_len as usize;
		while remaining > 0 {
			let sent = transport.borrow().sent().last().unwrap().clone();
			let offset = ((sent[2] as usize) << 8) | sent[3] as usize;
			offsets.push(offset);
			let chunk = remaining.min(0x10);
			let mut resp = vec![0xAAu8; chunk];
			resp.extend_from_slice(&[0x90, 0x00]);
			transport.borrow_mut().pump(IoStatus::Ok, &resp);
			remaining -= chunk;
		}

		assert_eq!(offsets.len(), 32);
		for pair in offsets.windows(2) {
			assert!(pair[1] > pair[0]);
		}
		transport.borrow_mut().complete_reactivate(crate::error::ReactivateStatus::Done);
		assert!(tag.is_initialized());
	}

	#[test]
	fn reactivation_timeout_skips_marking_initialized() {
		// CC-select failure (not app-select) is used here since app-select
		// failure never reaches the reactivate step at all.
		let (tag, transport) = tag_with_transport();
		transport.borrow_mut().pump(IoStatus::Ok, &[0x90, 0x00]);
		transport.borrow_mut().pump(IoStatus::Ok, &[0x6A, 0x82]);
		assert!(transport.borrow().reactivate_pending());
		transport.borrow_mut().complete_reactivate(crate::error::ReactivateStatus::Timeout);
		assert!(!tag.is_initialized());
	}
}
