//! The NFC Forum Type 4 Tag: a [`Target`] plus the NDEF discovery/read state
//! machine (§3 "Type 4 Tag", §4.5), grounded on `nfc_tag_t4_init_base` /
//! `nfc_tag_t4_finalize`. Implemented as composition, never inheritance (§9
//! "Inheritance" design note): `Type4Tag` *has* a `Target`.

mod cc;
mod init;

pub use cc::{CapabilityContainer, CcError};

use std::cell::{Ref, RefCell};
use std::rc::Rc;

use crate::ndef::NdefRecord;
use crate::sequence::Sequence;
use crate::submit::submit;
use crate::target::Target;
use crate::transport::Transport;

/// NDEF Tag Application AID (NFCForum-TS-Type-4-Tag_2.0, Table 9), selected
/// by DF name at the start of discovery.
pub const NDEF_AID: [u8; 7] = [0xD2, 0x76, 0x00, 0x00, 0x85, 0x01, 0x01];
/// File id of the Capability Container, selected by id (Table 12).
pub const CC_FID: u16 = 0xE103;

struct TagState {
	init_seq: Option<Sequence>,
	phase: Option<init::InitState>,
	init_id: u64,
	ndef: Option<Box<NdefRecord>>,
	initialized: bool,
}

/// A Target plus its Type-4-specific state (§3): the frame-size ceiling
/// negotiated at activation, the raw activation parameters, and (once
/// initialization completes) the parsed NDEF record list.
pub struct Type4Tag {
	target: Rc<Target>,
	mtu: usize,
	iso_dep: Option<Box<[u8]>>,
	transport: Rc<RefCell<dyn Transport>>,
	scratch: RefCell<Vec<u8>>,
	state: RefCell<TagState>,
}

impl Type4Tag {
	/// Construct a tag around an already-activated `target` and its
	/// `transport`, and kick off NDEF discovery immediately (mirrors
	/// `nfc_tag_t4_init_base`, including the precondition gate: if the
	/// transport can't reactivate the target, discovery is skipped outright).
	///
	/// `iso_dep` carries the activation-time layer-1/2 parameters (T1 for
	/// technology A, HLR for technology B) the driver handed back; `None` if
	/// there were none.
	pub fn new(target: Rc<Target>, transport: Rc<RefCell<dyn Transport>>, mtu: usize, iso_dep: Option<Vec<u8>>) -> Rc<Type4Tag> {
		let tag = Rc::new(Type4Tag {
			target,
			mtu,
			iso_dep: iso_dep.map(Vec::into_boxed_slice),
			transport,
			scratch: RefCell::new(Vec::new()),
			state: RefCell::new(TagState {
				init_seq: None,
				phase: None,
				init_id: 0,
				ndef: None,
				initialized: false,
			}),
		});
		init::start(&tag);
		tag
	}

	pub fn target(&self) -> &Rc<Target> {
		&self.target
	}

	/// The frame-size ceiling negotiated during activation (FSC/FSD).
	pub fn mtu(&self) -> usize {
		self.mtu
	}

	/// Activation-time layer-1/2 parameters retained for the tag's lifetime.
	pub fn iso_dep(&self) -> Option<&[u8]> {
		self.iso_dep.as_deref()
	}

	/// Whether the init dialogue (or the immediate skip path) has completed.
	pub fn is_initialized(&self) -> bool {
		self.state.borrow().initialized
	}

	/// The parsed NDEF record list, if any. Populated at most once, at the
	/// end of initialization (§3 Invariants).
	pub fn ndef(&self) -> Ref<'_, Option<Box<NdefRecord>>> {
		Ref::map(self.state.borrow(), |s| &s.ndef)
	}
}

impl Drop for Type4Tag {
	/// Mirrors `nfc_tag_t4_finalize`: cancel any in-flight transmission and
	/// drop the transient read state, independently of whether
	/// initialization ever completed.
	fn drop(&mut self) {
		let mut state = self.state.borrow_mut();
		if state.init_id != 0 {
			self.transport.borrow_mut().cancel(state.init_id);
			state.init_id = 0;
		}
		state.phase = None;
		state.init_seq = None;
	}
}

/// The public pass-through APDU channel (§4.4, §6): behaves exactly like the
/// internal submitter, except a `None` tag always returns `0` without
/// invoking either callback.
#[allow(clippy::too_many_arguments)]
pub fn iso_dep_transmit(
	tag: Option<&Rc<Type4Tag>>,
	cla: u8,
	ins: u8,
	p1: u8,
	p2: u8,
	data: Option<&[u8]>,
	le: usize,
	seq: Option<Sequence>,
	on_response: Box<dyn FnOnce(u16, &[u8])>,
	on_destroy: Box<dyn FnOnce()>,
) -> u64 {
	let tag = match tag {
		Some(tag) => tag,
		None => return 0,
	};

	let mut scratch = tag.scratch.take();
	let id = {
		let mut transport = tag.transport.borrow_mut();
		submit(&mut *transport, &mut scratch, cla, ins, p1, p2, data, le, seq, on_response, on_destroy)
	};
	tag.scratch.replace(scratch);
	id
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::IoStatus;
	use crate::target::{Protocol, Tech};
	use crate::transport::ChannelTransport;

	#[test]
	fn tag_without_reactivation_support_is_initialized_immediately() {
		let target = Rc::new(Target::new(Tech::A, Protocol::T4A, false));
		let transport = Rc::new(RefCell::new(ChannelTransport::new(target.clone())));
		let tag = Type4Tag::new(target, transport.clone(), 256, None);
		assert!(tag.is_initialized());
		assert!(tag.ndef().is_none());
		assert_eq!(transport.borrow().outstanding(), 0);
	}

	#[test]
	fn drop_cancels_outstanding_transmission() {
		let target = Rc::new(Target::new(Tech::A, Protocol::T4A, true));
		let transport = Rc::new(RefCell::new(ChannelTransport::new(target.clone())));
		let tag = Type4Tag::new(target, transport.clone(), 256, None);
		assert_eq!(transport.borrow().outstanding(), 1);
		drop(tag);
		assert_eq!(transport.borrow().outstanding(), 0);
	}

	#[test]
	fn iso_dep_transmit_with_no_tag_returns_zero() {
		let called = Rc::new(std::cell::RefCell::new(false));
		let called_clone = called.clone();
		let id = iso_dep_transmit(
			None,
			0,
			0xB0,
			0,
			0,
			None,
			15,
			None,
			Box::new(move |_, _| *called_clone.borrow_mut() = true),
			Box::new(|| {}),
		);
		assert_eq!(id, 0);
		assert!(!*called.borrow());
	}

	#[test]
	fn iso_dep_transmit_passes_through_to_transport() {
		let target = Rc::new(Target::new(Tech::A, Protocol::T4A, false));
		let transport = Rc::new(RefCell::new(ChannelTransport::new(target.clone())));
		let tag = Type4Tag::new(target, transport.clone(), 256, None);
		assert!(tag.is_initialized()); // no reactivation support, nothing in flight

		let seen = Rc::new(std::cell::RefCell::new(None));
		let seen_clone = seen.clone();
		let id = iso_dep_transmit(
			Some(&tag),
			0x00,
			0xB0,
			0x00,
			0x00,
			None,
			15,
			None,
			Box::new(move |sw, payload| *seen_clone.borrow_mut() = Some((sw, payload.to_vec()))),
			Box::new(|| {}),
		);
		assert_ne!(id, 0);
		transport.borrow_mut().pump(IoStatus::Ok, &[0x90, 0x00]);
		assert_eq!(*seen.borrow(), Some((0x9000, Vec::new())));
	}
}
