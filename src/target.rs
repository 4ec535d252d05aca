//! A handle to an activated contactless target (§3 "Target").

use std::cell::{Cell, RefCell};
use std::num::NonZeroU64;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::sequence::{ArbiterState, Sequence};

/// RF technology the target was activated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tech {
	A,
	B,
	F,
	Unknown,
}

/// Higher-layer protocol negotiated on top of the RF technology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
	T4A,
	T4B,
	NfcDep,
	Other,
}

fn next_target_id() -> u64 {
	static NEXT: AtomicU64 = AtomicU64::new(1);
	NEXT.fetch_add(1, Ordering::Relaxed)
}

/// A handle to an activated card. Owns no transport of its own: transports and
/// sequences key off [`Target::id`] to find the right queue/arbiter state.
///
/// `Target` is intentionally not `Send`/`Sync`-friendly in spirit (it is meant to
/// be confined to one run-loop, per §5), though nothing here prevents moving it
/// between threads as long as the caller upholds that confinement itself.
pub struct Target {
	id: u64,
	tech: Tech,
	protocol: Protocol,
	supports_reactivation: bool,
	in_flight: Cell<Option<NonZeroU64>>,
	arbiter: Rc<RefCell<ArbiterState>>,
}

impl Target {
	pub fn new(tech: Tech, protocol: Protocol, supports_reactivation: bool) -> Self {
		Target {
			id: next_target_id(),
			tech,
			protocol,
			supports_reactivation,
			in_flight: Cell::new(None),
			arbiter: ArbiterState::new(),
		}
	}

	/// Start a new atomic sequence on this target (§4.3). There must be no other
	/// sequence already active on it.
	pub fn new_sequence(&self) -> Sequence {
		Sequence::new(self.arbiter.clone())
	}

	pub(crate) fn arbiter(&self) -> &Rc<RefCell<ArbiterState>> {
		&self.arbiter
	}

	pub fn id(&self) -> u64 {
		self.id
	}

	pub fn tech(&self) -> Tech {
		self.tech
	}

	pub fn protocol(&self) -> Protocol {
		self.protocol
	}

	pub fn supports_reactivation(&self) -> bool {
		self.supports_reactivation
	}

	/// Record that a transmission is now in flight. Debug-asserts the
	/// at-most-one-outstanding-transmission invariant (§3 Invariants, §8 property 4).
	pub(crate) fn mark_in_flight(&self, id: NonZeroU64) {
		debug_assert!(
			self.in_flight.get().is_none(),
			"at most one Transmission may be outstanding per Target"
		);
		self.in_flight.set(Some(id));
	}

	pub(crate) fn clear_in_flight(&self, id: NonZeroU64) {
		if self.in_flight.get() == Some(id) {
			self.in_flight.set(None);
		}
	}

	pub fn has_in_flight(&self) -> bool {
		self.in_flight.get().is_some()
	}
}
