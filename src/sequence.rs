//! The Sequence Arbiter (§4.3): a cooperative, reference-counted lock that groups
//! related transmissions into an atomic, non-interleaved group.

use std::cell::RefCell;
use std::rc::Rc;

/// Per-target arbiter state. One of these lives inside every [`crate::target::Target`].
///
/// `active` names the sequence currently allowed to dispatch. A transmission
/// tagged with any other sequence (or with none, while a sequence is active)
/// is simply rejected by the Transport -- see `admits`.
pub struct ArbiterState {
	active: Option<u64>,
	next_id: u64,
}

impl ArbiterState {
	pub fn new() -> Rc<RefCell<ArbiterState>> {
		Rc::new(RefCell::new(ArbiterState { active: None, next_id: 0 }))
	}

	fn alloc_id(&mut self) -> u64 {
		self.next_id += 1;
		self.next_id
	}

	/// True iff a transmission tagged with `seq` may be dispatched right now.
	/// Sequenced transmissions are admitted when their own sequence is active or
	/// no sequence is active; unsequenced transmissions only when none is active.
	pub fn admits(&self, seq: Option<u64>) -> bool {
		match (self.active, seq) {
			// No sequence active: anything may start. A sequenced caller will
			// already have become active via `Sequence::new` before reaching
			// this check in practice.
			(None, _) => true,
			(Some(active), Some(s)) => active == s,
			(Some(_active), None) => false,
		}
	}
}

struct SequenceInner {
	id: u64,
	arbiter: Rc<RefCell<ArbiterState>>,
}

impl Drop for SequenceInner {
	fn drop(&mut self) {
		let mut state = self.arbiter.borrow_mut();
		if state.active == Some(self.id) {
			state.active = None;
		}
	}
}

/// A reference-counted handle binding a group of transmissions into one atomic
/// sequence (§3 "Sequence", §4.3). Cloning increments the reference count; the
/// active-sequence slot on the target clears only when the last clone drops.
#[derive(Clone)]
pub struct Sequence(Rc<SequenceInner>);

impl Sequence {
	/// Start a new sequence on the target that owns `arbiter`. There must be no
	/// other sequence currently active on that target -- the init state machine
	/// is the only caller that creates a sequence at tag-construction time, before
	/// any other dialogue on the same target could be in progress.
	pub fn new(arbiter: Rc<RefCell<ArbiterState>>) -> Self {
		let id = {
			let mut state = arbiter.borrow_mut();
			debug_assert!(state.active.is_none(), "a sequence is already active on this target");
			let id = state.alloc_id();
			state.active = Some(id);
			id
		};
		Sequence(Rc::new(SequenceInner { id, arbiter }))
	}

	pub fn id(&self) -> u64 {
		self.0.id
	}

	pub(crate) fn arbiter(&self) -> &Rc<RefCell<ArbiterState>> {
		&self.0.arbiter
	}
}

impl PartialEq for Sequence {
	fn eq(&self, other: &Self) -> bool {
		self.id() == other.id()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sequence_is_active_until_all_clones_drop() {
		let arbiter = ArbiterState::new();
		let seq = Sequence::new(arbiter.clone());
		assert!(arbiter.borrow().admits(Some(seq.id())));
		assert!(!arbiter.borrow().admits(None));

		let seq2 = seq.clone();
		drop(seq);
		// Still held by seq2.
		assert!(arbiter.borrow().admits(Some(seq2.id())));
		assert!(!arbiter.borrow().admits(None));

		drop(seq2);
		assert!(arbiter.borrow().active.is_none());
		assert!(arbiter.borrow().admits(None));
	}

	#[test]
	fn unsequenced_admitted_only_when_nothing_active() {
		let arbiter = ArbiterState::new();
		assert!(arbiter.borrow().admits(None));
		let seq = Sequence::new(arbiter.clone());
		assert!(!arbiter.borrow().admits(None));
		drop(seq);
		assert!(arbiter.borrow().admits(None));
	}
}
