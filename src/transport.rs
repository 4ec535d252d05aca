//! The Target Transport (§4.2): serializes raw byte exchanges with a single
//! contactless target, and supports cancellation and reactivation.

use std::collections::VecDeque;
use std::num::NonZeroU64;
use std::rc::Rc;

use log::{debug, warn};

use crate::error::{IoStatus, ReactivateStatus};
use crate::sequence::Sequence;
use crate::target::Target;

/// Invoked exactly once with the raw response bytes (including the trailing SW
/// when `status == IoStatus::Ok`), or an empty slice otherwise.
pub type OnResponse = Box<dyn FnOnce(IoStatus, &[u8])>;
/// Invoked exactly once, after `OnResponse` (or instead of it, on cancellation).
pub type OnDestroy = Box<dyn FnOnce()>;
/// Invoked exactly once when a `reactivate` call completes.
pub type OnReactivate = Box<dyn FnOnce(ReactivateStatus)>;

/// The Transport contract (§4.2). `transmit`/`reactivate` are suspension points:
/// an implementation may resolve them synchronously (calling back before
/// returning) or asynchronously (queuing and resolving later from a run-loop);
/// see §5.
pub trait Transport {
	/// The target this transport drives. Used by the submitter/state machine to
	/// read target-level state (technology, reactivation capability, arbiter).
	fn target(&self) -> &Target;

	/// Submit `bytes` for transmission. Returns a non-zero opaque id on success,
	/// zero on immediate failure (e.g. another transmission already in flight, or
	/// the sequencing gate rejects it).
	fn transmit(&mut self, bytes: &[u8], seq: Option<Sequence>, on_response: OnResponse, on_destroy: OnDestroy) -> u64;

	/// Abandon a still-pending transmission. `on_response` must not fire for it;
	/// `on_destroy` still runs (possibly synchronously, from within this call).
	fn cancel(&mut self, id: u64);

	/// Perform an RF-level reactivation. Returns `false` if the transport does
	/// not support it (callers should treat that like `TIMEOUT`/`ERR` per the
	/// contract if they ever call this when `Target::supports_reactivation` is
	/// false, though the init state machine never does -- see §4.5).
	fn reactivate(&mut self, seq: Sequence, on_complete: OnReactivate) -> bool;
}

struct PendingExchange {
	id: NonZeroU64,
	on_response: Option<OnResponse>,
	on_destroy: Option<OnDestroy>,
}

/// A `VecDeque`-backed transport for tests and simulation: `transmit` enqueues
/// the exchange (as if it had gone out over the air) and returns immediately;
/// [`ChannelTransport::pump`] delivers the oldest outstanding response, giving
/// test scripts full control over ordering and status words.
pub struct ChannelTransport {
	target: Rc<Target>,
	next_id: u64,
	queue: VecDeque<PendingExchange>,
	sent: Vec<Vec<u8>>,
	reactivate_cb: Option<OnReactivate>,
}

impl ChannelTransport {
	pub fn new(target: Rc<Target>) -> Self {
		ChannelTransport {
			target,
			next_id: 0,
			queue: VecDeque::new(),
			sent: Vec::new(),
			reactivate_cb: None,
		}
	}

	/// The raw bytes of every `transmit` call so far, in submission order.
	pub fn sent(&self) -> &[Vec<u8>] {
		&self.sent
	}

	pub fn outstanding(&self) -> usize {
		self.queue.len()
	}

	/// Deliver the oldest outstanding response. Panics if nothing is outstanding,
	/// since that always indicates a test script bug.
	pub fn pump(&mut self, status: IoStatus, payload: &[u8]) {
		let exch = self.queue.pop_front().expect("pump: no outstanding transmission");
		self.target.clear_in_flight(exch.id);
		if let Some(on_response) = exch.on_response {
			on_response(status, payload);
		}
		if let Some(on_destroy) = exch.on_destroy {
			on_destroy();
		}
	}

	/// Resolve the pending `reactivate` call.
	pub fn complete_reactivate(&mut self, status: ReactivateStatus) {
		let cb = self.reactivate_cb.take().expect("complete_reactivate: no pending reactivate");
		cb(status);
	}

	pub fn reactivate_pending(&self) -> bool {
		self.reactivate_cb.is_some()
	}
}

impl Transport for ChannelTransport {
	fn target(&self) -> &Target {
		&self.target
	}

	fn transmit(&mut self, bytes: &[u8], seq: Option<Sequence>, on_response: OnResponse, on_destroy: OnDestroy) -> u64 {
		if self.target.has_in_flight() {
			warn!("transmit rejected: a transmission is already in flight");
			return 0;
		}
		let admitted = match &seq {
			Some(s) => s.arbiter().borrow().admits(Some(s.id())),
			None => self.target.arbiter().borrow().admits(None),
		};
		if !admitted {
			debug!("transmit rejected: sequencing gate closed");
			return 0;
		}

		self.next_id += 1;
		let id = NonZeroU64::new(self.next_id).expect("id counter starts at 1");
		self.target.mark_in_flight(id);
		self.sent.push(bytes.to_vec());
		self.queue.push_back(PendingExchange {
			id,
			on_response: Some(on_response),
			on_destroy: Some(on_destroy),
		});
		id.get()
	}

	fn cancel(&mut self, id: u64) {
		let id = match NonZeroU64::new(id) {
			Some(id) => id,
			None => return,
		};
		if let Some(pos) = self.queue.iter().position(|e| e.id == id) {
			let mut exch = self.queue.remove(pos).expect("position just found");
			self.target.clear_in_flight(id);
			// The response callback must not fire on a cancelled transmission.
			exch.on_response = None;
			if let Some(on_destroy) = exch.on_destroy.take() {
				on_destroy();
			}
		}
	}

	fn reactivate(&mut self, seq: Sequence, on_complete: OnReactivate) -> bool {
		debug!("reactivating target {}", self.target.id());
		// Reactivation happens only after the dialogue's own sequence has been
		// released (see type4::init); holding on to `seq` here would be a bug,
		// so we simply drop it once accepted.
		drop(seq);
		self.reactivate_cb = Some(on_complete);
		true
	}
}

/// A synchronous, PC/SC-card-backed transport: `transmit`/`reactivate` resolve
/// inline, within the call itself, which is a legal (if degenerate) run-loop per
/// §5, in the style of a typical blocking `Card::transmit` PC/SC adapter.
///
/// Caveat: because resolution is inline, a response callback that itself calls
/// back into the *same* `Rc<RefCell<dyn Transport>>` (as the Type 4 init
/// dialogue does, to submit its next step) will hit `RefCell`'s already-borrowed
/// panic if driven directly off this transport -- `transmit` can't release its
/// `&mut self` borrow until the callback it just invoked returns. A production
/// adapter built on this transport should perform the blocking `pcsc` call on a
/// worker thread and feed the result back into the single-threaded core on the
/// next run-loop tick (like `ChannelTransport` does with `pump`), rather than
/// resolving it in-line from inside the core's own call stack.
#[cfg(feature = "pcsc")]
pub struct PcscTransport {
	target: Rc<Target>,
	card: pcsc::Card,
}

#[cfg(feature = "pcsc")]
impl PcscTransport {
	pub fn new(target: Rc<Target>, card: pcsc::Card) -> Self {
		PcscTransport { target, card }
	}
}

#[cfg(feature = "pcsc")]
impl Transport for PcscTransport {
	fn target(&self) -> &Target {
		&self.target
	}

	fn transmit(&mut self, bytes: &[u8], seq: Option<Sequence>, on_response: OnResponse, on_destroy: OnDestroy) -> u64 {
		if self.target.has_in_flight() {
			return 0;
		}
		let admitted = match &seq {
			Some(s) => s.arbiter().borrow().admits(Some(s.id())),
			None => self.target.arbiter().borrow().admits(None),
		};
		if !admitted {
			return 0;
		}

		let id = NonZeroU64::new(1).unwrap();
		self.target.mark_in_flight(id);

		let mut rapdu_buf = [0u8; pcsc::MAX_BUFFER_SIZE];
		let result = self.card.transmit(bytes, &mut rapdu_buf);
		self.target.clear_in_flight(id);

		match result {
			Ok(response) => on_response(IoStatus::Ok, response),
			Err(err) => {
				warn!("pcsc transmit failed: {}", err);
				on_response(IoStatus::IoErr, &[]);
			}
		}
		on_destroy();
		1
	}

	fn cancel(&mut self, _id: u64) {
		// PcscTransport resolves synchronously, so by the time a caller could
		// observe an id there is nothing left in flight to cancel.
	}

	fn reactivate(&mut self, seq: Sequence, on_complete: OnReactivate) -> bool {
		drop(seq);
		match self.card.reconnect(
			pcsc::ShareMode::Shared,
			pcsc::Protocols::ANY,
			pcsc::DisconnectDisposition::ResetCard,
		) {
			Ok(()) => on_complete(ReactivateStatus::Done),
			Err(pcsc::Error::RemovedCard) | Err(pcsc::Error::ResetCard) => {
				on_complete(ReactivateStatus::Timeout)
			}
			Err(err) => {
				warn!("reactivation failed: {}", err);
				on_complete(ReactivateStatus::Err)
			}
		}
		true
	}
}
