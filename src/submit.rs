//! The ISO-DEP Submitter (§4.4): builds a command APDU, dispatches it through a
//! [`Transport`] bound to a [`Sequence`], splits the status word off the
//! response, and hands `(sw, payload)` to the caller's continuation.

use crate::apdu;
use crate::error::{IoStatus, SW_IO_ERR};
use crate::sequence::Sequence;
use crate::transport::{OnDestroy, Transport};

/// Submit a single command APDU.
///
/// `scratch` is the tag's reusable encode buffer (§3, §5): reusing it across
/// calls is safe only because of the at-most-one-in-flight invariant and
/// single-threaded cooperative scheduling that the rest of this crate upholds.
///
/// Returns `0` if the encoder rejects `(data, le)`, or if the transport itself
/// declines the transmission (sequencing gate closed, or one already in
/// flight) -- in both cases neither `on_response` nor `on_destroy` runs.
#[allow(clippy::too_many_arguments)]
pub fn submit(
	transport: &mut dyn Transport,
	scratch: &mut Vec<u8>,
	cla: u8,
	ins: u8,
	p1: u8,
	p2: u8,
	data: Option<&[u8]>,
	le: usize,
	seq: Option<Sequence>,
	on_response: Box<dyn FnOnce(u16, &[u8])>,
	on_destroy: OnDestroy,
) -> u64 {
	if apdu::encode_command(scratch, cla, ins, p1, p2, data, le).is_err() {
		return 0;
	}

	let trampoline: crate::transport::OnResponse = Box::new(move |status, raw| {
		if status == IoStatus::Ok {
			let (sw, payload) = apdu::split_response(raw);
			on_response(sw, payload);
		}
		else {
			on_response(SW_IO_ERR, &[]);
		}
	});

	transport.transmit(scratch, seq, trampoline, on_destroy)
}
