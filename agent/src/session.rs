//! A client session: the four-stream complex plus object tree belonging
//! to one client (spec §4.3, §3). `ClientSession` is the unit the
//! per-session mutex (spec §5) guards; `Root` (in `root.rs`) only ever
//! holds it behind that lock.

use std::time::{Duration, Instant};

use collections::map::{self, Map};
use wire::SeqNum;

use crate::object_tree::ObjectTree;
use crate::stream::{BestEffortStream, ReliableInputStream, ReliableOutputStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
	None,
	BestEffort,
	Reliable,
}

impl StreamKind {
	pub fn of(stream_id: u8) -> Self {
		match stream_id {
			0 => Self::None,
			1..=127 => Self::BestEffort,
			128..=255 => Self::Reliable,
		}
	}
}

pub enum InputStream {
	None,
	BestEffort(BestEffortStream),
	Reliable(ReliableInputStream),
}

/// A best-effort sender has no acknowledgment and no window; it only
/// needs to hand out the next seq.
#[derive(Debug, Default)]
pub struct BestEffortSender {
	next: SeqNum,
}

impl BestEffortSender {
	pub fn next_seq(&mut self) -> SeqNum {
		let seq = self.next;
		self.next = self.next.succ();
		seq
	}
}

pub enum OutputStream {
	None,
	BestEffort(BestEffortSender),
	Reliable(ReliableOutputStream),
}

/// One client's full runtime state: session identity, its streams, and
/// its object tree. Everything here is owned exclusively by whichever
/// thread currently holds the session's mutex (see `root::Root`).
pub struct ClientSession {
	pub client_key: u32,
	pub session_id: u8,
	pub mtu: u16,
	inputs: Map<u8, InputStream>,
	outputs: Map<u8, OutputStream>,
	pub objects: ObjectTree,
	last_activity: Instant,
	/// Partial FRAGMENT reassembly buffers, keyed by stream_id (spec §4.5).
	fragment_buffers: Map<u8, Vec<u8>>,
}

impl ClientSession {
	pub fn new(client_key: u32, session_id: u8, mtu: u16) -> Self {
		Self {
			client_key,
			session_id,
			mtu,
			inputs: map::new(),
			outputs: map::new(),
			objects: ObjectTree::new(),
			last_activity: Instant::now(),
			fragment_buffers: map::new(),
		}
	}

	pub fn touch(&mut self) {
		self.last_activity = Instant::now();
	}

	pub fn is_expired(&self, timeout: Duration) -> bool {
		self.last_activity.elapsed() >= timeout
	}

	pub fn input_mut(&mut self, stream_id: u8) -> &mut InputStream {
		self.inputs.entry(stream_id).or_insert_with(|| match StreamKind::of(stream_id) {
			StreamKind::None => InputStream::None,
			StreamKind::BestEffort => InputStream::BestEffort(BestEffortStream::new()),
			StreamKind::Reliable => InputStream::Reliable(ReliableInputStream::new()),
		})
	}

	pub fn output_mut(&mut self, stream_id: u8) -> &mut OutputStream {
		self.outputs.entry(stream_id).or_insert_with(|| match StreamKind::of(stream_id) {
			StreamKind::None => OutputStream::None,
			StreamKind::BestEffort => OutputStream::BestEffort(BestEffortSender::default()),
			StreamKind::Reliable => OutputStream::Reliable(ReliableOutputStream::new()),
		})
	}

	/// Every reliable output stream currently holding unacknowledged data,
	/// for the heartbeat loop (spec §4.3/§4.8).
	pub fn reliable_outputs_mut(&mut self) -> impl Iterator<Item = (u8, &mut ReliableOutputStream)> {
		self.outputs.iter_mut().filter_map(|(&id, s)| match s {
			OutputStream::Reliable(r) => Some((id, r)),
			_ => None,
		})
	}

	/// Every reliable input stream, for the heartbeat loop's periodic
	/// ACKNACK emission (spec §4.3: "every HB_PERIOD ... emit an ACKNACK").
	pub fn reliable_inputs(&self) -> impl Iterator<Item = (u8, &ReliableInputStream)> {
		self.inputs.iter().filter_map(|(&id, s)| match s {
			InputStream::Reliable(r) => Some((id, r)),
			_ => None,
		})
	}

	/// Drop every stream back to its initial state (spec §4.5's RESET
	/// handler effect).
	pub fn reset(&mut self) {
		self.inputs.clear();
		self.outputs.clear();
		self.fragment_buffers.clear();
	}

	/// The in-progress reassembly buffer for `stream_id`, created empty on
	/// first use.
	pub fn fragment_buffer_mut(&mut self, stream_id: u8) -> &mut Vec<u8> {
		self.fragment_buffers.entry(stream_id).or_insert_with(Vec::new)
	}

	/// Remove and return the reassembled bytes for `stream_id`, leaving an
	/// empty buffer behind for the next fragmented submessage.
	pub fn take_fragment_buffer(&mut self, stream_id: u8) -> Vec<u8> {
		self.fragment_buffers.remove(&stream_id).unwrap_or_default()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn stream_kind_classification_matches_spec_ranges() {
		assert_eq!(StreamKind::of(0), StreamKind::None);
		assert_eq!(StreamKind::of(1), StreamKind::BestEffort);
		assert_eq!(StreamKind::of(127), StreamKind::BestEffort);
		assert_eq!(StreamKind::of(128), StreamKind::Reliable);
		assert_eq!(StreamKind::of(255), StreamKind::Reliable);
	}

	#[test]
	fn input_and_output_streams_are_created_lazily_by_kind() {
		let mut session = ClientSession::new(0xDEADBEEF, 0x81, 512);
		assert!(matches!(session.input_mut(0x80), InputStream::Reliable(_)));
		assert!(matches!(session.output_mut(0x01), OutputStream::BestEffort(_)));
	}

	#[test]
	fn reset_clears_all_streams() {
		let mut session = ClientSession::new(1, 0x81, 512);
		session.input_mut(0x80);
		session.output_mut(0x80);
		session.reset();
		// re-requesting after reset must reconstruct fresh stream state.
		match session.input_mut(0x80) {
			InputStream::Reliable(r) => assert_eq!(r.next_expected(), SeqNum::ZERO),
			_ => panic!("expected a reliable stream"),
		}
	}
}
