//! The four stream classes of spec §4.3: best-effort in/out (effectively
//! symmetric, so one type covers both directions) and the reliable
//! input/output windows with their retransmission and fragmentation
//! machinery.

use std::time::Instant;

use collections::ring::Ring;
use wire::SeqNum;

pub const WINDOW_SIZE: usize = 16;

/// A best-effort stream delivers a message iff its seq is strictly ahead
/// of the last delivered one; duplicates and late arrivals are dropped
/// silently, and there is no acknowledgment.
#[derive(Debug, Default)]
pub struct BestEffortStream {
	last_delivered: Option<SeqNum>,
}

impl BestEffortStream {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns `true` if `seq` should be delivered (and, if so, advances
	/// `last_delivered`).
	pub fn accept(&mut self, seq: SeqNum) -> bool {
		let deliver = match self.last_delivered {
			None => true,
			Some(last) => last.lt(seq),
		};
		if deliver {
			self.last_delivered = Some(seq);
		}
		deliver
	}
}

/// Reliable input window (spec §4.3). `pending` buffers out-of-order
/// payloads that arrived inside the window but ahead of `next_expected`.
pub struct ReliableInputStream {
	next_expected: SeqNum,
	window_bitmap: u16,
	pending: Ring<Vec<u8>, WINDOW_SIZE>,
}

impl ReliableInputStream {
	pub fn new() -> Self {
		Self { next_expected: SeqNum::ZERO, window_bitmap: 0, pending: Ring::default() }
	}

	pub fn next_expected(&self) -> SeqNum {
		self.next_expected
	}

	/// Feed a received payload at `seq`. Returns the in-order messages
	/// that are now deliverable, oldest first (possibly empty, possibly
	/// more than one if this fill closed a gap).
	pub fn receive(&mut self, seq: SeqNum, payload: Vec<u8>) -> Vec<Vec<u8>> {
		if seq.lt(self.next_expected) {
			return Vec::new(); // already delivered
		}

		let distance = self.next_expected.distance_to(seq);
		if distance as usize >= WINDOW_SIZE {
			return Vec::new(); // outside window
		}

		if seq == self.next_expected {
			let mut delivered = vec![payload];

			// Every advance of next_expected must shift window_bitmap exactly
			// once, whether or not it pulls something out of `pending` --
			// otherwise the bitmap drifts out of alignment with the ring as
			// soon as more than one item is buffered ahead, and later items
			// never become reachable.
			loop {
				let slot_pending = self.window_bitmap & 1 != 0;
				self.next_expected = self.next_expected.succ();
				self.window_bitmap >>= 1;
				if !slot_pending {
					break;
				}
				let next = self.pending.remove(self.next_expected.get() as usize).expect("bitmap bit implies a buffered slot");
				delivered.push(next);
			}

			delivered
		} else {
			self.pending.insert(seq.get() as usize, payload);
			self.window_bitmap |= 1 << (distance - 1);
			Vec::new()
		}
	}

	/// Apply a HEARTBEAT's `first_unacked`: may only raise `next_expected`,
	/// discarding any buffered gap below it (spec §9: preserve this
	/// conservative advance, do not silently reorder around it).
	pub fn on_heartbeat(&mut self, first_unacked: SeqNum) {
		if self.next_expected.lt(first_unacked) {
			let advance = self.next_expected.distance_to(first_unacked);
			for k in 0..advance.min(WINDOW_SIZE as u16) {
				self.pending.remove((self.next_expected.get() as usize) + k as usize);
			}
			self.window_bitmap = if advance as usize >= WINDOW_SIZE { 0 } else { self.window_bitmap >> advance };
			self.next_expected = first_unacked;
		}
	}

	/// `(first_unacked, nack_bitmap)` for the next ACKNACK (spec §4.3).
	/// `window_bitmap` tracks what's already buffered, so the nack bitmap
	/// the peer needs is its complement: bit k set means seq
	/// `next_expected + k + 1` is still missing, not received.
	pub fn acknack(&self) -> (SeqNum, u16) {
		(self.next_expected, !self.window_bitmap)
	}
}

impl Default for ReliableInputStream {
	fn default() -> Self {
		Self::new()
	}
}

struct OutputSlot {
	bytes: Vec<u8>,
	sent_at: Instant,
}

/// Reliable output window: a ring of at most 16 unacknowledged
/// submessages, retransmitted on ACKNACK or heartbeat timeout.
pub struct ReliableOutputStream {
	next_send: SeqNum,
	first_unacked: SeqNum,
	ring: Ring<OutputSlot, WINDOW_SIZE>,
}

impl ReliableOutputStream {
	pub fn new() -> Self {
		Self { next_send: SeqNum::ZERO, first_unacked: SeqNum::ZERO, ring: Ring::default() }
	}

	pub fn next_send(&self) -> SeqNum {
		self.next_send
	}

	pub fn first_unacked(&self) -> SeqNum {
		self.first_unacked
	}

	pub fn has_unacked(&self) -> bool {
		self.next_send != self.first_unacked
	}

	/// Allocate a seq and store `bytes` for (re)transmission. Returns the
	/// allocated seq on success, or `None` under backpressure (window full;
	/// spec §4.3/§5 — the caller must retry).
	pub fn push(&mut self, bytes: Vec<u8>, now: Instant) -> Option<SeqNum> {
		if self.first_unacked.distance_to(self.next_send) as usize >= WINDOW_SIZE {
			return None;
		}

		let seq = self.next_send;
		self.ring.insert(seq.get() as usize, OutputSlot { bytes, sent_at: now });
		self.next_send = self.next_send.succ();
		Some(seq)
	}

	/// Apply an ACKNACK: slide the window to `first_unacked` and return the
	/// bytes of every slot the peer marked missing, to retransmit.
	pub fn on_acknack(&mut self, first_unacked: SeqNum, nack_bitmap: u16, now: Instant) -> Vec<Vec<u8>> {
		while self.first_unacked.lt(first_unacked) {
			self.ring.remove(self.first_unacked.get() as usize);
			self.first_unacked = self.first_unacked.succ();
		}

		let mut retransmits = Vec::new();
		for k in 0..WINDOW_SIZE as u16 {
			if nack_bitmap & (1 << k) != 0 {
				let seq = first_unacked.add(k + 1);
				if let Some(slot) = self.ring.get_mut(seq.get() as usize) {
					slot.sent_at = now;
					retransmits.push(slot.bytes.clone());
				}
			}
		}
		retransmits
	}

	/// Slots unacknowledged for longer than `timeout`, for the heartbeat
	/// loop's retransmit sweep.
	pub fn timed_out(&mut self, timeout: std::time::Duration, now: Instant) -> Vec<Vec<u8>> {
		let mut out = Vec::new();
		let mut seq = self.first_unacked;
		while seq.lt(self.next_send) {
			if let Some(slot) = self.ring.get_mut(seq.get() as usize) {
				if now.duration_since(slot.sent_at) >= timeout {
					slot.sent_at = now;
					out.push(slot.bytes.clone());
				}
			}
			seq = seq.succ();
		}
		out
	}
}

impl Default for ReliableOutputStream {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn best_effort_drops_duplicates_and_late_messages() {
		let mut s = BestEffortStream::new();
		assert!(s.accept(SeqNum::new(5)));
		assert!(!s.accept(SeqNum::new(5)), "duplicate");
		assert!(!s.accept(SeqNum::new(3)), "late");
		assert!(s.accept(SeqNum::new(6)));
	}

	#[test]
	fn reliable_input_delivers_in_order_after_gap_fills() {
		let mut s = ReliableInputStream::new();
		assert_eq!(s.receive(SeqNum::new(2), vec![2]), Vec::<Vec<u8>>::new());
		assert_eq!(s.receive(SeqNum::new(1), vec![1]), Vec::<Vec<u8>>::new());
		assert_eq!(s.receive(SeqNum::new(0), vec![0]), vec![vec![0], vec![1], vec![2]]);
		assert_eq!(s.next_expected(), SeqNum::new(3));
	}

	#[test]
	fn reliable_input_drops_outside_window() {
		let mut s = ReliableInputStream::new();
		for seq in 0..10 {
			s.receive(SeqNum::new(seq), vec![]);
		}
		// every seq above arrived in order, so next_expected has advanced to 10.
		let before = s.next_expected();
		assert_eq!(s.receive(SeqNum::new(42), vec![9, 9]), Vec::<Vec<u8>>::new());
		assert_eq!(s.next_expected(), before);
	}

	#[test]
	fn reliable_input_heartbeat_only_advances() {
		let mut s = ReliableInputStream::new();
		s.receive(SeqNum::new(0), vec![]);
		assert_eq!(s.next_expected(), SeqNum::new(1));
		s.on_heartbeat(SeqNum::new(5));
		assert_eq!(s.next_expected(), SeqNum::new(5));
		s.on_heartbeat(SeqNum::new(3));
		assert_eq!(s.next_expected(), SeqNum::new(5), "heartbeat must never move next_expected backward");
	}

	#[test]
	fn reliable_output_window_never_exceeds_16() {
		let mut out = ReliableOutputStream::new();
		let now = Instant::now();
		for _ in 0..WINDOW_SIZE {
			assert!(out.push(vec![0], now).is_some());
		}
		assert!(out.push(vec![0], now).is_none(), "window is full, must backpressure");
	}

	#[test]
	fn reliable_output_acknack_slides_and_retransmits() {
		let mut out = ReliableOutputStream::new();
		let now = Instant::now();
		for i in 0..5u8 {
			out.push(vec![i], now).unwrap();
		}
		// peer got 1, 3, 5 but is missing 2 and 4 -> first_unacked=2, bitmap bits for offsets 0 and 2 (k+1 relative to first_unacked=2 => seq 3,5... )
		let retransmits = out.on_acknack(SeqNum::new(2), 0b0000_0010, now);
		assert_eq!(out.first_unacked(), SeqNum::new(2));
		assert_eq!(retransmits, vec![vec![4]]);
	}
}
