//! The FCFS priority queue between the transport receiver thread and the
//! processing thread, and again between the processor and the sender
//! thread (spec §4.8, §5).
//!
//! Eight priority levels (0 = highest), mutex + condvar, bounded capacity.
//! When the queue is full, [`Overflow::Block`] makes `push` wait for room;
//! [`Overflow::DropLowestPriority`] (the default) instead evicts the
//! oldest entry in the lowest occupied priority band to make room, so a
//! burst of low-priority traffic can never starve high-priority traffic
//! out of space.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

pub const PRIORITY_LEVELS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overflow {
	/// `push` blocks until space is available.
	Block,
	/// `push` evicts the oldest entry from the lowest occupied priority
	/// band to make room. This is the default.
	DropLowestPriority,
}

impl Default for Overflow {
	fn default() -> Self {
		Self::DropLowestPriority
	}
}

struct Inner<T> {
	queues: [VecDeque<T>; PRIORITY_LEVELS],
	len: usize,
	closed: bool,
}

impl<T> Inner<T> {
	fn lowest_occupied(&self) -> Option<usize> {
		self.queues.iter().rposition(|q| !q.is_empty())
	}
}

/// A bounded, multi-priority FCFS queue shared between a producer thread
/// (receiver/processor) and a consumer thread (processor/sender).
pub struct Scheduler<T> {
	inner: Mutex<Inner<T>>,
	not_empty: Condvar,
	not_full: Condvar,
	capacity: usize,
	overflow: Overflow,
}

impl<T> Scheduler<T> {
	pub fn new(capacity: usize, overflow: Overflow) -> Self {
		Self {
			inner: Mutex::new(Inner { queues: Default::default(), len: 0, closed: false }),
			not_empty: Condvar::new(),
			not_full: Condvar::new(),
			capacity,
			overflow,
		}
	}

	/// Push `item` at `priority` (0 = highest, clamped to 7). Returns
	/// `true` if the item was enqueued, `false` if it was dropped (only
	/// possible under [`Overflow::DropLowestPriority`], and only when
	/// `item`'s own priority band is the one that would have to be
	/// evicted from).
	pub fn push(&self, item: T, priority: u8) -> bool {
		let priority = (priority as usize).min(PRIORITY_LEVELS - 1);
		let mut inner = self.inner.lock().unwrap();

		loop {
			if inner.closed {
				return false;
			}

			if inner.len < self.capacity {
				inner.queues[priority].push_back(item);
				inner.len += 1;
				drop(inner);
				self.not_empty.notify_one();
				return true;
			}

			match self.overflow {
				Overflow::Block => {
					inner = self.not_full.wait(inner).unwrap();
				}
				Overflow::DropLowestPriority => {
					let lowest = inner.lowest_occupied().expect("len > 0 implies a non-empty queue");

					if lowest < priority {
						// Every occupied band already outranks this item; drop it instead.
						return false;
					}

					inner.queues[lowest].pop_front();
					inner.len -= 1;

					inner.queues[priority].push_back(item);
					inner.len += 1;
					drop(inner);
					self.not_empty.notify_one();
					return true;
				}
			}
		}
	}

	/// Pop the oldest item from the highest-priority non-empty band,
	/// waiting up to `timeout` for one to appear. `None` means the wait
	/// timed out or the scheduler was closed — either way the caller
	/// should check its shutdown flag and loop.
	pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
		let mut inner = self.inner.lock().unwrap();

		loop {
			if let Some(idx) = inner.queues.iter().position(|q| !q.is_empty()) {
				let item = inner.queues[idx].pop_front().unwrap();
				inner.len -= 1;
				drop(inner);
				self.not_full.notify_one();
				return Some(item);
			}

			if inner.closed {
				return None;
			}

			let (guard, result) = self.not_empty.wait_timeout(inner, timeout).unwrap();
			inner = guard;

			if result.timed_out() && inner.queues.iter().all(VecDeque::is_empty) {
				return None;
			}
		}
	}

	/// Number of items currently queued, across all priority bands.
	pub fn len(&self) -> usize {
		self.inner.lock().unwrap().len
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Wake every waiter; subsequent `push`/`pop_timeout` calls return
	/// immediately (`false`/`None`) once drained. Used on agent shutdown.
	pub fn close(&self) {
		self.inner.lock().unwrap().closed = true;
		self.not_empty.notify_all();
		self.not_full.notify_all();
	}

	/// Drop every item belonging to `keep(item) == false`. Used to flush
	/// packets destined for a client that was just deleted (spec §5,
	/// "Cancellation").
	pub fn retain(&self, mut keep: impl FnMut(&T) -> bool) {
		let mut inner = self.inner.lock().unwrap();
		for queue in &mut inner.queues {
			let before = queue.len();
			queue.retain(&mut keep);
			inner.len -= before - queue.len();
		}
	}
}
