//! Thread-safe token bucket rate limiter for the read pipeline (spec
//! §4.7).

use std::sync::Mutex;
use std::time::Instant;

pub const MIN_RATE: f64 = 64_000.0;

struct State {
	tokens: f64,
	timestamp: Instant,
}

pub struct TokenBucket {
	rate: f64,
	capacity: f64,
	state: Mutex<State>,
}

impl TokenBucket {
	/// `rate` is clamped up to [`MIN_RATE`] (spec: "minimum 64 000").
	/// `capacity` defaults to `rate` when `None`.
	pub fn new(rate: f64, capacity: Option<f64>) -> Self {
		let rate = rate.max(MIN_RATE);
		let capacity = capacity.unwrap_or(rate);
		Self { rate, capacity, state: Mutex::new(State { tokens: capacity, timestamp: Instant::now() }) }
	}

	pub fn capacity(&self) -> f64 {
		self.capacity
	}

	/// Refill, then attempt to deduct `n` tokens. Returns `true` and
	/// deducts on success; on failure leaves `tokens` untouched.
	pub fn take(&self, n: f64) -> bool {
		let mut state = self.state.lock().expect("token bucket mutex poisoned");
		let now = Instant::now();
		let elapsed = now.duration_since(state.timestamp).as_secs_f64();
		state.timestamp = now;
		state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);

		if state.tokens >= n {
			state.tokens -= n;
			true
		} else {
			false
		}
	}
}
