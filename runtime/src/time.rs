use std::time::{Instant, SystemTime};

/// Get the current system (wall-clock) time.
#[inline]
pub fn system() -> SystemTime {
	SystemTime::now()
}

/// Get a monotonic timestamp suitable for interval measurement
/// (last-activity timestamps, retransmit timers, token-bucket refill).
#[inline]
pub fn monotonic() -> Instant {
	Instant::now()
}

/// Get the UNIX time in seconds.
pub fn unix() -> u32 {
	system()
		.duration_since(SystemTime::UNIX_EPOCH)
		.expect("the current time should be after the UNIX epoch")
		.as_secs()
		.try_into()
		.expect("32-bit UNIX time should not overflow")
}
