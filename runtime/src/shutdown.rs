//! Cooperative shutdown: a `running` flag that transitions true -> false
//! once, checked by every loop between iterations (spec §4.8).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
	pub fn new() -> Self {
		Self(Arc::new(AtomicBool::new(true)))
	}

	#[inline]
	pub fn running(&self) -> bool {
		self.0.load(Ordering::Relaxed)
	}

	pub fn stop(&self) {
		self.0.store(false, Ordering::Relaxed);
	}

	/// Install a Ctrl+C handler that stops this flag. Mirrors the
	/// teacher's `ctrlc::set_handler` use in its run loop.
	pub fn install_ctrlc(&self) -> Result<(), ctrlc::Error> {
		let this = self.clone();
		ctrlc::set_handler(move || this.stop())
	}
}
