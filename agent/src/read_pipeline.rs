//! The concurrent read pipeline (spec §4.6): one worker thread per active
//! READ_DATA request, rate-limited by a per-request [`TokenBucket`] and
//! cancellable when superseded or when the owning client goes away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use collections::map::{self, Map};
use wire::error::StatusCode;
use wire::submessage::{DataPayload, ReadDataPayload, StatusPayload, Submessage};

use crate::middleware::Middleware;
use crate::token_bucket::TokenBucket;

const READ_TIMEOUT: Duration = Duration::from_millis(100);
const RETRY_DELAY: Duration = Duration::from_millis(10);

/// Content-filter evaluation (spec §4.6 step 1). The wire carries the
/// filter expression as opaque bytes (its CDR dialect is a middleware
/// concern); a sample is rejected only by an explicit, non-empty filter
/// that doesn't occur anywhere in the sample. No filter always accepts.
fn content_filter_accepts(filter: &[u8], sample: &[u8]) -> bool {
	filter.is_empty() || sample.windows(filter.len()).any(|w| w == filter)
}

type ReadKey = (u32, u16, u16);

/// `(client_key, stream_id, submessage)` — everything downstream needs to
/// serialize and route a READ worker's output without looking anything up
/// again under the session lock.
pub type OutputSender = Sender<(u32, u8, Submessage)>;

#[derive(Default)]
pub struct ReadPipelineManager {
	active: Arc<Mutex<Map<ReadKey, Arc<AtomicBool>>>>,
}

impl ReadPipelineManager {
	pub fn new() -> Self {
		Self::default()
	}

	/// Start (or replace) the worker for `request.object_id` +
	/// `request.request_id`. A prior worker for the same key is cancelled
	/// first (spec: "a new READ on the same DataReader with the same
	/// request_id replaces the prior one").
	pub fn start(&self, middleware: Arc<dyn Middleware>, client_key: u32, request: ReadDataPayload, stream_id: u8, output: OutputSender) {
		let key = (client_key, request.object_id.as_raw(), request.request_id);
		let cancel = Arc::new(AtomicBool::new(false));

		{
			let mut active = self.active.lock().expect("read pipeline mutex poisoned");
			if let Some(prev) = active.insert(key, cancel.clone()) {
				prev.store(true, Ordering::Relaxed);
			}
		}

		let bucket = TokenBucket::new(request.max_bytes_per_sec as f64, None);
		let object_id = request.object_id;
		let request_id = request.request_id;
		let filter = request.filter;
		let mut remaining = request.max_samples;
		let active = self.active.clone();

		thread::spawn(move || {
			while remaining > 0 && !cancel.load(Ordering::Relaxed) {
				let mut sample = Vec::new();
				if !middleware.read(object_id.as_raw(), &mut sample, READ_TIMEOUT) {
					continue;
				}

				if !content_filter_accepts(&filter, &sample) {
					continue;
				}

				let cost = sample.len() as f64;
				while !bucket.take(cost) {
					if cancel.load(Ordering::Relaxed) {
						remove_if_current(&active, key, &cancel);
						return;
					}
					thread::sleep(RETRY_DELAY);
				}

				if output.send((client_key, stream_id, Submessage::Data(DataPayload { object_id, request_id, data: sample }))).is_err() {
					remove_if_current(&active, key, &cancel);
					return; // session torn down; nothing left to deliver to.
				}
				remaining -= 1;
			}

			remove_if_current(&active, key, &cancel);
			let _ = output.send((
				client_key,
				stream_id,
				Submessage::Status(StatusPayload { related_object_id: object_id, request_id, status: StatusCode::Ok }),
			));
		});
	}

	/// Cancel every active read. Called when the server shuts down (spec
	/// §5's cancellation rule).
	pub fn cancel_all(&self) {
		let active = self.active.lock().expect("read pipeline mutex poisoned");
		for cancel in active.values() {
			cancel.store(true, Ordering::Relaxed);
		}
	}

	/// Cancel only the reads belonging to `client_key`. Called when that
	/// one client is deleted or reaped, so an unrelated client's in-flight
	/// READ is never touched (spec §5: "all in-flight reads for *that*
	/// client complete or abort").
	pub fn cancel_client(&self, client_key: u32) {
		let active = self.active.lock().expect("read pipeline mutex poisoned");
		for (key, cancel) in active.iter() {
			if key.0 == client_key {
				cancel.store(true, Ordering::Relaxed);
			}
		}
	}
}

/// Remove `key`'s entry from `active`, but only if it still points at
/// `cancel` — a newer worker may have replaced it (spec: a same-key READ
/// supersedes the old one), and its entry must survive this cleanup.
fn remove_if_current(active: &Mutex<Map<ReadKey, Arc<AtomicBool>>>, key: ReadKey, cancel: &Arc<AtomicBool>) {
	let mut active = active.lock().expect("read pipeline mutex poisoned");
	let still_current = matches!(active.get(&key), Some(current) if Arc::ptr_eq(current, cancel));
	if still_current {
		active.remove(&key);
	}
}
