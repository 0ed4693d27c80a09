//! The process-wide client registry (spec §2 leaf 10, §5, §9). One
//! instance is constructed at server start and torn down at shutdown;
//! tests instantiate fresh ones.
//!
//! `clients` is guarded by a single mutex, but only for the map lookup
//! itself: callers clone the per-client `Arc<Mutex<ClientSession>>` out
//! and release the outer lock before touching session state, so the
//! processor and the heartbeat thread never block each other on
//! unrelated clients (spec §5).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use collections::map::{self, Map};

use crate::endpoint::EndpointTable;
use crate::session::ClientSession;

pub type SharedSession = Arc<Mutex<ClientSession>>;

pub struct Root {
	clients: Mutex<Map<u32, SharedSession>>,
	pub endpoints: Mutex<EndpointTable>,
	next_client_key: Mutex<u32>,
}

impl Root {
	pub fn new() -> Self {
		Self { clients: Mutex::new(map::new()), endpoints: Mutex::new(EndpointTable::new()), next_client_key: Mutex::new(1) }
	}

	pub fn create_client(&self, client_key: u32, session_id: u8, mtu: u16) -> SharedSession {
		let session = Arc::new(Mutex::new(ClientSession::new(client_key, session_id, mtu)));
		self.clients.lock().expect("root mutex poisoned").insert(client_key, session.clone());
		session
	}

	/// Allocate a fresh client key for a CREATE_CLIENT whose client didn't
	/// suggest one (not part of the wire protocol proper, but useful for
	/// middleware-side bookkeeping and tests).
	pub fn allocate_client_key(&self) -> u32 {
		let mut next = self.next_client_key.lock().expect("root mutex poisoned");
		let key = *next;
		*next = next.wrapping_add(1);
		key
	}

	pub fn get(&self, client_key: u32) -> Option<SharedSession> {
		self.clients.lock().expect("root mutex poisoned").get(&client_key).cloned()
	}

	pub fn delete_client(&self, client_key: u32) -> Option<SharedSession> {
		self.endpoints.lock().expect("root mutex poisoned").unbind(client_key);
		self.clients.lock().expect("root mutex poisoned").remove(&client_key)
	}

	/// Snapshot of every currently live client key. Used by the heartbeat
	/// loop to sweep sessions without holding the registry lock while it
	/// touches per-session state.
	pub fn client_keys(&self) -> Vec<u32> {
		self.clients.lock().expect("root mutex poisoned").iter().map(|(&key, _)| key).collect()
	}

	pub fn len(&self) -> usize {
		self.clients.lock().expect("root mutex poisoned").len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Remove every session whose last activity is older than `timeout`.
	/// Called periodically by the heartbeat loop. Returns each reaped
	/// client's last-known endpoint alongside its key, so the caller can
	/// flush anything still queued for it (spec §5's cancellation rule).
	pub fn reap_expired(&self, timeout: Duration) -> Vec<(u32, Option<crate::endpoint::Endpoint>)> {
		let expired: Vec<u32> = {
			let clients = self.clients.lock().expect("root mutex poisoned");
			clients
				.iter()
				.filter_map(|(&key, session)| {
					let session = session.lock().expect("session mutex poisoned");
					session.is_expired(timeout).then_some(key)
				})
				.collect()
		};

		expired
			.into_iter()
			.map(|key| {
				let endpoint = self.endpoints.lock().expect("endpoint table poisoned").endpoint_of(key);
				self.delete_client(key);
				(key, endpoint)
			})
			.collect()
	}
}

impl Default for Root {
	fn default() -> Self {
		Self::new()
	}
}
