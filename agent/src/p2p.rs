//! Seam for client-to-client discovery (spec §9's open question on
//! whether the agent should broker P2P sessions between its clients).
//! Off by default: no wire behavior lives here yet, only the shape a
//! future discovery handshake would hang off of.

use crate::root::SharedSession;

/// A client the agent has learned about via discovery, distinct from the
/// clients it directly serves in [`crate::root::Root`].
pub struct InternalClient {
	pub client_key: u32,
	pub session: SharedSession,
}

/// Registry of [`InternalClient`]s a future discovery handler would
/// populate. Deliberately minimal: no lookup by topic, no expiry, no
/// wire encoding, until the handshake this is a seam for gets designed.
#[derive(Default)]
pub struct InternalClientManager {
	clients: Vec<InternalClient>,
}

impl InternalClientManager {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&mut self, client: InternalClient) {
		self.clients.push(client);
	}

	pub fn len(&self) -> usize {
		self.clients.len()
	}

	pub fn is_empty(&self) -> bool {
		self.clients.is_empty()
	}
}
