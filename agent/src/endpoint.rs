//! Bidirectional mapping between a transport endpoint and a client key
//! (spec §2 leaf component 2). One instance lives in `Root`; the receiver
//! loop consults it to route an incoming packet without a client key
//! (every submessage after CREATE_CLIENT omits it) to the right session.

use std::net::SocketAddr;

use collections::map::{self, Map};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
	Udp(SocketAddr),
	Tcp(SocketAddr),
	Serial(u8),
	Can(u32),
}

#[derive(Default)]
pub struct EndpointTable {
	by_endpoint: Map<Endpoint, u32>,
	by_key: Map<u32, Endpoint>,
}

impl EndpointTable {
	pub fn new() -> Self {
		Self { by_endpoint: map::new(), by_key: map::new() }
	}

	pub fn bind(&mut self, endpoint: Endpoint, client_key: u32) {
		if let Some(old) = self.by_key.insert(client_key, endpoint) {
			self.by_endpoint.remove(&old);
		}
		self.by_endpoint.insert(endpoint, client_key);
	}

	pub fn client_key_of(&self, endpoint: &Endpoint) -> Option<u32> {
		self.by_endpoint.get(endpoint).copied()
	}

	pub fn endpoint_of(&self, client_key: u32) -> Option<Endpoint> {
		self.by_key.get(&client_key).copied()
	}

	pub fn unbind(&mut self, client_key: u32) {
		if let Some(endpoint) = self.by_key.remove(&client_key) {
			self.by_endpoint.remove(&endpoint);
		}
	}
}
