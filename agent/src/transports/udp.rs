//! UDP4/UDP6 transport. One socket, datagram-per-packet — XRCE already
//! frames at the message-header level so UDP needs no extra framing.

use std::io;
use std::net::UdpSocket;
use std::sync::Arc;

use super::{Transport, MAX_PACKET_SIZE};
use crate::endpoint::Endpoint;

pub struct UdpTransport {
	socket: UdpSocket,
}

impl UdpTransport {
	pub fn bind(addr: &str) -> io::Result<Arc<dyn Transport>> {
		let socket = UdpSocket::bind(addr)?;
		Ok(Arc::new(Self { socket }))
	}
}

impl Transport for UdpTransport {
	fn recv(&self) -> io::Result<(Vec<u8>, Endpoint)> {
		let mut buf = vec![0u8; MAX_PACKET_SIZE];
		let (len, from) = self.socket.recv_from(&mut buf)?;
		buf.truncate(len);
		Ok((buf, Endpoint::Udp(from)))
	}

	fn send(&self, bytes: &[u8], endpoint: &Endpoint) -> io::Result<()> {
		let Endpoint::Udp(addr) = endpoint else {
			return Err(io::Error::new(io::ErrorKind::InvalidInput, "udp transport given a non-udp endpoint"));
		};
		self.socket.send_to(bytes, addr)?;
		Ok(())
	}
}
