//! Transport bindings (spec §2 leaf 1). Exactly one transport is active
//! per agent process, selected by the CLI subcommand; all of them funnel
//! into the same receiver/processor/sender loop in [`crate::server`].

mod can;
mod serial;
mod tcp;
mod udp;

use std::io;

pub use can::CanTransport;
pub use serial::SerialTransport;
pub use tcp::TcpTransport;
pub use udp::UdpTransport;

use crate::endpoint::Endpoint;

/// Maximum single datagram/frame this agent will ever send or accept.
/// Larger payloads must go through FRAGMENT submessages at the wire layer.
pub const MAX_PACKET_SIZE: usize = 65_507;

/// A blocking source/sink of framed packets. `recv` yields one complete
/// packet per call; `send` addresses a single peer by [`Endpoint`].
/// Stream-oriented transports (TCP, serial, CAN) are responsible for their
/// own internal framing before handing a packet up through this trait.
pub trait Transport: Send + Sync {
	fn recv(&self) -> io::Result<(Vec<u8>, Endpoint)>;
	fn send(&self, bytes: &[u8], endpoint: &Endpoint) -> io::Result<()>;
}
