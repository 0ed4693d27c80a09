//! TCP4/TCP6 transport. Each message is a 2-byte little-endian length
//! prefix followed by that many bytes of XRCE packet (spec §2 leaf 1).
//! Unlike UDP, a single TCP transport juggles many live connections; a
//! listener thread accepts new ones and spawns one reader thread per
//! connection, all funneling into a shared channel that `recv` drains.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use collections::map::{self, Map};

use super::{Transport, MAX_PACKET_SIZE};
use crate::endpoint::Endpoint;

pub struct TcpTransport {
	connections: Mutex<Map<SocketAddr, TcpStream>>,
	incoming: Mutex<Receiver<(Vec<u8>, Endpoint)>>,
}

impl TcpTransport {
	pub fn bind(addr: &str) -> io::Result<Arc<dyn super::Transport>> {
		let listener = TcpListener::bind(addr)?;
		let (tx, rx) = mpsc::channel();
		let transport = Arc::new(Self { connections: Mutex::new(map::new()), incoming: Mutex::new(rx) });

		let accepting = transport.clone();
		thread::spawn(move || accept_loop(listener, accepting, tx));

		Ok(transport)
	}

	fn drop_connection(&self, peer: &SocketAddr) {
		self.connections.lock().expect("tcp connection table poisoned").remove(peer);
	}
}

fn accept_loop(listener: TcpListener, transport: Arc<TcpTransport>, tx: Sender<(Vec<u8>, Endpoint)>) {
	for incoming in listener.incoming() {
		let Ok(stream) = incoming else { continue };
		let Ok(peer) = stream.peer_addr() else { continue };
		let Ok(reader) = stream.try_clone() else { continue };

		transport.connections.lock().expect("tcp connection table poisoned").insert(peer, stream);

		let tx = tx.clone();
		let reaping = transport.clone();
		thread::spawn(move || read_loop(peer, reader, tx, reaping));
	}
}

fn read_loop(peer: SocketAddr, mut stream: TcpStream, tx: Sender<(Vec<u8>, Endpoint)>, transport: Arc<TcpTransport>) {
	loop {
		let mut len_prefix = [0u8; 2];
		if stream.read_exact(&mut len_prefix).is_err() {
			break;
		}
		let len = u16::from_le_bytes(len_prefix) as usize;
		let mut body = vec![0u8; len];
		if stream.read_exact(&mut body).is_err() {
			break;
		}
		if tx.send((body, Endpoint::Tcp(peer))).is_err() {
			break;
		}
	}
	transport.drop_connection(&peer);
}

impl Transport for TcpTransport {
	fn recv(&self) -> io::Result<(Vec<u8>, Endpoint)> {
		self.incoming
			.lock()
			.expect("tcp incoming channel poisoned")
			.recv()
			.map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "all tcp connections closed"))
	}

	fn send(&self, bytes: &[u8], endpoint: &Endpoint) -> io::Result<()> {
		let Endpoint::Tcp(peer) = endpoint else {
			return Err(io::Error::new(io::ErrorKind::InvalidInput, "tcp transport given a non-tcp endpoint"));
		};
		if bytes.len() > MAX_PACKET_SIZE || bytes.len() > u16::MAX as usize {
			return Err(io::Error::new(io::ErrorKind::InvalidInput, "packet too large for a 2-byte length prefix"));
		}

		let mut connections = self.connections.lock().expect("tcp connection table poisoned");
		let Some(stream) = connections.get_mut(peer) else {
			return Err(io::Error::new(io::ErrorKind::NotConnected, "no open connection for endpoint"));
		};

		let result = stream.write_all(&(bytes.len() as u16).to_le_bytes()).and_then(|_| stream.write_all(bytes));
		if result.is_err() {
			drop(connections);
			self.drop_connection(peer);
		}
		result
	}
}
