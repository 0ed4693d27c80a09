//! CAN transport (Linux only; spec §2 leaf 1's "CAN" bus binding). CAN
//! frames carry at most 8 data bytes, so every frame is just another chunk
//! fed to the same [`FramingCodec`] byte-stream reassembler serial uses;
//! the 29-bit extended arbitration id on *received* frames becomes the
//! peer's [`Endpoint::Can`] address, and outbound frames are stamped with
//! a fixed response id configured at startup.

use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use socketcan::{CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame as _, Socket};
use wire::framing::{self, FramingCodec};

use super::Transport;
use crate::endpoint::Endpoint;

pub struct CanTransport {
	socket: Mutex<CanSocket>,
	response_id: u32,
	incoming: Mutex<Receiver<(Vec<u8>, Endpoint)>>,
}

impl CanTransport {
	pub fn open(interface: &str, response_id: u32, mtu: usize) -> io::Result<Arc<dyn Transport>> {
		let socket = CanSocket::open(interface).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
		let reader = socket.try_clone().map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

		let (tx, rx) = mpsc::channel();
		thread::spawn(move || read_loop(reader, mtu, tx));

		Ok(Arc::new(Self { socket: Mutex::new(socket), response_id, incoming: Mutex::new(rx) }))
	}
}

/// Cap on distinct arbitration ids tracked at once. A bus with more
/// concurrent senders than this is unusual; past the cap we drop the
/// least-recently-fed id's reassembly state rather than grow unbounded.
const MAX_TRACKED_IDS: usize = 64;

fn read_loop(socket: CanSocket, mtu: usize, tx: Sender<(Vec<u8>, Endpoint)>) {
	// Each sender's own arbitration id gets its own reassembly state, so
	// frames from two CAN peers interleaved on the bus don't corrupt each
	// other's partial frame.
	let mut codecs: collections::map::Map<u32, FramingCodec> = collections::map::new();
	let mut order: Vec<u32> = Vec::new();

	loop {
		let Ok(frame) = socket.read_frame() else { return };
		let CanFrame::Data(data) = frame else { continue };
		let id = match data.id() {
			socketcan::Id::Standard(id) => id.as_raw() as u32,
			socketcan::Id::Extended(id) => id.as_raw(),
		};

		if !codecs.contains_key(&id) {
			if order.len() >= MAX_TRACKED_IDS {
				let oldest = order.remove(0);
				codecs.remove(&oldest);
			}
			order.push(id);
		}

		let codec = codecs.entry(id).or_insert_with(|| FramingCodec::new(mtu));
		for decoded in codec.feed(data.data()) {
			if tx.send((decoded.payload, Endpoint::Can(id))).is_err() {
				return;
			}
		}
	}
}

impl Transport for CanTransport {
	fn recv(&self) -> io::Result<(Vec<u8>, Endpoint)> {
		self.incoming
			.lock()
			.expect("can incoming channel poisoned")
			.recv()
			.map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "can reader thread exited"))
	}

	fn send(&self, bytes: &[u8], endpoint: &Endpoint) -> io::Result<()> {
		let Endpoint::Can(_) = endpoint else {
			return Err(io::Error::new(io::ErrorKind::InvalidInput, "can transport given a non-can endpoint"));
		};

		let encoded = framing::encode(bytes, 0, 0);
		let socket = self.socket.lock().expect("can socket mutex poisoned");
		let id = ExtendedId::new(self.response_id).ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "response id does not fit 29 bits"))?;

		for chunk in encoded.chunks(8) {
			let frame = CanFrame::new(id, chunk).ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "could not build CAN data frame"))?;
			socket.write_frame(&frame).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
		}
		Ok(())
	}
}
