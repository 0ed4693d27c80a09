//! Serial / pseudoterminal transport. A single point-to-point byte stream,
//! framed with [`wire::framing`]'s HDLC-like byte stuffing and CRC16
//! (spec §4.1). There is exactly one peer, so `Endpoint::Serial` carries a
//! constant address rather than anything resolved per-packet.

use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use serialport::SerialPort;
use wire::framing::{self, FramingCodec};

use super::Transport;
use crate::endpoint::Endpoint;

/// The sole peer address used for a serial link (one port, one client).
pub const LINK: Endpoint = Endpoint::Serial(0);

pub struct SerialTransport {
	port: Mutex<Box<dyn SerialPort>>,
	incoming: Mutex<Receiver<Vec<u8>>>,
}

impl SerialTransport {
	pub fn open(path: &str, baud_rate: u32, mtu: usize) -> io::Result<Arc<dyn Transport>> {
		let port = serialport::new(path, baud_rate)
			.timeout(std::time::Duration::from_millis(100))
			.open()
			.map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

		let reader = port.try_clone().map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
		let (tx, rx) = mpsc::channel();
		thread::spawn(move || read_loop(reader, mtu, tx));

		Ok(Arc::new(Self { port: Mutex::new(port), incoming: Mutex::new(rx) }))
	}
}

fn read_loop(mut port: Box<dyn SerialPort>, mtu: usize, tx: Sender<Vec<u8>>) {
	let mut codec = FramingCodec::new(mtu);
	let mut buf = [0u8; 512];

	loop {
		match port.read(&mut buf) {
			Ok(0) => continue,
			Ok(n) => {
				for frame in codec.feed(&buf[..n]) {
					if tx.send(frame.payload).is_err() {
						return;
					}
				}
			}
			Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
			Err(_) => return,
		}
	}
}

impl Transport for SerialTransport {
	fn recv(&self) -> io::Result<(Vec<u8>, Endpoint)> {
		self.incoming
			.lock()
			.expect("serial incoming channel poisoned")
			.recv()
			.map(|payload| (payload, LINK))
			.map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "serial reader thread exited"))
	}

	fn send(&self, bytes: &[u8], endpoint: &Endpoint) -> io::Result<()> {
		if *endpoint != LINK {
			return Err(io::Error::new(io::ErrorKind::InvalidInput, "serial transport given a foreign endpoint"));
		}
		let encoded = framing::encode(bytes, 0, 0);
		self.port.lock().expect("serial port mutex poisoned").write_all(&encoded)
	}
}
