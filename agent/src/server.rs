//! Wires a [`Transport`] to the session/processor state machine: the
//! receiver, processor, sender and heartbeat loops of spec §4.8, each its
//! own OS thread, talking through [`runtime::Scheduler`] queues and
//! stopped cooperatively via [`runtime::Shutdown`] (spec §5's concurrency
//! model).

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use runtime::{Scheduler, Shutdown};
use utils::endian::Endian;
use wire::header::{MessageHeader, FLAG_RELIABLE};
use wire::submessage::Submessage;

use crate::endpoint::Endpoint;
use crate::middleware::Middleware;
use crate::processor::{self, OutputItem};
use crate::read_pipeline::ReadPipelineManager;
use crate::root::Root;
use crate::session::OutputStream;
use crate::transports::Transport;

pub struct ServerConfig {
	/// How often the heartbeat loop wakes to sweep retransmits and send
	/// HEARTBEAT submessages for every reliable output stream with
	/// unacknowledged data.
	pub heartbeat_interval: Duration,
	/// How long an unacknowledged reliable submessage waits before being
	/// retransmitted unprompted.
	pub retransmit_timeout: Duration,
	/// How long a session may sit idle before it is reaped.
	pub session_timeout: Duration,
	pub queue_capacity: usize,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			heartbeat_interval: Duration::from_millis(500),
			retransmit_timeout: Duration::from_secs(1),
			session_timeout: Duration::from_secs(60),
			queue_capacity: 4096,
		}
	}
}

struct InputPacket {
	bytes: Vec<u8>,
	endpoint: Endpoint,
}

struct OutputPacket {
	bytes: Vec<u8>,
	endpoint: Endpoint,
}

/// Runs the agent core against one already-open transport until `shutdown`
/// is signalled. Blocks the calling thread until every loop has wound
/// down.
pub struct Server {
	root: Arc<Root>,
	read_pipeline: Arc<ReadPipelineManager>,
}

impl Server {
	pub fn new() -> Self {
		Self { root: Arc::new(Root::new()), read_pipeline: Arc::new(ReadPipelineManager::new()) }
	}

	pub fn run(&self, transport: Arc<dyn Transport>, middleware: Arc<dyn Middleware>, config: ServerConfig, shutdown: Shutdown) {
		let input: Arc<Scheduler<InputPacket>> = Arc::new(Scheduler::new(config.queue_capacity, runtime::scheduler::Overflow::DropLowestPriority));
		let output: Arc<Scheduler<OutputPacket>> = Arc::new(Scheduler::new(config.queue_capacity, runtime::scheduler::Overflow::DropLowestPriority));
		let (read_tx, read_rx) = mpsc::channel();

		let receiver = thread::spawn({
			let transport = transport.clone();
			let input = input.clone();
			let shutdown = shutdown.clone();
			move || receiver_loop(transport, input, shutdown)
		});

		let processor = thread::spawn({
			let root = self.root.clone();
			let read_pipeline = self.read_pipeline.clone();
			let input = input.clone();
			let output = output.clone();
			let shutdown = shutdown.clone();
			move || processor_loop(root, middleware, read_pipeline, input, output, read_tx, shutdown)
		});

		let sender = thread::spawn({
			let transport = transport.clone();
			let output = output.clone();
			let shutdown = shutdown.clone();
			move || sender_loop(transport, output, shutdown)
		});

		let heartbeat = thread::spawn({
			let root = self.root.clone();
			let read_pipeline = self.read_pipeline.clone();
			let output = output.clone();
			let shutdown = shutdown.clone();
			let interval = config.heartbeat_interval;
			let retransmit_timeout = config.retransmit_timeout;
			let session_timeout = config.session_timeout;
			move || heartbeat_loop(root, read_pipeline, output, shutdown, interval, retransmit_timeout, session_timeout)
		});

		let read_pump = thread::spawn({
			let root = self.root.clone();
			let output = output.clone();
			let shutdown = shutdown.clone();
			move || read_pump_loop(root, read_rx, output, shutdown)
		});

		while shutdown.running() {
			thread::sleep(Duration::from_millis(100));
		}

		input.close();
		output.close();
		read_pipeline_shutdown(&self.read_pipeline);

		let _ = receiver.join();
		let _ = processor.join();
		let _ = sender.join();
		let _ = heartbeat.join();
		let _ = read_pump.join();
	}
}

impl Default for Server {
	fn default() -> Self {
		Self::new()
	}
}

fn read_pipeline_shutdown(read_pipeline: &ReadPipelineManager) {
	read_pipeline.cancel_all();
}

fn receiver_loop(transport: Arc<dyn Transport>, input: Arc<Scheduler<InputPacket>>, shutdown: Shutdown) {
	while shutdown.running() {
		match transport.recv() {
			Ok((bytes, endpoint)) => {
				input.push(InputPacket { bytes, endpoint }, 4);
			}
			Err(e) => {
				log::warn!("transport recv error: {e}");
				if !shutdown.running() {
					return;
				}
			}
		}
	}
}

#[allow(clippy::too_many_arguments)]
fn processor_loop(
	root: Arc<Root>,
	middleware: Arc<dyn Middleware>,
	read_pipeline: Arc<ReadPipelineManager>,
	input: Arc<Scheduler<InputPacket>>,
	output: Arc<Scheduler<OutputPacket>>,
	output_tx: crate::read_pipeline::OutputSender,
	shutdown: Shutdown,
) {
	while shutdown.running() || !input.is_empty() {
		let Some(packet) = input.pop_timeout(Duration::from_millis(200)) else { continue };

		let Ok((header, consumed)) = MessageHeader::parse(&packet.bytes) else {
			log::warn!("dropping packet with malformed message header");
			continue;
		};
		let body = &packet.bytes[consumed..];

		let client_key = if let Some(key) = header.client_key {
			root.endpoints.lock().expect("endpoint table poisoned").bind(packet.endpoint, key);
			Some(key)
		} else {
			root.endpoints.lock().expect("endpoint table poisoned").client_key_of(&packet.endpoint)
		};

		let outcome = processor::process_packet(&root, &middleware, &read_pipeline, client_key, &header, body, &output_tx);

		let Some(client_key) = client_key.or(header.client_key) else { continue };
		if outcome.delete_client {
			// Spec §5 cancellation: once a client is gone, nothing already
			// queued for it should still be sent.
			let endpoint = packet.endpoint;
			output.retain(|p: &OutputPacket| p.endpoint != endpoint);
			continue;
		}

		for item in outcome.outputs {
			if let Some(bytes) = materialize(&root, client_key, item) {
				output.push(OutputPacket { bytes, endpoint: packet.endpoint }, 4);
			}
		}
	}
}

fn sender_loop(transport: Arc<dyn Transport>, output: Arc<Scheduler<OutputPacket>>, shutdown: Shutdown) {
	while shutdown.running() || !output.is_empty() {
		let Some(packet) = output.pop_timeout(Duration::from_millis(200)) else { continue };
		if let Err(e) = transport.send(&packet.bytes, &packet.endpoint) {
			log::warn!("transport send error: {e}");
		}
	}
}

#[allow(clippy::too_many_arguments)]
fn heartbeat_loop(
	root: Arc<Root>,
	read_pipeline: Arc<ReadPipelineManager>,
	output: Arc<Scheduler<OutputPacket>>,
	shutdown: Shutdown,
	interval: Duration,
	retransmit_timeout: Duration,
	session_timeout: Duration,
) {
	while shutdown.running() {
		thread::sleep(interval);

		let expired = root.reap_expired(session_timeout);
		for (client_key, endpoint) in &expired {
			log::info!("reaped idle session {client_key:#x}");
			read_pipeline.cancel_client(*client_key);
			if let Some(endpoint) = endpoint {
				let endpoint = *endpoint;
				output.retain(|p: &OutputPacket| p.endpoint != endpoint);
			}
		}

		sweep_retransmits(&root, &output, retransmit_timeout);
	}
}

/// One HB_PERIOD tick of spec §4.3/§4.8 for every live session: retransmit
/// reliable-output slots that have sat unacked past `retransmit_timeout`,
/// announce every reliable output stream with unacked data via HEARTBEAT,
/// and re-announce every reliable input stream's window via ACKNACK.
fn sweep_retransmits(root: &Root, output: &Scheduler<OutputPacket>, retransmit_timeout: Duration) {
	let now = Instant::now();
	for client_key in root.client_keys() {
		let Some(endpoint) = root.endpoints.lock().expect("endpoint table poisoned").endpoint_of(client_key) else {
			continue;
		};
		let Some(session) = root.get(client_key) else { continue };

		let mut pending = Vec::new();
		{
			let mut session = session.lock().expect("session mutex poisoned");
			for (stream_id, reliable) in session.reliable_outputs_mut() {
				for bytes in reliable.timed_out(retransmit_timeout, now) {
					pending.push(OutputItem::Raw(stream_id, bytes));
				}
				if reliable.has_unacked() {
					pending.push(OutputItem::Submessage(
						0,
						Submessage::Heartbeat(wire::submessage::HeartbeatPayload {
							first_unacked: reliable.first_unacked(),
							last_sent: reliable.next_send().add(u16::MAX),
							stream_id,
						}),
					));
				}
			}
			for (stream_id, reliable) in session.reliable_inputs() {
				let (first_unacked, nack_bitmap) = reliable.acknack();
				pending.push(OutputItem::Submessage(0, Submessage::Acknack(wire::submessage::AcknackPayload { first_unacked, nack_bitmap, stream_id })));
			}
		}

		for item in pending {
			if let Some(bytes) = materialize(root, client_key, item) {
				output.push(OutputPacket { bytes, endpoint }, 2);
			}
		}
	}
}

fn read_pump_loop(root: Arc<Root>, read_rx: mpsc::Receiver<(u32, u8, Submessage)>, output: Arc<Scheduler<OutputPacket>>, shutdown: Shutdown) {
	while shutdown.running() {
		let Ok((client_key, stream_id, sub)) = read_rx.recv_timeout(Duration::from_millis(200)) else { continue };
		if let Some(bytes) = materialize(&root, client_key, OutputItem::Submessage(stream_id, sub)) {
			let Some(endpoint) = root.endpoints.lock().expect("endpoint table poisoned").endpoint_of(client_key) else { continue };
			output.push(OutputPacket { bytes, endpoint }, 5);
		}
	}
}

/// Turn one logical output item into the exact bytes to hand the
/// transport: a [`MessageHeader`] (assigning/consuming the stream's next
/// sequence number as needed) followed by the serialized submessage.
/// `OutputItem::Raw` is already a complete packet (a reliable-stream
/// retransmission, fixed at first transmission) and passes through as-is.
fn materialize(root: &Root, client_key: u32, item: OutputItem) -> Option<Vec<u8>> {
	let (stream_id, sub) = match item {
		OutputItem::Raw(_, bytes) => return Some(bytes),
		OutputItem::Submessage(stream_id, sub) => (stream_id, sub),
	};

	let session = root.get(client_key)?;
	let mut session = session.lock().expect("session mutex poisoned");
	let session_id = session.session_id;

	let (sequence_nr, extra_flags) = match session.output_mut(stream_id) {
		OutputStream::None => (0, 0),
		OutputStream::BestEffort(sender) => (sender.next_seq().get(), 0),
		OutputStream::Reliable(reliable) => {
			let seq = reliable.next_send();
			let submessage_bytes = wire::submessage::serialize(&sub, Endian::Little, FLAG_RELIABLE);
			let mut packet = Vec::with_capacity(8 + submessage_bytes.len());
			let header = MessageHeader {
				session_id,
				stream_id,
				sequence_nr: seq.get(),
				client_key: if MessageHeader::has_client_key(session_id) { Some(client_key) } else { None },
			};
			header.write_to(&mut packet);
			packet.extend_from_slice(&submessage_bytes);

			// Window full: spec §4.3/§5 call for backpressure, not sending
			// with an untracked, reused seq that the peer would see as a
			// duplicate. Drop the item here rather than transmit it.
			return reliable.push(packet.clone(), Instant::now()).map(|_| packet);
		}
	};

	let submessage_bytes = wire::submessage::serialize(&sub, Endian::Little, extra_flags);
	let mut packet = Vec::with_capacity(8 + submessage_bytes.len());
	let header = MessageHeader {
		session_id,
		stream_id,
		sequence_nr,
		client_key: if MessageHeader::has_client_key(session_id) { Some(client_key) } else { None },
	};
	header.write_to(&mut packet);
	packet.extend_from_slice(&submessage_bytes);
	Some(packet)
}
