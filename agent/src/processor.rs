//! Decodes submessages and drives the session/object-tree/read-pipeline
//! subsystems (spec §4.5). One packet's submessages are processed in
//! arrival order; a malformed submessage aborts the rest of the packet
//! but never the session.

use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Instant;

use wire::error::{AgentError, StatusCode};
use wire::header::MessageHeader;
use wire::object::{ObjectId, ObjectKind};
use wire::submessage::{
	self, AcknackPayload, CreateClientPayload, CreatePayload, DeletePayload, FragmentPayload, GetInfoPayload, HeartbeatPayload, InfoPayload,
	Submessage, TimestampPayload, TimestampReplyPayload, WriteDataPayload,
};
use wire::SeqNum;

use crate::middleware::{Middleware, Representation};
use crate::read_pipeline::ReadPipelineManager;
use crate::root::Root;
use crate::session::{ClientSession, InputStream, OutputStream, StreamKind};

/// Sentinel object id the client addresses to mean "this session itself"
/// (used by GET_INFO and by DELETE to request full client teardown,
/// rather than deleting a single tree entry).
pub const SESSION_OBJECT: ObjectId = ObjectId { kind: ObjectKind::Application, instance: 0 };

pub enum OutputItem {
	Submessage(u8, Submessage),
	/// Already-serialized bytes (reliable-output retransmissions, whose
	/// wire form was fixed at first transmission).
	Raw(u8, Vec<u8>),
}

pub struct ProcessOutcome {
	pub outputs: Vec<OutputItem>,
	pub delete_client: bool,
}

impl ProcessOutcome {
	fn empty() -> Self {
		Self { outputs: Vec::new(), delete_client: false }
	}

	fn one(stream_id: u8, sub: Submessage) -> Self {
		Self { outputs: vec![OutputItem::Submessage(stream_id, sub)], delete_client: false }
	}
}

/// Handle an already-framed packet. `client_key` is `Some` once the
/// receiver has resolved the source endpoint to a session (every
/// submessage after CREATE_CLIENT); it is `None` only while dispatching
/// a CREATE_CLIENT itself, whose key instead comes from the message
/// header.
pub fn process_packet(
	root: &Root,
	middleware: &Arc<dyn Middleware>,
	read_pipeline: &ReadPipelineManager,
	client_key: Option<u32>,
	header: &MessageHeader,
	body: &[u8],
	output_tx: &Sender<(u32, u8, Submessage)>,
) -> ProcessOutcome {
	if let Some(key) = header.client_key {
		return process_create_client(root, key, body);
	}

	let Some(client_key) = client_key else {
		log::warn!("dropping packet with no resolvable client key");
		return ProcessOutcome::empty();
	};

	let Some(session) = root.get(client_key) else {
		log::warn!("dropping packet for unknown client {client_key:#x}");
		return ProcessOutcome::empty();
	};

	let mut outcome = ProcessOutcome::empty();
	let mut session = session.lock().expect("session mutex poisoned");
	session.touch();

	// Stream-layer gating (spec §4.3): a best-effort packet is delivered
	// only if its seq is ahead of the last one seen; a reliable packet is
	// buffered until the window slides it (and everything it unblocks)
	// into order. `NONE` carries no sequencing at all.
	let deliverable: Vec<Vec<u8>> = match StreamKind::of(header.stream_id) {
		StreamKind::None => vec![body.to_vec()],
		StreamKind::BestEffort => match session.input_mut(header.stream_id) {
			InputStream::BestEffort(stream) => {
				if stream.accept(SeqNum::new(header.sequence_nr)) {
					vec![body.to_vec()]
				} else {
					Vec::new()
				}
			}
			_ => unreachable!("StreamKind::BestEffort always yields InputStream::BestEffort"),
		},
		StreamKind::Reliable => match session.input_mut(header.stream_id) {
			InputStream::Reliable(stream) => stream.receive(SeqNum::new(header.sequence_nr), body.to_vec()),
			_ => unreachable!("StreamKind::Reliable always yields InputStream::Reliable"),
		},
	};

	for payload in deliverable {
		let mut rest: &[u8] = &payload;
		while !rest.is_empty() {
			match submessage::parse(rest) {
				Ok((sub, consumed)) => {
					rest = &rest[consumed..];
					process_one(root, middleware, read_pipeline, client_key, &mut session, header.stream_id, sub, output_tx, &mut outcome);
				}
				Err(_) => {
					log::warn!("aborting packet from client {client_key:#x}: malformed submessage");
					break;
				}
			}
		}
	}

	outcome
}

fn process_create_client(root: &Root, client_key: u32, body: &[u8]) -> ProcessOutcome {
	let Ok((Submessage::CreateClient(CreateClientPayload { session_id, mtu, .. }), _)) = submessage::parse(body) else {
		return ProcessOutcome::empty();
	};

	root.create_client(client_key, session_id, mtu);

	let mut info = vec![StatusCode::Ok as u8];
	info.extend_from_slice(&crate::info::AGENT_INFO.to_bytes());
	ProcessOutcome::one(0, Submessage::StatusAgent(submessage::StatusAgentPayload { info }))
}

#[allow(clippy::too_many_arguments)]
fn process_one(
	root: &Root,
	middleware: &Arc<dyn Middleware>,
	read_pipeline: &ReadPipelineManager,
	client_key: u32,
	session: &mut ClientSession,
	stream_id: u8,
	sub: Submessage,
	output_tx: &Sender<(u32, u8, Submessage)>,
	outcome: &mut ProcessOutcome,
) {
	match sub {
		Submessage::CreateClient(_) => {
			// Only valid as the very first submessage of a session-less
			// packet; process_packet already special-cased that path.
		}

		Submessage::Create(CreatePayload { object_id, parent_or_domain_id, mode, representation }) => {
			let rep = Representation::Binary(representation);
			let result = session.objects.create(middleware.as_ref(), object_id, parent_or_domain_id, mode, rep);
			let status = status_of(result);
			outcome.outputs.push(OutputItem::Submessage(
				stream_id,
				Submessage::Status(submessage::StatusPayload { related_object_id: object_id, request_id: 0, status }),
			));
		}

		Submessage::GetInfo(GetInfoPayload { object_id }) => {
			if object_id == SESSION_OBJECT {
				outcome.outputs.push(OutputItem::Submessage(stream_id, Submessage::Info(InfoPayload { data: crate::info::AGENT_INFO.to_bytes() })));
			} else if session.objects.contains(object_id) {
				outcome
					.outputs
					.push(OutputItem::Submessage(stream_id, Submessage::Info(InfoPayload { data: Vec::new() })));
			} else {
				outcome.outputs.push(OutputItem::Submessage(
					stream_id,
					Submessage::Status(submessage::StatusPayload {
						related_object_id: object_id,
						request_id: 0,
						status: StatusCode::ErrUnknownReference,
					}),
				));
			}
		}

		Submessage::Delete(DeletePayload { object_id }) => {
			if object_id == SESSION_OBJECT {
				read_pipeline.cancel_client(client_key);
				root.delete_client(client_key);
				outcome.delete_client = true;
				return;
			}

			let result = session.objects.delete(middleware.as_ref(), object_id);
			let status = result.as_ref().err().map(StatusCode::from).unwrap_or(StatusCode::Ok);
			outcome.outputs.push(OutputItem::Submessage(
				stream_id,
				Submessage::Status(submessage::StatusPayload { related_object_id: object_id, request_id: 0, status }),
			));
		}

		Submessage::StatusAgent(_) => {
			log::debug!("ignoring inbound STATUS_AGENT (p2p discovery is out of core scope)");
		}

		Submessage::Status(_) => {
			log::debug!("ignoring echoed STATUS submessage");
		}

		Submessage::Info(_) => {}

		Submessage::WriteData(WriteDataPayload { object_id, request_id, data }) => {
			let ok = middleware.write(object_id.as_raw(), &data);
			let status = if ok { StatusCode::Ok } else { StatusCode::ErrResources };
			outcome
				.outputs
				.push(OutputItem::Submessage(stream_id, Submessage::Status(submessage::StatusPayload { related_object_id: object_id, request_id, status })));
		}

		Submessage::ReadData(req) => {
			read_pipeline.start(middleware.clone(), client_key, req, stream_id, output_tx.clone());
		}

		Submessage::Data(_) => {
			log::debug!("ignoring inbound DATA (agent->client direction only)");
		}

		// ACKNACK/HEARTBEAT name the stream they concern in their own
		// payload (`target_stream`), independent of the control channel
		// they were delivered on; they ride the NONE stream and must not
		// be gated by the reliable window they themselves drive.
		Submessage::Acknack(AcknackPayload { first_unacked, nack_bitmap, stream_id: target_stream }) => {
			if let OutputStream::Reliable(output) = session.output_mut(target_stream) {
				for bytes in output.on_acknack(first_unacked, nack_bitmap, Instant::now()) {
					outcome.outputs.push(OutputItem::Raw(target_stream, bytes));
				}
			}
		}

		Submessage::Heartbeat(HeartbeatPayload { first_unacked, stream_id: target_stream, .. }) => {
			if let InputStream::Reliable(input) = session.input_mut(target_stream) {
				input.on_heartbeat(first_unacked);
				let (first_unacked, nack_bitmap) = input.acknack();
				outcome.outputs.push(OutputItem::Submessage(
					0,
					Submessage::Acknack(AcknackPayload { first_unacked, nack_bitmap, stream_id: target_stream }),
				));
			}
		}

		Submessage::Reset(_) => {
			session.reset();
		}

		Submessage::Fragment(FragmentPayload { last, data }) => {
			session.fragment_buffer_mut(stream_id).extend_from_slice(&data);
			if last {
				let assembled = session.take_fragment_buffer(stream_id);
				let mut rest: &[u8] = &assembled;
				while !rest.is_empty() {
					match submessage::parse(rest) {
						Ok((inner, consumed)) => {
							rest = &rest[consumed..];
							process_one(root, middleware, read_pipeline, client_key, session, stream_id, inner, output_tx, outcome);
						}
						Err(_) => {
							log::warn!("dropping malformed reassembled submessage on stream {stream_id:#x}");
							break;
						}
					}
				}
			}
		}

		Submessage::Timestamp(TimestampPayload { transmit_timestamp }) => {
			let now = runtime::time::system()
				.duration_since(std::time::UNIX_EPOCH)
				.map(|d| d.as_nanos() as i64)
				.unwrap_or(0);
			outcome.outputs.push(OutputItem::Submessage(
				stream_id,
				Submessage::TimestampReply(TimestampReplyPayload {
					transmit_timestamp,
					receive_timestamp: now,
					originate_timestamp: transmit_timestamp,
				}),
			));
		}

		Submessage::TimestampReply(_) => {
			log::debug!("ignoring client-originated TIMESTAMP_REPLY");
		}

		// Spec §4.5: unknown ids are skipped after reading their declared
		// length, not treated as a parse failure; `submessage::parse` already
		// consumed exactly that length, so there's nothing left to do here.
		Submessage::Unknown(id) => {
			log::trace!("skipping unknown submessage id {id}");
		}
	}
}

fn status_of(result: Result<StatusCode, AgentError>) -> StatusCode {
	match result {
		Ok(status) => status,
		Err(e) => StatusCode::from(&e),
	}
}
