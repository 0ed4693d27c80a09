//! Submessage payloads and the dispatch table id (spec §4.5, §6).
//!
//! Parsing takes the enclosing [`SubmessageHeader`] so payload fields can
//! be read in the packet's declared endianness; serialization mirrors that
//! back out. Variable-length fields (the CDR-encoded representation
//! strings, write/read data) are carried as raw bytes — the CDR dialect
//! itself is a middleware concern, not this crate's.

use utils::endian::Endian;

use crate::error::AgentError;
use crate::header::{SubmessageHeader, FLAG_ENDIANNESS, FLAG_FRAGMENT_LAST};
use crate::object::ObjectId;
use crate::seqnum::SeqNum;

pub const SUBMSG_CREATE_CLIENT: u8 = 0;
pub const SUBMSG_CREATE: u8 = 1;
pub const SUBMSG_GET_INFO: u8 = 4;
pub const SUBMSG_DELETE: u8 = 5;
pub const SUBMSG_STATUS_AGENT: u8 = 6;
pub const SUBMSG_STATUS: u8 = 7;
pub const SUBMSG_INFO: u8 = 8;
pub const SUBMSG_WRITE_DATA: u8 = 9;
pub const SUBMSG_READ_DATA: u8 = 10;
pub const SUBMSG_DATA: u8 = 11;
pub const SUBMSG_ACKNACK: u8 = 12;
pub const SUBMSG_HEARTBEAT: u8 = 13;
pub const SUBMSG_RESET: u8 = 14;
pub const SUBMSG_FRAGMENT: u8 = 15;
pub const SUBMSG_TIMESTAMP: u8 = 16;
pub const SUBMSG_TIMESTAMP_REPLY: u8 = 17;

/// `CreationMode` bits carried in a CREATE payload (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CreationMode {
	pub reuse: bool,
	pub replace: bool,
}

impl CreationMode {
	fn from_byte(b: u8) -> Self {
		Self { reuse: b & 0x01 != 0, replace: b & 0x02 != 0 }
	}

	fn to_byte(self) -> u8 {
		(self.reuse as u8) | ((self.replace as u8) << 1)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateClientPayload {
	pub client_key: u32,
	pub session_id: u8,
	pub mtu: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePayload {
	pub object_id: ObjectId,
	/// For a parentless kind (Participant, Application, Type, QosProfile)
	/// this is a domain id; for every other kind it is the raw parent
	/// `ObjectId`. Which interpretation applies is a function of
	/// `object_id.kind`, not of this field alone.
	pub parent_or_domain_id: u16,
	pub mode: CreationMode,
	/// The CDR-encoded representation (XML or binary descriptor), opaque here.
	pub representation: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletePayload {
	pub object_id: ObjectId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetInfoPayload {
	pub object_id: ObjectId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusAgentPayload {
	/// Agent protocol version, agent vendor id and free-form info, carried
	/// opaquely: only the processor's discovery handler interprets these.
	pub info: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusPayload {
	pub related_object_id: ObjectId,
	pub request_id: u16,
	pub status: crate::error::StatusCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoPayload {
	pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteDataPayload {
	pub object_id: ObjectId,
	pub request_id: u16,
	pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
	Data,
	Sample,
	DataSequence,
	SampleSequence,
}

impl ReadMode {
	fn from_byte(b: u8) -> Result<Self, AgentError> {
		Ok(match b {
			0 => Self::Data,
			1 => Self::Sample,
			2 => Self::DataSequence,
			3 => Self::SampleSequence,
			_ => return Err(AgentError::InvalidData),
		})
	}

	fn to_byte(self) -> u8 {
		match self {
			Self::Data => 0,
			Self::Sample => 1,
			Self::DataSequence => 2,
			Self::SampleSequence => 3,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadDataPayload {
	pub object_id: ObjectId,
	pub request_id: u16,
	pub mode: ReadMode,
	pub max_samples: u16,
	pub max_bytes_per_sec: u32,
	/// Content-filter expression, opaque here.
	pub filter: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPayload {
	pub object_id: ObjectId,
	pub request_id: u16,
	pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcknackPayload {
	pub first_unacked: SeqNum,
	pub nack_bitmap: u16,
	pub stream_id: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatPayload {
	pub first_unacked: SeqNum,
	pub last_sent: SeqNum,
	pub stream_id: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetPayload;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentPayload {
	pub last: bool,
	pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampPayload {
	/// Originator timestamp, opaque transmission-time/reception-time pair
	/// in agent-defined units (nanoseconds since an arbitrary epoch).
	pub transmit_timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampReplyPayload {
	pub transmit_timestamp: i64,
	pub receive_timestamp: i64,
	pub originate_timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submessage {
	CreateClient(CreateClientPayload),
	Create(CreatePayload),
	GetInfo(GetInfoPayload),
	Delete(DeletePayload),
	StatusAgent(StatusAgentPayload),
	Status(StatusPayload),
	Info(InfoPayload),
	WriteData(WriteDataPayload),
	ReadData(ReadDataPayload),
	Data(DataPayload),
	Acknack(AcknackPayload),
	Heartbeat(HeartbeatPayload),
	Reset(ResetPayload),
	Fragment(FragmentPayload),
	Timestamp(TimestampPayload),
	TimestampReply(TimestampReplyPayload),
	/// An id this agent doesn't recognize. Spec §4.5: "unknown submessage
	/// ids are skipped after reading their declared length" — the frame was
	/// well-formed, so the packet's remaining submessages still process;
	/// this carries only the id, for a debug log at the call site.
	Unknown(u8),
}

fn object_id(endian: Endian, bytes: [u8; 2]) -> Result<ObjectId, AgentError> {
	ObjectId::from_raw(endian.read_u16(bytes))
}

/// Parse one submessage. `buf` must start at the submessage header;
/// returns the decoded submessage and the total number of bytes consumed
/// (header + payload).
pub fn parse(buf: &[u8]) -> Result<(Submessage, usize), AgentError> {
	let hdr = SubmessageHeader::parse(buf)?;
	let endian = hdr.endian();
	let start = crate::header::SUBMESSAGE_HEADER_SIZE;
	let end = start + hdr.submessage_length as usize;
	if buf.len() < end {
		return Err(AgentError::InvalidData);
	}
	let p = &buf[start..end];

	let submsg = match hdr.submessage_id {
		SUBMSG_CREATE_CLIENT => {
			if p.len() < 7 {
				return Err(AgentError::InvalidData);
			}
			Submessage::CreateClient(CreateClientPayload {
				client_key: endian.read_u32([p[0], p[1], p[2], p[3]]),
				session_id: p[4],
				mtu: endian.read_u16([p[5], p[6]]),
			})
		}
		SUBMSG_CREATE => {
			if p.len() < 6 {
				return Err(AgentError::InvalidData);
			}
			let object_id = object_id(endian, [p[0], p[1]])?;
			let parent_or_domain_id = endian.read_u16([p[2], p[3]]);
			let mode = CreationMode::from_byte(p[4]);
			let rep_len = p[5] as usize;
			if p.len() < 6 + rep_len {
				return Err(AgentError::InvalidData);
			}
			Submessage::Create(CreatePayload { object_id, parent_or_domain_id, mode, representation: p[6..6 + rep_len].to_vec() })
		}
		SUBMSG_GET_INFO => {
			if p.len() < 2 {
				return Err(AgentError::InvalidData);
			}
			Submessage::GetInfo(GetInfoPayload { object_id: object_id(endian, [p[0], p[1]])? })
		}
		SUBMSG_DELETE => {
			if p.len() < 2 {
				return Err(AgentError::InvalidData);
			}
			Submessage::Delete(DeletePayload { object_id: object_id(endian, [p[0], p[1]])? })
		}
		SUBMSG_STATUS_AGENT => Submessage::StatusAgent(StatusAgentPayload { info: p.to_vec() }),
		SUBMSG_STATUS => {
			if p.len() < 5 {
				return Err(AgentError::InvalidData);
			}
			let related_object_id = object_id(endian, [p[0], p[1]])?;
			let request_id = endian.read_u16([p[2], p[3]]);
			let status = crate::error::StatusCode::from_u8(p[4])?;
			Submessage::Status(StatusPayload { related_object_id, request_id, status })
		}
		SUBMSG_INFO => Submessage::Info(InfoPayload { data: p.to_vec() }),
		SUBMSG_WRITE_DATA => {
			if p.len() < 4 {
				return Err(AgentError::InvalidData);
			}
			let object_id = object_id(endian, [p[0], p[1]])?;
			let request_id = endian.read_u16([p[2], p[3]]);
			Submessage::WriteData(WriteDataPayload { object_id, request_id, data: p[4..].to_vec() })
		}
		SUBMSG_READ_DATA => {
			if p.len() < 13 {
				return Err(AgentError::InvalidData);
			}
			let object_id = object_id(endian, [p[0], p[1]])?;
			let request_id = endian.read_u16([p[2], p[3]]);
			let mode = ReadMode::from_byte(p[4])?;
			let max_samples = endian.read_u16([p[5], p[6]]);
			let max_bytes_per_sec = endian.read_u32([p[7], p[8], p[9], p[10]]);
			let filter_len = endian.read_u16([p[11], p[12]]) as usize;
			if p.len() < 13 + filter_len {
				return Err(AgentError::InvalidData);
			}
			Submessage::ReadData(ReadDataPayload {
				object_id,
				request_id,
				mode,
				max_samples,
				max_bytes_per_sec,
				filter: p[13..13 + filter_len].to_vec(),
			})
		}
		SUBMSG_DATA => {
			if p.len() < 4 {
				return Err(AgentError::InvalidData);
			}
			let object_id = object_id(endian, [p[0], p[1]])?;
			let request_id = endian.read_u16([p[2], p[3]]);
			Submessage::Data(DataPayload { object_id, request_id, data: p[4..].to_vec() })
		}
		SUBMSG_ACKNACK => {
			if p.len() < 5 {
				return Err(AgentError::InvalidData);
			}
			Submessage::Acknack(AcknackPayload {
				first_unacked: SeqNum::new(endian.read_u16([p[0], p[1]])),
				nack_bitmap: endian.read_u16([p[2], p[3]]),
				stream_id: p[4],
			})
		}
		SUBMSG_HEARTBEAT => {
			if p.len() < 5 {
				return Err(AgentError::InvalidData);
			}
			Submessage::Heartbeat(HeartbeatPayload {
				first_unacked: SeqNum::new(endian.read_u16([p[0], p[1]])),
				last_sent: SeqNum::new(endian.read_u16([p[2], p[3]])),
				stream_id: p[4],
			})
		}
		SUBMSG_RESET => Submessage::Reset(ResetPayload),
		SUBMSG_FRAGMENT => Submessage::Fragment(FragmentPayload { last: hdr.flags & FLAG_FRAGMENT_LAST != 0, data: p.to_vec() }),
		SUBMSG_TIMESTAMP => {
			if p.len() < 8 {
				return Err(AgentError::InvalidData);
			}
			Submessage::Timestamp(TimestampPayload { transmit_timestamp: read_i64(endian, p) })
		}
		SUBMSG_TIMESTAMP_REPLY => {
			if p.len() < 24 {
				return Err(AgentError::InvalidData);
			}
			Submessage::TimestampReply(TimestampReplyPayload {
				transmit_timestamp: read_i64(endian, &p[0..8]),
				receive_timestamp: read_i64(endian, &p[8..16]),
				originate_timestamp: read_i64(endian, &p[16..24]),
			})
		}
		id => Submessage::Unknown(id),
	};

	Ok((submsg, end))
}

fn read_i64(endian: Endian, p: &[u8]) -> i64 {
	let hi = endian.read_u32([p[4], p[5], p[6], p[7]]);
	let lo = endian.read_u32([p[0], p[1], p[2], p[3]]);
	((hi as i64) << 32) | lo as i64
}

fn write_i64(endian: Endian, out: &mut Vec<u8>, v: i64) {
	out.extend_from_slice(&endian.write_u32(v as u32));
	out.extend_from_slice(&endian.write_u32((v >> 32) as u32));
}

/// Returns the submessage id this payload serializes to.
pub fn submessage_id(sub: &Submessage) -> u8 {
	match sub {
		Submessage::CreateClient(_) => SUBMSG_CREATE_CLIENT,
		Submessage::Create(_) => SUBMSG_CREATE,
		Submessage::GetInfo(_) => SUBMSG_GET_INFO,
		Submessage::Delete(_) => SUBMSG_DELETE,
		Submessage::StatusAgent(_) => SUBMSG_STATUS_AGENT,
		Submessage::Status(_) => SUBMSG_STATUS,
		Submessage::Info(_) => SUBMSG_INFO,
		Submessage::WriteData(_) => SUBMSG_WRITE_DATA,
		Submessage::ReadData(_) => SUBMSG_READ_DATA,
		Submessage::Data(_) => SUBMSG_DATA,
		Submessage::Acknack(_) => SUBMSG_ACKNACK,
		Submessage::Heartbeat(_) => SUBMSG_HEARTBEAT,
		Submessage::Reset(_) => SUBMSG_RESET,
		Submessage::Fragment(_) => SUBMSG_FRAGMENT,
		Submessage::Timestamp(_) => SUBMSG_TIMESTAMP,
		Submessage::TimestampReply(_) => SUBMSG_TIMESTAMP_REPLY,
		Submessage::Unknown(id) => *id,
	}
}

/// Serialize a submessage (header + payload), in the given endianness.
pub fn serialize(sub: &Submessage, endian: Endian, extra_flags: u8) -> Vec<u8> {
	let mut payload = Vec::new();

	match sub {
		Submessage::CreateClient(p) => {
			payload.extend_from_slice(&endian.write_u32(p.client_key));
			payload.push(p.session_id);
			payload.extend_from_slice(&endian.write_u16(p.mtu));
		}
		Submessage::Create(p) => {
			payload.extend_from_slice(&endian.write_u16(p.object_id.as_raw()));
			payload.extend_from_slice(&endian.write_u16(p.parent_or_domain_id));
			payload.push(p.mode.to_byte());
			payload.push(p.representation.len() as u8);
			payload.extend_from_slice(&p.representation);
		}
		Submessage::GetInfo(p) => {
			payload.extend_from_slice(&endian.write_u16(p.object_id.as_raw()));
		}
		Submessage::Delete(p) => {
			payload.extend_from_slice(&endian.write_u16(p.object_id.as_raw()));
		}
		Submessage::StatusAgent(p) => {
			payload.extend_from_slice(&p.info);
		}
		Submessage::Status(p) => {
			payload.extend_from_slice(&endian.write_u16(p.related_object_id.as_raw()));
			payload.extend_from_slice(&endian.write_u16(p.request_id));
			payload.push(p.status as u8);
		}
		Submessage::Info(p) => {
			payload.extend_from_slice(&p.data);
		}
		Submessage::WriteData(p) => {
			payload.extend_from_slice(&endian.write_u16(p.object_id.as_raw()));
			payload.extend_from_slice(&endian.write_u16(p.request_id));
			payload.extend_from_slice(&p.data);
		}
		Submessage::ReadData(p) => {
			payload.extend_from_slice(&endian.write_u16(p.object_id.as_raw()));
			payload.extend_from_slice(&endian.write_u16(p.request_id));
			payload.push(p.mode.to_byte());
			payload.extend_from_slice(&endian.write_u16(p.max_samples));
			payload.extend_from_slice(&endian.write_u32(p.max_bytes_per_sec));
			payload.extend_from_slice(&endian.write_u16(p.filter.len() as u16));
			payload.extend_from_slice(&p.filter);
		}
		Submessage::Data(p) => {
			payload.extend_from_slice(&endian.write_u16(p.object_id.as_raw()));
			payload.extend_from_slice(&endian.write_u16(p.request_id));
			payload.extend_from_slice(&p.data);
		}
		Submessage::Acknack(p) => {
			payload.extend_from_slice(&endian.write_u16(p.first_unacked.get()));
			payload.extend_from_slice(&endian.write_u16(p.nack_bitmap));
			payload.push(p.stream_id);
		}
		Submessage::Heartbeat(p) => {
			payload.extend_from_slice(&endian.write_u16(p.first_unacked.get()));
			payload.extend_from_slice(&endian.write_u16(p.last_sent.get()));
			payload.push(p.stream_id);
		}
		Submessage::Reset(_) => {}
		Submessage::Unknown(_) => unreachable!("Unknown is only ever produced by parse, never serialized"),
		Submessage::Fragment(p) => {
			payload.extend_from_slice(&p.data);
		}
		Submessage::Timestamp(p) => write_i64(endian, &mut payload, p.transmit_timestamp),
		Submessage::TimestampReply(p) => {
			write_i64(endian, &mut payload, p.transmit_timestamp);
			write_i64(endian, &mut payload, p.receive_timestamp);
			write_i64(endian, &mut payload, p.originate_timestamp);
		}
	}

	let mut flags = endian.flag_bit() | extra_flags;
	if let Submessage::Fragment(f) = sub {
		if f.last {
			flags |= FLAG_FRAGMENT_LAST;
		}
	}

	let hdr = SubmessageHeader { submessage_id: submessage_id(sub), flags, submessage_length: payload.len() as u16 };
	let mut out = Vec::with_capacity(crate::header::SUBMESSAGE_HEADER_SIZE + payload.len());
	hdr.write_to(&mut out);
	out.extend_from_slice(&payload);
	out
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::object::ObjectKind;

	#[test]
	fn create_client_round_trips() {
		let sub = Submessage::CreateClient(CreateClientPayload { client_key: 0xDEADBEEF, session_id: 0x81, mtu: 512 });
		let bytes = serialize(&sub, Endian::Little, 0);
		let (parsed, len) = parse(&bytes).unwrap();
		assert_eq!(parsed, sub);
		assert_eq!(len, bytes.len());
	}

	#[test]
	fn create_round_trips_with_representation() {
		let sub = Submessage::Create(CreatePayload {
			object_id: ObjectId::new(ObjectKind::Participant, 1),
			parent_or_domain_id: 0,
			mode: CreationMode { reuse: true, replace: false },
			representation: b"<dds><participant/></dds>".to_vec(),
		});
		let bytes = serialize(&sub, Endian::Big, 0);
		let (parsed, _) = parse(&bytes).unwrap();
		assert_eq!(parsed, sub);
	}

	#[test]
	fn acknack_round_trips() {
		let sub = Submessage::Acknack(AcknackPayload { first_unacked: SeqNum::new(2), nack_bitmap: 0b1010, stream_id: 0x80 });
		let bytes = serialize(&sub, Endian::Little, 0);
		let (parsed, _) = parse(&bytes).unwrap();
		assert_eq!(parsed, sub);
	}

	#[test]
	fn big_endian_flag_round_trips_through_header() {
		let sub = Submessage::Heartbeat(HeartbeatPayload { first_unacked: SeqNum::new(1), last_sent: SeqNum::new(5), stream_id: 0x80 });
		let bytes = serialize(&sub, Endian::Big, 0);
		assert_eq!(bytes[1] & FLAG_ENDIANNESS, FLAG_ENDIANNESS);
		let (parsed, _) = parse(&bytes).unwrap();
		assert_eq!(parsed, sub);
	}

	#[test]
	fn unknown_submessage_id_is_skipped_not_rejected() {
		// spec §4.5: "unknown submessage ids are skipped after reading their
		// declared length" — a well-formed but unrecognized submessage must
		// not abort the rest of the packet.
		let mut bytes = Vec::new();
		let hdr = SubmessageHeader { submessage_id: 200, flags: 0, submessage_length: 3 };
		hdr.write_to(&mut bytes);
		bytes.extend_from_slice(&[0xAA, 0xBB, 0xCC]);
		let (parsed, consumed) = parse(&bytes).unwrap();
		assert_eq!(parsed, Submessage::Unknown(200));
		assert_eq!(consumed, bytes.len());
	}

	#[test]
	fn truncated_buffer_is_still_a_parse_error() {
		let mut bytes = Vec::new();
		let hdr = SubmessageHeader { submessage_id: SUBMSG_GET_INFO, flags: 0, submessage_length: 2 };
		hdr.write_to(&mut bytes);
		// declared 2 bytes of payload but none are actually present.
		assert!(parse(&bytes).is_err());
	}

	#[test]
	fn fragment_last_flag_round_trips() {
		let sub = Submessage::Fragment(FragmentPayload { last: true, data: vec![1, 2, 3] });
		let bytes = serialize(&sub, Endian::Little, 0);
		let (parsed, _) = parse(&bytes).unwrap();
		assert_eq!(parsed, sub);
	}
}
