use utils::endian::Endian;

use crate::error::AgentError;

pub const SUBMESSAGE_HEADER_SIZE: usize = 4;

/// Message header (spec §6). `client_key` is only present when
/// `session_id < 0x80` (the client is not yet bound to a session, i.e.
/// this carries a `CREATE_CLIENT`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
	pub session_id: u8,
	pub stream_id: u8,
	pub sequence_nr: u16,
	pub client_key: Option<u32>,
}

impl MessageHeader {
	pub fn has_client_key(session_id: u8) -> bool {
		session_id < 0x80
	}

	pub fn encoded_len(&self) -> usize {
		4 + if self.client_key.is_some() { 4 } else { 0 }
	}

	pub fn parse(buf: &[u8]) -> Result<(Self, usize), AgentError> {
		if buf.len() < 4 {
			return Err(AgentError::InvalidData);
		}

		let session_id = buf[0];
		let stream_id = buf[1];
		let sequence_nr = u16::from_le_bytes([buf[2], buf[3]]);

		let (client_key, len) = if Self::has_client_key(session_id) {
			if buf.len() < 8 {
				return Err(AgentError::InvalidData);
			}
			(Some(u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]])), 8)
		} else {
			(None, 4)
		};

		Ok((Self { session_id, stream_id, sequence_nr, client_key }, len))
	}

	pub fn write_to(&self, out: &mut Vec<u8>) {
		out.push(self.session_id);
		out.push(self.stream_id);
		out.extend_from_slice(&self.sequence_nr.to_le_bytes());
		if let Some(key) = self.client_key {
			out.extend_from_slice(&key.to_le_bytes());
		}
	}
}

/// Submessage header (spec §6). `flags` bit 0 selects the endianness of
/// the payload that follows; bit 1 marks the last fragment of a
/// fragmented submessage; bit 2 marks the stream as reliable; bit 3
/// marks a replier-originated submessage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmessageHeader {
	pub submessage_id: u8,
	pub flags: u8,
	pub submessage_length: u16,
}

pub const FLAG_ENDIANNESS: u8 = 0b0001;
pub const FLAG_FRAGMENT_LAST: u8 = 0b0010;
pub const FLAG_RELIABLE: u8 = 0b0100;
pub const FLAG_REPLIER: u8 = 0b1000;

impl SubmessageHeader {
	pub fn endian(&self) -> Endian {
		Endian::from_flag(self.flags)
	}

	pub fn parse(buf: &[u8]) -> Result<Self, AgentError> {
		if buf.len() < SUBMESSAGE_HEADER_SIZE {
			return Err(AgentError::InvalidData);
		}

		let submessage_id = buf[0];
		let flags = buf[1];
		let endian = Endian::from_flag(flags);
		let submessage_length = endian.read_u16([buf[2], buf[3]]);

		Ok(Self { submessage_id, flags, submessage_length })
	}

	pub fn write_to(&self, out: &mut Vec<u8>) {
		out.push(self.submessage_id);
		out.push(self.flags);
		out.extend_from_slice(&self.endian().write_u16(self.submessage_length));
	}
}
