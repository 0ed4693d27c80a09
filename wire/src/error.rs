use std::fmt;

/// Domain error kinds (spec §7). These cross the submessage-handler
/// boundary and get turned into a STATUS submessage rather than ever
/// unwinding into a panic — see `agent::processor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
	/// Payload failed to deserialize.
	InvalidData,
	/// `CREATE` found an existing, non-matching entry under `CreationMode::NEITHER`.
	AlreadyExists,
	/// `CREATE` with `reuse` found an existing entry with a different representation.
	Unmatched,
	/// Referenced object/session id does not exist.
	UnknownReference,
	/// A reliable stream's window is full; the caller must retry.
	Backpressure,
	/// A transport-level failure.
	Transport(TransportError),
	/// Cooperative shutdown or per-read cancellation.
	Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
	Ok,
	ServerError,
	TimeoutError,
	ConnectionError,
}

impl fmt::Display for AgentError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::InvalidData => write!(f, "payload failed to deserialize"),
			Self::AlreadyExists => write!(f, "object already exists"),
			Self::Unmatched => write!(f, "existing object does not match the requested representation"),
			Self::UnknownReference => write!(f, "unknown reference"),
			Self::Backpressure => write!(f, "stream window is full, retry later"),
			Self::Transport(e) => write!(f, "transport error: {e:?}"),
			Self::Cancelled => write!(f, "operation cancelled"),
		}
	}
}

impl std::error::Error for AgentError {}

/// Status codes relayed to the client in a STATUS submessage. Mirrors the
/// reference agent's result codes closely enough that a client written
/// against the real agent observes the same outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StatusCode {
	Ok = 0x00,
	OkMatched = 0x01,
	ErrInvalidData = 0x02,
	ErrUnknownReference = 0x03,
	ErrAlreadyExists = 0x04,
	ErrUnmatched = 0x05,
	ErrResources = 0x06,
}

impl From<&AgentError> for StatusCode {
	fn from(e: &AgentError) -> Self {
		match e {
			AgentError::InvalidData => Self::ErrInvalidData,
			AgentError::AlreadyExists => Self::ErrAlreadyExists,
			AgentError::Unmatched => Self::ErrUnmatched,
			AgentError::UnknownReference => Self::ErrUnknownReference,
			AgentError::Backpressure | AgentError::Transport(_) | AgentError::Cancelled => Self::ErrResources,
		}
	}
}

impl StatusCode {
	pub fn from_u8(v: u8) -> Result<Self, AgentError> {
		Ok(match v {
			0x00 => Self::Ok,
			0x01 => Self::OkMatched,
			0x02 => Self::ErrInvalidData,
			0x03 => Self::ErrUnknownReference,
			0x04 => Self::ErrAlreadyExists,
			0x05 => Self::ErrUnmatched,
			0x06 => Self::ErrResources,
			_ => return Err(AgentError::InvalidData),
		})
	}
}
