//! The XRCE wire format: message/submessage headers, sequence numbers,
//! serial framing + CRC16, and submessage payload (de)serialization.
//!
//! Everything here is pure data-in, data-out: no sockets, no session
//! state. The session/stream/object-tree layer in the `agent` crate is
//! built on top of these types.

pub mod crc16;
pub mod error;
pub mod framing;
pub mod header;
pub mod object;
pub mod seqnum;
pub mod submessage;

pub use error::AgentError;
pub use header::{MessageHeader, SubmessageHeader};
pub use object::{ObjectId, ObjectKind};
pub use seqnum::SeqNum;
pub use submessage::Submessage;
