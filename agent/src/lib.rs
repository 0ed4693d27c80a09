//! Core of the XRCE-DDS Agent: session/stream/object-tree state machine,
//! independent of any one transport.

pub mod endpoint;
pub mod info;
pub mod middleware;
pub mod object_tree;
#[cfg(feature = "p2p")]
pub mod p2p;
pub mod processor;
pub mod read_pipeline;
pub mod root;
pub mod server;
pub mod session;
pub mod stream;
pub mod token_bucket;
pub mod transports;
