//! Small fixed-shape collections used by the session/stream/object-tree layer.
//!
//! `map` gives a hashbrown-speed keyed lookup for endpoint and object
//! tables, `ring` gives the fixed-size indexed window storage the reliable
//! stream ring (16 slots) and the serial framing buffer are built on, and
//! `slab` gives the generational arena recommended for the object tree in
//! an implementation language without tracing GC.

pub mod map;
pub mod ring;
pub mod slab;
