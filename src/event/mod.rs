//! Event Module - units of communication between agents
//!
//! Key types:
//! - `Event`: envelope with id + timestamp + routing fields + payload
//! - `EventData` / `Metadata`: ordered payload and control maps
//! - `Value`: closed tagged value union
//! - `keys`: well-known metadata keys (routing, counters, deadlines)

mod envelope;
pub mod keys;
mod value;

pub use envelope::{Event, EventData, Metadata};
pub use value::{Fields, Value};
