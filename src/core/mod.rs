//! Core engine components: packet slots, the producer/consumer channel, the
//! per-packet property bag, the LRU session table, and the decode worker.

pub mod channel;
pub mod engine;
pub mod lru;
pub mod packet;
pub mod payload;
pub mod property;

pub use channel::Channel;
pub use engine::{Engine, EngineHandle, HandlerId};
pub use packet::Packet;
pub use payload::{Payload, Span};
pub use property::{Endian, EventId, ParamId, Property, Value};
