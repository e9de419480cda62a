//! Strix: a packet-capture decoding engine.
//!
//! Raw link-layer frames enter through a bounded packet [`Channel`]; a single
//! decode worker walks each packet through a chain of protocol modules
//! (ethernet → ipv4 → udp/tcp), which publish named attributes and semantic
//! events into a per-packet [`Property`]. User callbacks registered on event
//! names (`"tcp.new_session"`, `"tcp.established"`, `"tcp.closed"`) fire on
//! the worker thread in registration order.
//!
//! ```no_run
//! use std::sync::atomic::AtomicBool;
//! use strix::capture::{pcap::PcapFileSource, PacketSource};
//! use strix::config::StrixConfig;
//! use strix::core::Engine;
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut engine = Engine::new(&StrixConfig::default());
//! engine.on("tcp.established", |prop| {
//!     println!("established {}:{}", prop.src_port(), prop.dst_port());
//! });
//! engine.start()?;
//!
//! let channel = engine.channel();
//! let stop = AtomicBool::new(false);
//! PcapFileSource::open("capture.pcap")?.run(&channel, &stop)?;
//! engine.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod config;
pub mod core;
pub mod modules;
pub mod utils;

#[cfg(test)]
mod testutil;

pub use crate::config::StrixConfig;
pub use crate::core::{Channel, Engine, EngineHandle, HandlerId, Packet, Property};
