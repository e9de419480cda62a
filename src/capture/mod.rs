//! Packet acquisition.
//!
//! Sources feed captured frames into the engine's packet [`Channel`],
//! blocking on the bounded slot pool when the decoder falls behind (no frame
//! is ever dropped to relieve pressure). Live interface capture would plug in
//! behind the same [`PacketSource`] trait.

pub mod pcap;

use std::sync::atomic::AtomicBool;
use std::time::SystemTime;

use thiserror::Error;

use crate::core::channel::Channel;
use crate::core::packet::Packet;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("capture parse error ({context}): {message}")]
    Parse {
        context: &'static str,
        message: String,
    },
}

/// Capture statistics.
#[derive(Debug, Clone, Default)]
pub struct CaptureStats {
    /// Number of frames pushed into the channel.
    pub packets: usize,
    /// Captured bytes pushed into the channel.
    pub bytes: usize,
    /// When the source started reading.
    pub start_time: Option<SystemTime>,
}

/// A source of captured frames.
pub trait PacketSource {
    /// Read frames into the channel until exhausted or `stop` is raised.
    /// Blocks on channel back-pressure; returns the final statistics.
    fn run(&mut self, channel: &Channel<Packet>, stop: &AtomicBool)
        -> Result<CaptureStats, CaptureError>;
}
