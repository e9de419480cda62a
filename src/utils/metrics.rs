//! Engine throughput counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Cumulative counters maintained by the decode worker.
#[derive(Debug)]
pub struct EngineMetrics {
    start_time: SystemTime,
    packets: AtomicU64,
    bytes: AtomicU64,
    events: AtomicU64,
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            start_time: SystemTime::now(),
            packets: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            events: AtomicU64::new(0),
        }
    }

    /// Record a pulled packet and its captured size.
    pub fn record_packet(&self, size: usize) {
        self.packets.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(size as u64, Ordering::Relaxed);
    }

    /// Record one handler invocation.
    pub fn record_event(&self) {
        self.events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packets(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn events(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }

    /// Packets per second of wall-clock uptime.
    pub fn packets_per_second(&self) -> f64 {
        match self.start_time.elapsed() {
            Ok(elapsed) if elapsed.as_secs_f64() > 0.0 => {
                self.packets() as f64 / elapsed.as_secs_f64()
            }
            _ => 0.0,
        }
    }

    /// Summary line for the embedding application.
    pub fn format(&self) -> String {
        format!(
            "packets: {}, bytes: {}, handler invocations: {}, {:.0} packets/sec",
            self.packets(),
            self.bytes(),
            self.events(),
            self.packets_per_second()
        )
    }
}
