//! Reusable packet slot records.
//!
//! Slots circulate between the capture producer and the decode worker through
//! the [`Channel`](crate::core::channel::Channel): the producer fills a slot
//! with [`Packet::load`], the worker decodes it, and the slot (buffer
//! included) returns to the pool for the next frame.

/// One captured frame: raw bytes, captured/wire lengths and the capture
/// timestamp in seconds + microseconds.
#[derive(Debug, Default)]
pub struct Packet {
    data: Vec<u8>,
    cap_len: usize,
    wire_len: usize,
    tv_sec: i64,
    tv_usec: u32,
}

impl Packet {
    /// Fill the slot with a captured frame, reusing the byte buffer.
    pub fn load(&mut self, bytes: &[u8], wire_len: usize, tv_sec: i64, tv_usec: u32) {
        self.data.clear();
        self.data.extend_from_slice(bytes);
        self.cap_len = bytes.len();
        self.wire_len = wire_len;
        self.tv_sec = tv_sec;
        self.tv_usec = tv_usec;
    }

    /// Number of bytes actually captured.
    pub fn cap_len(&self) -> usize {
        self.cap_len
    }

    /// Original length of the frame on the wire.
    pub fn wire_len(&self) -> usize {
        self.wire_len
    }

    /// Capture timestamp as (seconds, microseconds).
    pub fn tv(&self) -> (i64, u32) {
        (self.tv_sec, self.tv_usec)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_reuses_buffer() {
        let mut pkt = Packet::default();
        pkt.load(&[1, 2, 3, 4], 6, 100, 42);
        assert_eq!(pkt.bytes(), &[1, 2, 3, 4]);
        assert_eq!(pkt.cap_len(), 4);
        assert_eq!(pkt.wire_len(), 6);
        assert_eq!(pkt.tv(), (100, 42));

        pkt.load(&[9], 1, 101, 0);
        assert_eq!(pkt.bytes(), &[9]);
        assert_eq!(pkt.cap_len(), 1);
    }
}
