//! Per-packet attribute bag and event queue.
//!
//! A single `Property` instance lives for the lifetime of the decode worker
//! and is re-armed for every packet without reallocating: value slots keep
//! their buffers, the event list keeps its capacity, and the packet's byte
//! buffer is swapped in for the duration of the decode and swapped back out
//! before the slot returns to the channel pool.

use crate::core::packet::Packet;
use crate::core::payload::Span;

/// Identifier of a parameter definition issued by the module registry.
pub type ParamId = usize;
/// Identifier of an event definition issued by the module registry.
pub type EventId = usize;

/// Byte order recorded for copied values so readers get host-order integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    /// Network byte order; also the order of in-packet views.
    #[default]
    Big,
    Little,
}

#[derive(Debug, Default, Clone, Copy)]
enum ValueKind {
    #[default]
    Null,
    /// A view into the attached packet buffer.
    View(Span),
    /// Bytes copied into the slot's own buffer.
    Copied,
}

/// One attribute slot. Slots are owned by the [`Property`] and recycled
/// between packets; `set` stores a zero-copy view, `cpy` copies.
#[derive(Debug, Default)]
pub struct Value {
    active: bool,
    kind: ValueKind,
    buf: Vec<u8>,
    endian: Endian,
}

impl Value {
    /// Store a view of the current packet's bytes.
    pub fn set(&mut self, span: Span) {
        self.kind = ValueKind::View(span);
    }

    /// Copy `bytes` into the slot and remember their byte order.
    pub fn cpy(&mut self, bytes: &[u8], endian: Endian) {
        self.buf.clear();
        self.buf.extend_from_slice(bytes);
        self.kind = ValueKind::Copied;
        self.endian = endian;
    }

    pub fn is_null(&self) -> bool {
        matches!(self.kind, ValueKind::Null)
    }

    fn rearm(&mut self) {
        self.kind = ValueKind::Null;
        self.endian = Endian::Big;
        self.active = true;
    }
}

/// Per-packet decode state shared by the module chain and event handlers.
pub struct Property {
    data: Vec<u8>,
    cap_len: usize,
    tv_sec: i64,
    tv_usec: u32,
    src_addr: Option<Span>,
    dst_addr: Option<Span>,
    src_port: u16,
    dst_port: u16,
    values: Vec<Value>,
    touched: Vec<ParamId>,
    events: Vec<EventId>,
}

impl Property {
    pub fn new(param_count: usize) -> Self {
        let mut values = Vec::with_capacity(param_count);
        values.resize_with(param_count, Value::default);
        Self {
            data: Vec::new(),
            cap_len: 0,
            tv_sec: 0,
            tv_usec: 0,
            src_addr: None,
            dst_addr: None,
            src_port: 0,
            dst_port: 0,
            values,
            touched: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Arm for a new packet: take over its byte buffer and clear the state
    /// left by the previous packet. Must be paired with [`Property::finish`].
    pub fn init(&mut self, pkt: &mut Packet) {
        for &p in &self.touched {
            self.values[p].active = false;
        }
        self.touched.clear();
        self.events.clear();
        self.src_addr = None;
        self.dst_addr = None;
        self.src_port = 0;
        self.dst_port = 0;
        self.cap_len = pkt.cap_len();
        let (sec, usec) = pkt.tv();
        self.tv_sec = sec;
        self.tv_usec = usec;
        std::mem::swap(&mut self.data, pkt.data_mut());
    }

    /// Return the byte buffer to the packet slot.
    pub fn finish(&mut self, pkt: &mut Packet) {
        std::mem::swap(&mut self.data, pkt.data_mut());
    }

    /// Packet timestamp, seconds part.
    pub fn ts(&self) -> i64 {
        self.tv_sec
    }

    /// Packet timestamp as (seconds, microseconds).
    pub fn tv(&self) -> (i64, u32) {
        (self.tv_sec, self.tv_usec)
    }

    /// Packet timestamp in microseconds.
    pub fn tv_us(&self) -> i64 {
        self.tv_sec * 1_000_000 + i64::from(self.tv_usec)
    }

    /// Captured length of the attached packet.
    pub fn cap_len(&self) -> usize {
        self.cap_len
    }

    /// Resolve a span against the attached packet buffer.
    pub fn slice(&self, span: Span) -> &[u8] {
        &self.data[span.off..span.off + span.len]
    }

    pub fn set_addrs(&mut self, src: Span, dst: Span) {
        self.src_addr = Some(src);
        self.dst_addr = Some(dst);
    }

    pub fn src_addr(&self) -> Option<&[u8]> {
        self.src_addr.map(|s| self.slice(s))
    }

    pub fn dst_addr(&self) -> Option<&[u8]> {
        self.dst_addr.map(|s| self.slice(s))
    }

    pub fn src_port(&self) -> u16 {
        self.src_port
    }

    pub fn dst_port(&self) -> u16 {
        self.dst_port
    }

    pub fn set_src_port(&mut self, port: u16) {
        self.src_port = port;
    }

    pub fn set_dst_port(&mut self, port: u16) {
        self.dst_port = port;
    }

    /// Fetch the slot for `param`, activating and clearing it on first use
    /// within the current packet.
    pub fn retain_value(&mut self, param: ParamId) -> &mut Value {
        let slot = &mut self.values[param];
        if !slot.active {
            slot.rearm();
            self.touched.push(param);
        }
        slot
    }

    /// Append an event to the packet's ordered event list.
    pub fn push_event(&mut self, event: EventId) {
        self.events.push(event);
    }

    /// Events pushed for the current packet, in push order.
    pub fn events(&self) -> &[EventId] {
        &self.events
    }

    /// The value written for `param` in the current packet, if any.
    pub fn value(&self, param: ParamId) -> Option<&Value> {
        self.values.get(param).filter(|v| v.active && !v.is_null())
    }

    pub fn has_value(&self, param: ParamId) -> bool {
        self.value(param).is_some()
    }

    /// Raw bytes of a value, resolving views against the attached packet.
    pub fn value_bytes(&self, param: ParamId) -> Option<&[u8]> {
        let v = self.value(param)?;
        match v.kind {
            ValueKind::Null => None,
            ValueKind::View(span) => self.data.get(span.off..span.off + span.len),
            ValueKind::Copied => Some(&v.buf),
        }
    }

    fn value_uint(&self, param: ParamId, width: usize) -> Option<u64> {
        let v = self.value(param)?;
        let (bytes, endian) = match v.kind {
            ValueKind::Null => return None,
            ValueKind::View(span) => {
                (self.data.get(span.off..span.off + span.len)?, Endian::Big)
            }
            ValueKind::Copied => (v.buf.as_slice(), v.endian),
        };
        if bytes.len() != width {
            return None;
        }
        let mut out = 0u64;
        match endian {
            Endian::Big => {
                for &b in bytes {
                    out = (out << 8) | u64::from(b);
                }
            }
            Endian::Little => {
                for &b in bytes.iter().rev() {
                    out = (out << 8) | u64::from(b);
                }
            }
        }
        Some(out)
    }

    pub fn value_u8(&self, param: ParamId) -> Option<u8> {
        self.value_uint(param, 1).map(|v| v as u8)
    }

    pub fn value_u16(&self, param: ParamId) -> Option<u16> {
        self.value_uint(param, 2).map(|v| v as u16)
    }

    pub fn value_u32(&self, param: ParamId) -> Option<u32> {
        self.value_uint(param, 4).map(|v| v as u32)
    }

    pub fn value_u64(&self, param: ParamId) -> Option<u64> {
        self.value_uint(param, 8)
    }
}
