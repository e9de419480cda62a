//! TCP module: header decoding plus per-flow session tracking.
//!
//! Sessions are stored in an [`LruTable`] keyed by a direction-independent
//! 4-tuple and expire 300 seconds after creation, with the table clock driven
//! by packet timestamps rather than the host clock. Each session tracks one
//! [`Stream`] per direction through the three-way handshake, parks
//! out-of-order segments by relative sequence number, and replays them
//! through the decoder once their predecessor arrives.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use tracing::{trace, warn};

use crate::core::lru::{HashKey, LruTable};
use crate::core::payload::{Payload, Span};
use crate::core::property::{Endian, EventId, ParamId, Property};
use crate::modules::{ModId, Module, RegistryBuilder};

pub const FIN: u8 = 0x01;
pub const SYN: u8 = 0x02;
pub const RST: u8 = 0x04;
pub const PUSH: u8 = 0x08;
pub const ACK: u8 = 0x10;
pub const URG: u8 = 0x20;
pub const ECE: u8 = 0x40;
pub const CWR: u8 = 0x80;

const HEADER_LEN: usize = 20;
const SSN_RING: usize = 3600;

fn flag_str(flags: u8) -> String {
    let mut s = String::with_capacity(4);
    s.push(if flags & FIN != 0 { 'F' } else { '*' });
    s.push(if flags & SYN != 0 { 'S' } else { '*' });
    s.push(if flags & RST != 0 { 'R' } else { '*' });
    s.push(if flags & ACK != 0 { 'A' } else { '*' });
    s
}

/// Parameter and event ids claimed by the TCP module, passed by value into
/// session code so the session table can stay mutably borrowed.
#[derive(Clone, Copy)]
struct TcpIds {
    p_src_port: ParamId,
    p_dst_port: ParamId,
    p_seq: ParamId,
    p_ack: ParamId,
    p_offset: ParamId,
    p_flags: ParamId,
    p_window: ParamId,
    p_chksum: ParamId,
    p_urgptr: ParamId,
    p_flag_fin: ParamId,
    p_flag_syn: ParamId,
    p_flag_rst: ParamId,
    p_flag_push: ParamId,
    p_flag_ack: ParamId,
    p_flag_urg: ParamId,
    p_flag_ece: ParamId,
    p_flag_cwr: ParamId,
    p_optdata: ParamId,
    p_segment: ParamId,
    p_data: ParamId,
    p_id: ParamId,
    p_rtt_3wh: ParamId,
    p_tx_server: ParamId,
    p_tx_client: ParamId,
    ev_new: EventId,
    ev_estb: EventId,
    ev_close: EventId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dir {
    Client,
    Server,
}

impl Dir {
    fn flip(self) -> Dir {
        match self {
            Dir::Client => Dir::Server,
            Dir::Server => Dir::Client,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    None,
    SynSent,
    SynackSent,
    Established,
    Closing,
    Closed,
}

/// One direction of a flow.
#[derive(Debug)]
struct Stream {
    addr: Vec<u8>,
    port: u16,
    has_base_seq: bool,
    base_seq: u32,
    next_seq: u32,
    ack: u32,
    win_size: u32,
    tx_size: u64,
}

impl Stream {
    fn new(addr: Vec<u8>, port: u16) -> Self {
        Self {
            addr,
            port,
            has_base_seq: false,
            base_seq: 0,
            next_seq: 0,
            ack: 0,
            win_size: 0,
            tx_size: 0,
        }
    }

    fn matches(&self, addr: &[u8], port: u16) -> bool {
        self.port == port && self.addr == addr
    }

    fn is_src(&self, prop: &Property) -> bool {
        match prop.src_addr() {
            Some(addr) => self.matches(addr, prop.src_port()),
            None => false,
        }
    }

    fn to_rel_seq(&self, seq: u32) -> u32 {
        seq.wrapping_sub(self.base_seq)
    }

    /// Record the ISN from this stream's SYN (or SYN/ACK); the next expected
    /// relative sequence starts right after it.
    fn set_base_seq(&mut self, seq: u32, seg_len: usize) {
        self.has_base_seq = true;
        self.base_seq = seq;
        self.next_seq = 1u32.wrapping_add(seg_len as u32);
    }

    fn inc_seq(&mut self) {
        self.next_seq = self.next_seq.wrapping_add(1);
    }

    fn in_window(&self, seq: u32) -> bool {
        let rel_seq = seq.wrapping_sub(self.base_seq);
        let rel_ack = self.ack.wrapping_sub(self.base_seq);
        trace!(
            rel_seq,
            next = self.next_seq,
            win = self.win_size,
            rel_ack,
            "window check"
        );
        // Accepts everything until window scaling is handled.
        true
    }

    /// Account for a segment sent by this stream. Returns `false` when the
    /// sequence does not line up with the expected next byte.
    fn send(&mut self, flags: u8, seq: u32, _ack: u32, data_len: usize) -> bool {
        if !self.has_base_seq {
            return true;
        }

        let rel_seq = seq.wrapping_sub(self.base_seq);
        trace!(
            flags = %flag_str(flags),
            rel_seq,
            next = self.next_seq,
            data_len,
            "stream send"
        );

        if self.next_seq == rel_seq {
            self.next_seq = self.next_seq.wrapping_add(data_len as u32);
            self.tx_size += data_len as u64;
            true
        } else {
            false
        }
    }

    /// Record the latest ack and advertised window seen from the peer.
    fn recv(&mut self, ack: u32, win_size: u32) {
        self.ack = ack;
        self.win_size = win_size;
    }
}

/// An out-of-order segment awaiting its predecessor. Segments sharing the
/// same relative sequence chain up in arrival order.
#[derive(Debug)]
struct Segment {
    bytes: Vec<u8>,
    seq: u32,
    flags: u8,
}

/// Segment bytes entering the stream decoder: either a range of the packet
/// currently attached to the property, or bytes of a previously parked
/// segment being replayed.
#[derive(Clone, Copy)]
enum SegData<'a> {
    Wire(Option<Span>),
    Parked(&'a [u8]),
}

impl SegData<'_> {
    fn len(&self) -> usize {
        match self {
            SegData::Wire(Some(span)) => span.len,
            SegData::Wire(None) => 0,
            SegData::Parked(bytes) => bytes.len(),
        }
    }
}

struct Session {
    id: u64,
    status: Status,
    client: Stream,
    server: Stream,
    /// Which stream sent the first FIN.
    closing: Option<Dir>,
    ts_init_us: i64,
    ts_estb_us: i64,
    rtt_us: i64,
    /// Reassembly buffer for the current packet's delivery.
    buf: Option<Vec<u8>>,
    /// Parked segments keyed by relative sequence.
    seg_map: BTreeMap<u32, Vec<Segment>>,
}

impl Session {
    /// The first observed packet's source becomes the client.
    fn new(prop: &Property, id: u64) -> Self {
        let src = prop.src_addr().unwrap_or(&[]).to_vec();
        let dst = prop.dst_addr().unwrap_or(&[]).to_vec();
        Self {
            id,
            status: Status::None,
            client: Stream::new(src, prop.src_port()),
            server: Stream::new(dst, prop.dst_port()),
            closing: None,
            ts_init_us: 0,
            ts_estb_us: 0,
            rtt_us: 0,
            buf: None,
            seg_map: BTreeMap::new(),
        }
    }

    fn stream(&self, dir: Dir) -> &Stream {
        match dir {
            Dir::Client => &self.client,
            Dir::Server => &self.server,
        }
    }

    fn stream_mut(&mut self, dir: Dir) -> &mut Stream {
        match dir {
            Dir::Client => &mut self.client,
            Dir::Server => &mut self.server,
        }
    }

    /// Run the handshake/teardown state machine; returns the new status when
    /// a transition fires. Transitions never move backward.
    fn trans_state(
        &mut self,
        flags: u8,
        dir: Dir,
        seq: u32,
        seg_len: usize,
        tv_us: i64,
    ) -> Option<Status> {
        match self.status {
            Status::None if flags == SYN && dir == Dir::Client => {
                trace!(ssn_id = self.id, "SYN");
                self.status = Status::SynSent;
                self.ts_init_us = tv_us;
                self.stream_mut(dir).set_base_seq(seq, seg_len);
                Some(Status::SynSent)
            }
            Status::SynSent if flags == (SYN | ACK) && dir == Dir::Server => {
                trace!(ssn_id = self.id, "SYN-ACK");
                self.status = Status::SynackSent;
                self.stream_mut(dir).set_base_seq(seq, seg_len);
                Some(Status::SynackSent)
            }
            Status::SynackSent if flags == ACK && dir == Dir::Client => {
                trace!(ssn_id = self.id, "ACK, established");
                self.status = Status::Established;
                self.ts_estb_us = tv_us;
                self.rtt_us = self.ts_estb_us - self.ts_init_us;
                Some(Status::Established)
            }
            Status::Established if flags & FIN != 0 => {
                trace!(ssn_id = self.id, "FIN");
                self.status = Status::Closing;
                self.closing = Some(dir);
                self.stream_mut(dir).inc_seq();
                Some(Status::Closing)
            }
            Status::Closing if flags & FIN != 0 && self.closing != Some(dir) => {
                trace!(ssn_id = self.id, "closed");
                self.status = Status::Closed;
                self.stream_mut(dir).inc_seq();
                Some(Status::Closed)
            }
            Status::Closed => {
                trace!(ssn_id = self.id, flags = %flag_str(flags), "packet on closed session");
                None
            }
            _ => None,
        }
    }

    /// Feed one segment through the sender's stream accounting, the state
    /// machine, and the reassembly trigger. Returns `false` when the segment
    /// was out of order and parked instead.
    #[allow(clippy::too_many_arguments)]
    fn decode_stream(
        &mut self,
        prop: &mut Property,
        ids: &TcpIds,
        dir: Dir,
        flags: u8,
        seq: u32,
        ack: u32,
        win: u16,
        seg: SegData<'_>,
    ) -> bool {
        let seg_len = seg.len();

        if !self.stream_mut(dir).send(flags, seq, ack, seg_len) {
            if self.stream(dir).in_window(seq) {
                let rel_seq = self.stream(dir).to_rel_seq(seq);
                let bytes = match seg {
                    SegData::Wire(Some(span)) => prop.slice(span).to_vec(),
                    SegData::Wire(None) => Vec::new(),
                    SegData::Parked(b) => b.to_vec(),
                };
                trace!(rel_seq, len = bytes.len(), "parking out-of-order segment");
                self.seg_map
                    .entry(rel_seq)
                    .or_default()
                    .push(Segment { bytes, seq, flags });
            } else {
                trace!(seq, "segment outside window, dropped");
            }
            return false;
        }

        self.stream_mut(dir.flip()).recv(ack, u32::from(win));

        match self.trans_state(flags, dir, seq, seg_len, prop.tv_us()) {
            Some(Status::Established) => {
                prop.push_event(ids.ev_estb);
                let rtt = self.rtt_us.max(0) as u32;
                prop.retain_value(ids.p_rtt_3wh)
                    .cpy(&rtt.to_le_bytes(), Endian::Little);
            }
            Some(Status::Closed) => {
                prop.push_event(ids.ev_close);
            }
            _ => {}
        }

        if let Some(buf) = self.buf.as_mut() {
            match seg {
                SegData::Wire(Some(span)) => buf.extend_from_slice(prop.slice(span)),
                SegData::Parked(bytes) => buf.extend_from_slice(bytes),
                SegData::Wire(None) => {}
            }
        }
        if let Some(buf) = self.buf.as_ref() {
            prop.retain_value(ids.p_data).cpy(buf, Endian::Big);
        } else {
            match seg {
                SegData::Wire(Some(span)) => prop.retain_value(ids.p_data).set(span),
                SegData::Wire(None) => prop.retain_value(ids.p_data).set(Span::EMPTY),
                SegData::Parked(bytes) => prop.retain_value(ids.p_data).cpy(bytes, Endian::Big),
            }
        }

        if !self.seg_map.is_empty() {
            let next_seq = self.stream(dir).next_seq;
            if let Some(chain) = self.seg_map.remove(&next_seq) {
                trace!(
                    rel_seq = next_seq,
                    segments = chain.len(),
                    "delivering parked segments"
                );
                if self.buf.is_none() {
                    let mut buf = Vec::with_capacity(seg_len);
                    match seg {
                        SegData::Wire(Some(span)) => buf.extend_from_slice(prop.slice(span)),
                        SegData::Parked(bytes) => buf.extend_from_slice(bytes),
                        SegData::Wire(None) => {}
                    }
                    self.buf = Some(buf);
                }
                for parked in &chain {
                    self.decode_stream(
                        prop,
                        ids,
                        dir,
                        parked.flags,
                        parked.seq,
                        ack,
                        win,
                        SegData::Parked(&parked.bytes),
                    );
                }
            }
        }

        true
    }

    #[allow(clippy::too_many_arguments)]
    fn decode(
        &mut self,
        prop: &mut Property,
        ids: &TcpIds,
        flags: u8,
        seq: u32,
        ack: u32,
        win: u16,
        seg: Option<Span>,
    ) {
        self.buf = None;

        let dir = if self.client.is_src(prop) {
            Dir::Client
        } else {
            Dir::Server
        };

        self.decode_stream(prop, ids, dir, flags, seq, ack, win, SegData::Wire(seg));

        let tx_server = self.client.tx_size;
        let tx_client = self.server.tx_size;
        prop.retain_value(ids.p_tx_server)
            .cpy(&tx_server.to_le_bytes(), Endian::Little);
        prop.retain_value(ids.p_tx_client)
            .cpy(&tx_client.to_le_bytes(), Endian::Little);
    }
}

/// Build the canonical direction-independent flow key: the lexicographically
/// greater (addr, port) endpoint is appended first, so both directions of a
/// flow produce identical key bytes.
fn make_key(prop: &Property, key: &mut HashKey) -> bool {
    let (src, dst) = match (prop.src_addr(), prop.dst_addr()) {
        (Some(src), Some(dst)) => (src, dst),
        _ => return false,
    };
    debug_assert_eq!(src.len(), dst.len());
    let src_port = prop.src_port();
    let dst_port = prop.dst_port();

    key.clear();
    let order = src.cmp(dst).then(src_port.cmp(&dst_port));
    if order == Ordering::Greater {
        key.append(src);
        key.append(&src_port.to_be_bytes());
        key.append(dst);
        key.append(&dst_port.to_be_bytes());
    } else {
        key.append(dst);
        key.append(&dst_port.to_be_bytes());
        key.append(src);
        key.append(&src_port.to_be_bytes());
    }
    key.finalize();
    true
}

/// The TCP decoder module and flow tracker.
pub struct Tcp {
    ids: TcpIds,
    session_ttl: u64,
    ssn_table: LruTable<Session>,
    ssn_count: u64,
    curr_ts: i64,
    init_ts: bool,
    key: HashKey,
}

impl Tcp {
    pub fn new(builder: &mut RegistryBuilder, session_ttl: u64, max_sessions: usize) -> Self {
        let ids = TcpIds {
            p_src_port: builder.define_param("src_port"),
            p_dst_port: builder.define_param("dst_port"),
            p_seq: builder.define_param("seq"),
            p_ack: builder.define_param("ack"),
            p_offset: builder.define_param("offset"),
            p_flags: builder.define_param("flags"),
            p_window: builder.define_param("window"),
            p_chksum: builder.define_param("chksum"),
            p_urgptr: builder.define_param("urgptr"),
            p_flag_fin: builder.define_param("flag_fin"),
            p_flag_syn: builder.define_param("flag_syn"),
            p_flag_rst: builder.define_param("flag_rst"),
            p_flag_push: builder.define_param("flag_push"),
            p_flag_ack: builder.define_param("flag_ack"),
            p_flag_urg: builder.define_param("flag_urg"),
            p_flag_ece: builder.define_param("flag_ece"),
            p_flag_cwr: builder.define_param("flag_cwr"),
            p_optdata: builder.define_param("optdata"),
            p_segment: builder.define_param("segment"),
            p_data: builder.define_param("data"),
            p_id: builder.define_param("id"),
            p_rtt_3wh: builder.define_param("rtt_3wh"),
            p_tx_server: builder.define_param("tx_server"),
            p_tx_client: builder.define_param("tx_client"),
            ev_new: builder.define_event("new_session"),
            ev_estb: builder.define_event("established"),
            ev_close: builder.define_event("closed"),
        };
        Self {
            ids,
            session_ttl,
            ssn_table: LruTable::new(SSN_RING, max_sessions),
            ssn_count: 0,
            curr_ts: 0,
            init_ts: false,
            key: HashKey::new(),
        }
    }
}

impl Module for Tcp {
    fn decode(&mut self, pd: &mut Payload, prop: &mut Property) -> Option<ModId> {
        let hdr = pd.retain(HEADER_LEN)?;
        let (src_port, dst_port, seq, ack, offset_raw, raw_flags, win) = {
            let b = prop.slice(hdr);
            (
                u16::from_be_bytes([b[0], b[1]]),
                u16::from_be_bytes([b[2], b[3]]),
                u32::from_be_bytes([b[4], b[5], b[6], b[7]]),
                u32::from_be_bytes([b[8], b[9], b[10], b[11]]),
                b[12],
                b[13],
                u16::from_be_bytes([b[14], b[15]]),
            )
        };

        prop.set_src_port(src_port);
        prop.set_dst_port(dst_port);

        let ids = self.ids;
        prop.retain_value(ids.p_src_port).set(hdr.field(0, 2));
        prop.retain_value(ids.p_dst_port).set(hdr.field(2, 2));
        prop.retain_value(ids.p_seq).set(hdr.field(4, 4));
        prop.retain_value(ids.p_ack).set(hdr.field(8, 4));
        prop.retain_value(ids.p_offset).set(hdr.field(12, 1));
        prop.retain_value(ids.p_flags).set(hdr.field(13, 1));
        prop.retain_value(ids.p_window).set(hdr.field(14, 2));
        prop.retain_value(ids.p_chksum).set(hdr.field(16, 2));
        prop.retain_value(ids.p_urgptr).set(hdr.field(18, 2));

        let flag_params = [
            (ids.p_flag_fin, FIN),
            (ids.p_flag_syn, SYN),
            (ids.p_flag_rst, RST),
            (ids.p_flag_push, PUSH),
            (ids.p_flag_ack, ACK),
            (ids.p_flag_urg, URG),
            (ids.p_flag_ece, ECE),
            (ids.p_flag_cwr, CWR),
        ];
        for (param, mask) in flag_params {
            let set = u8::from(raw_flags & mask != 0);
            prop.retain_value(param).cpy(&[set], Endian::Little);
        }

        // Header attributes above stay published even when the options are
        // truncated; only the session tracking below is skipped.
        let hdr_len = ((offset_raw >> 4) as usize) * 4;
        if hdr_len < HEADER_LEN {
            return None;
        }
        if hdr_len > HEADER_LEN {
            let opts = pd.retain(hdr_len - HEADER_LEN)?;
            prop.retain_value(ids.p_optdata).set(opts);
        }

        let seg_len = pd.length();
        let seg = if seg_len > 0 {
            let span = pd.retain(seg_len)?;
            prop.retain_value(ids.p_segment).set(span);
            Some(span)
        } else {
            None
        };

        // Advance the session clock from the packet timestamp; the first
        // packet only latches it.
        let ts = prop.ts();
        if self.curr_ts < ts {
            let delta = (ts - self.curr_ts) as u64;
            self.curr_ts = ts;
            if self.init_ts {
                self.ssn_table.step(delta);
            } else {
                self.init_ts = true;
            }
        }
        while let Some(old) = self.ssn_table.pop_expired() {
            trace!(ssn_id = old.id, "session expired");
        }

        let flags = raw_flags & (FIN | SYN | RST | ACK);

        if !make_key(prop, &mut self.key) {
            return None;
        }

        if !self.ssn_table.contains(&self.key) {
            self.ssn_count += 1;
            let ssn = Session::new(prop, self.ssn_count);
            if let Err(err) = self.ssn_table.put(self.session_ttl, &self.key, ssn) {
                warn!(error = %err, "cannot track new session");
                return None;
            }
            trace!(ssn_id = self.ssn_count, "new session");
            prop.push_event(ids.ev_new);
        }
        let ssn = self.ssn_table.get_mut(&self.key)?;

        let ssn_id = ssn.id;
        prop.retain_value(ids.p_id)
            .cpy(&ssn_id.to_le_bytes(), Endian::Little);
        ssn.decode(prop, &ids, flags, seq, ack, win, seg);

        None
    }
}
