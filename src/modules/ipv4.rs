//! IPv4 module.
//!
//! Publishes header attributes, records the endpoint address spans used by
//! the transport modules for flow keying, and clamps the payload to the
//! datagram's total length so trailing link-layer padding never reaches the
//! transport layer.

use crate::core::payload::Payload;
use crate::core::property::{ParamId, Property};
use crate::modules::{ModId, Module, ModuleRegistry};

const HEADER_LEN: usize = 20;
const PROTO_TCP: u8 = 6;
const PROTO_UDP: u8 = 17;

pub struct Ipv4 {
    p_tos: ParamId,
    p_total_len: ParamId,
    p_id: ParamId,
    p_ttl: ParamId,
    p_proto: ParamId,
    p_chksum: ParamId,
    p_src: ParamId,
    p_dst: ParamId,
    p_optdata: ParamId,
    mod_udp: Option<ModId>,
    mod_tcp: Option<ModId>,
}

impl Ipv4 {
    pub fn new(builder: &mut crate::modules::RegistryBuilder) -> Self {
        Self {
            p_tos: builder.define_param("tos"),
            p_total_len: builder.define_param("total_len"),
            p_id: builder.define_param("id"),
            p_ttl: builder.define_param("ttl"),
            p_proto: builder.define_param("proto"),
            p_chksum: builder.define_param("chksum"),
            p_src: builder.define_param("src"),
            p_dst: builder.define_param("dst"),
            p_optdata: builder.define_param("optdata"),
            mod_udp: None,
            mod_tcp: None,
        }
    }
}

impl Module for Ipv4 {
    fn setup(&mut self, registry: &ModuleRegistry) {
        self.mod_udp = registry.lookup_module("udp");
        self.mod_tcp = registry.lookup_module("tcp");
    }

    fn decode(&mut self, pd: &mut Payload, prop: &mut Property) -> Option<ModId> {
        let hdr = pd.retain(HEADER_LEN)?;
        let (hdr_len, total_len, proto) = {
            let bytes = prop.slice(hdr);
            let hdr_len = ((bytes[0] & 0x0f) as usize) * 4;
            let total_len = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
            (hdr_len, total_len, bytes[9])
        };
        if hdr_len < HEADER_LEN {
            return None;
        }

        prop.retain_value(self.p_tos).set(hdr.field(1, 1));
        prop.retain_value(self.p_total_len).set(hdr.field(2, 2));
        prop.retain_value(self.p_id).set(hdr.field(4, 2));
        prop.retain_value(self.p_ttl).set(hdr.field(8, 1));
        prop.retain_value(self.p_proto).set(hdr.field(9, 1));
        prop.retain_value(self.p_chksum).set(hdr.field(10, 2));
        prop.retain_value(self.p_src).set(hdr.field(12, 4));
        prop.retain_value(self.p_dst).set(hdr.field(16, 4));
        prop.set_addrs(hdr.field(12, 4), hdr.field(16, 4));

        if hdr_len > HEADER_LEN {
            let opts = pd.retain(hdr_len - HEADER_LEN)?;
            prop.retain_value(self.p_optdata).set(opts);
        }

        pd.limit(total_len.saturating_sub(hdr_len));

        match proto {
            PROTO_TCP => self.mod_tcp,
            PROTO_UDP => self.mod_udp,
            _ => None,
        }
    }
}
