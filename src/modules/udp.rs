//! UDP module.

use crate::core::payload::Payload;
use crate::core::property::{ParamId, Property};
use crate::modules::{ModId, Module};

const HEADER_LEN: usize = 8;

pub struct Udp {
    p_src_port: ParamId,
    p_dst_port: ParamId,
    p_len: ParamId,
    p_chksum: ParamId,
    p_data: ParamId,
}

impl Udp {
    pub fn new(builder: &mut crate::modules::RegistryBuilder) -> Self {
        Self {
            p_src_port: builder.define_param("src_port"),
            p_dst_port: builder.define_param("dst_port"),
            p_len: builder.define_param("len"),
            p_chksum: builder.define_param("chksum"),
            p_data: builder.define_param("data"),
        }
    }
}

impl Module for Udp {
    fn decode(&mut self, pd: &mut Payload, prop: &mut Property) -> Option<ModId> {
        let hdr = pd.retain(HEADER_LEN)?;
        let (src_port, dst_port) = {
            let bytes = prop.slice(hdr);
            (
                u16::from_be_bytes([bytes[0], bytes[1]]),
                u16::from_be_bytes([bytes[2], bytes[3]]),
            )
        };

        prop.set_src_port(src_port);
        prop.set_dst_port(dst_port);
        prop.retain_value(self.p_src_port).set(hdr.field(0, 2));
        prop.retain_value(self.p_dst_port).set(hdr.field(2, 2));
        prop.retain_value(self.p_len).set(hdr.field(4, 2));
        prop.retain_value(self.p_chksum).set(hdr.field(6, 2));

        let data_len = pd.length();
        if data_len > 0 {
            if let Some(data) = pd.retain(data_len) {
                prop.retain_value(self.p_data).set(data);
            }
        }

        None
    }
}
