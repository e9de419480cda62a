//! Ethernet II link-layer module.

use crate::core::payload::Payload;
use crate::core::property::{ParamId, Property};
use crate::modules::{ModId, Module, ModuleRegistry};

const HEADER_LEN: usize = 14;
const ETHERTYPE_IPV4: u16 = 0x0800;

pub struct Ethernet {
    p_dst: ParamId,
    p_src: ParamId,
    p_type: ParamId,
    mod_ipv4: Option<ModId>,
}

impl Ethernet {
    pub fn new(builder: &mut crate::modules::RegistryBuilder) -> Self {
        Self {
            p_dst: builder.define_param("dst"),
            p_src: builder.define_param("src"),
            p_type: builder.define_param("type"),
            mod_ipv4: None,
        }
    }
}

impl Module for Ethernet {
    fn setup(&mut self, registry: &ModuleRegistry) {
        self.mod_ipv4 = registry.lookup_module("ipv4");
    }

    fn decode(&mut self, pd: &mut Payload, prop: &mut Property) -> Option<ModId> {
        let hdr = pd.retain(HEADER_LEN)?;
        let ethertype = {
            let bytes = prop.slice(hdr);
            u16::from_be_bytes([bytes[12], bytes[13]])
        };

        prop.retain_value(self.p_dst).set(hdr.field(0, 6));
        prop.retain_value(self.p_src).set(hdr.field(6, 6));
        prop.retain_value(self.p_type).set(hdr.field(12, 2));

        match ethertype {
            ETHERTYPE_IPV4 => self.mod_ipv4,
            _ => None,
        }
    }
}
