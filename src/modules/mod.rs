//! Protocol decoder modules.
//!
//! Each module consumes bytes from the packet [`Payload`], writes named
//! attributes and events into the [`Property`], and returns the id of the
//! next module in the chain (`None` ends the chain). Parameter and event
//! names are interned once at registry build time and namespaced as
//! `<module>.<name>` (`tcp.new_session`, `ipv4.src`, ...), so handler
//! registration and value lookup are O(1) id indexing at decode time.

pub mod ethernet;
pub mod ipv4;
pub mod tcp;
pub mod udp;

use std::collections::HashMap;

use crate::core::payload::Payload;
use crate::core::property::{EventId, ParamId, Property};

/// Identifier of a registered module; doubles as its index in the chain.
pub type ModId = usize;

/// A protocol decoder in the module chain.
pub trait Module: Send {
    /// Resolve references to other modules once the registry is complete.
    fn setup(&mut self, _registry: &ModuleRegistry) {}

    /// Decode one layer, returning the next module id or `None` to stop.
    fn decode(&mut self, pd: &mut Payload, prop: &mut Property) -> Option<ModId>;
}

/// Collects module, parameter and event definitions while the decoder stack
/// is being constructed.
///
/// Call [`RegistryBuilder::begin_module`] before constructing each module;
/// the module's `new` then claims its params and events under that
/// namespace. Module ids are assigned in `begin_module` order and must match
/// the order of the module vector handed to the engine.
#[derive(Default)]
pub struct RegistryBuilder {
    params: Vec<String>,
    param_ids: HashMap<String, ParamId>,
    events: Vec<String>,
    event_ids: HashMap<String, EventId>,
    modules: Vec<String>,
    module_ids: HashMap<String, ModId>,
    current: String,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a module namespace and assign its id.
    pub fn begin_module(&mut self, name: &str) -> ModId {
        let id = self.modules.len();
        self.modules.push(name.to_string());
        self.module_ids.insert(name.to_string(), id);
        self.current = name.to_string();
        id
    }

    /// Intern a parameter under the current module namespace.
    pub fn define_param(&mut self, name: &str) -> ParamId {
        let full = format!("{}.{}", self.current, name);
        if let Some(&id) = self.param_ids.get(&full) {
            return id;
        }
        let id = self.params.len();
        self.param_ids.insert(full.clone(), id);
        self.params.push(full);
        id
    }

    /// Intern an event under the current module namespace.
    pub fn define_event(&mut self, name: &str) -> EventId {
        let full = format!("{}.{}", self.current, name);
        if let Some(&id) = self.event_ids.get(&full) {
            return id;
        }
        let id = self.events.len();
        self.event_ids.insert(full.clone(), id);
        self.events.push(full);
        id
    }

    pub fn finish(self) -> ModuleRegistry {
        ModuleRegistry {
            params: self.params,
            param_ids: self.param_ids,
            events: self.events,
            event_ids: self.event_ids,
            modules: self.modules,
            module_ids: self.module_ids,
        }
    }
}

/// Immutable name→id tables shared by the engine and the decode worker.
pub struct ModuleRegistry {
    params: Vec<String>,
    param_ids: HashMap<String, ParamId>,
    events: Vec<String>,
    event_ids: HashMap<String, EventId>,
    modules: Vec<String>,
    module_ids: HashMap<String, ModId>,
}

impl ModuleRegistry {
    pub fn lookup_module(&self, name: &str) -> Option<ModId> {
        self.module_ids.get(name).copied()
    }

    pub fn lookup_param(&self, full_name: &str) -> Option<ParamId> {
        self.param_ids.get(full_name).copied()
    }

    pub fn lookup_event(&self, full_name: &str) -> Option<EventId> {
        self.event_ids.get(full_name).copied()
    }

    /// The root of the decode chain: the first registered module.
    pub fn root(&self) -> Option<ModId> {
        if self.modules.is_empty() {
            None
        } else {
            Some(0)
        }
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn param_name(&self, id: ParamId) -> Option<&str> {
        self.params.get(id).map(String::as_str)
    }

    pub fn event_name(&self, id: EventId) -> Option<&str> {
        self.events.get(id).map(String::as_str)
    }

    pub fn module_name(&self, id: ModId) -> Option<&str> {
        self.modules.get(id).map(String::as_str)
    }
}

/// Build the default decoder stack: ethernet → ipv4 → {udp, tcp}.
pub fn default_stack(
    session_ttl: u64,
    max_sessions: usize,
) -> (ModuleRegistry, Vec<Box<dyn Module>>) {
    let mut builder = RegistryBuilder::new();

    builder.begin_module("ethernet");
    let ethernet = ethernet::Ethernet::new(&mut builder);
    builder.begin_module("ipv4");
    let ipv4 = ipv4::Ipv4::new(&mut builder);
    builder.begin_module("udp");
    let udp = udp::Udp::new(&mut builder);
    builder.begin_module("tcp");
    let tcp = tcp::Tcp::new(&mut builder, session_ttl, max_sessions);

    let registry = builder.finish();
    let mut modules: Vec<Box<dyn Module>> = vec![
        Box::new(ethernet),
        Box::new(ipv4),
        Box::new(udp),
        Box::new(tcp),
    ];
    for module in modules.iter_mut() {
        module.setup(&registry);
    }
    (registry, modules)
}
