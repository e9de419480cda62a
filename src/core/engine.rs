//! The decode engine: worker loop, handler registry, lifecycle.
//!
//! One capture producer and one decode worker meet in the packet
//! [`Channel`]. The worker pulls packets in FIFO order, walks the module
//! chain over each one, then fires the packet's events to registered
//! handlers — events in push order, handlers in registration order.
//! Handlers run synchronously on the worker thread.
//!
//! `on`/`clear` may be called from any thread, including from inside a
//! handler: dispatch snapshots the per-event handler list under a briefly
//! held lock and re-checks each entry's cancelled flag just before invoking
//! it, so a handler cleared mid-dispatch is skipped from that point on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use thiserror::Error;
use tracing::{debug, info};

use crate::config::StrixConfig;
use crate::core::channel::Channel;
use crate::core::packet::Packet;
use crate::core::payload::Payload;
use crate::core::property::{EventId, Property};
use crate::modules::{default_stack, Module, ModuleRegistry};
use crate::utils::metrics::EngineMetrics;

/// Identifier returned by [`EngineHandle::on`], used to cancel the handler.
pub type HandlerId = u64;

/// Event callback, invoked with the per-packet property on the worker thread.
pub type Callback = Box<dyn Fn(&Property) + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine worker already started")]
    AlreadyStarted,
}

struct HandlerEntry {
    id: HandlerId,
    event: EventId,
    cancelled: AtomicBool,
    callback: Callback,
}

#[derive(Default)]
struct HandlerTable {
    next_id: HandlerId,
    /// Per-event handler slots in registration order; cleared entries leave
    /// a tombstone so positions stay stable for in-flight dispatch.
    by_event: Vec<Vec<Option<Arc<HandlerEntry>>>>,
    by_id: HashMap<HandlerId, Arc<HandlerEntry>>,
}

/// Cloneable handle for registering and cancelling event handlers while the
/// engine runs.
#[derive(Clone)]
pub struct EngineHandle {
    registry: Arc<ModuleRegistry>,
    handlers: Arc<Mutex<HandlerTable>>,
}

impl EngineHandle {
    /// Register `callback` for the named event (e.g. `"tcp.established"`).
    /// Returns `None` when the event name is unknown.
    pub fn on<F>(&self, event_name: &str, callback: F) -> Option<HandlerId>
    where
        F: Fn(&Property) + Send + Sync + 'static,
    {
        let event = self.registry.lookup_event(event_name)?;
        let mut table = self.handlers.lock().unwrap();
        table.next_id += 1;
        let id = table.next_id;
        let entry = Arc::new(HandlerEntry {
            id,
            event,
            cancelled: AtomicBool::new(false),
            callback: Box::new(callback),
        });
        table.by_id.insert(id, Arc::clone(&entry));
        table.by_event[event].push(Some(entry));
        debug!(event = event_name, handler_id = id, "handler registered");
        Some(id)
    }

    /// Cancel a handler. Returns `false` for an unknown id. The handler is
    /// never invoked after this returns; a dispatch already in flight skips
    /// it if its turn has not yet come.
    pub fn clear(&self, id: HandlerId) -> bool {
        let mut table = self.handlers.lock().unwrap();
        let Some(entry) = table.by_id.remove(&id) else {
            return false;
        };
        entry.cancelled.store(true, Ordering::Release);
        let event = entry.event;
        if let Some(slots) = table.by_event.get_mut(event) {
            for slot in slots.iter_mut() {
                if slot.as_ref().is_some_and(|e| e.id == id) {
                    *slot = None;
                    break;
                }
            }
        }
        debug!(handler_id = id, "handler cleared");
        true
    }
}

/// The packet decode engine.
///
/// Owns the packet channel, the module registry, and the single decode
/// worker. Producers obtain the channel with [`Engine::channel`] and feed it
/// until they [`Channel::close`] it (or [`Engine::shutdown`] does); the
/// worker drains the queue and exits.
pub struct Engine {
    registry: Arc<ModuleRegistry>,
    channel: Arc<Channel<Packet>>,
    handlers: Arc<Mutex<HandlerTable>>,
    metrics: Arc<EngineMetrics>,
    modules: Option<Vec<Box<dyn Module>>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl Engine {
    pub fn new(config: &StrixConfig) -> Self {
        let (registry, modules) =
            default_stack(config.engine.session_ttl, config.engine.max_sessions);
        let handlers = HandlerTable {
            next_id: 0,
            by_event: vec![Vec::new(); registry.event_count()],
            by_id: HashMap::new(),
        };
        Self {
            registry: Arc::new(registry),
            channel: Arc::new(Channel::with_capacity(config.engine.channel_capacity)),
            handlers: Arc::new(Mutex::new(handlers)),
            metrics: Arc::new(EngineMetrics::new()),
            modules: Some(modules),
            worker: None,
        }
    }

    /// The packet channel producers feed.
    pub fn channel(&self) -> Arc<Channel<Packet>> {
        Arc::clone(&self.channel)
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// A cloneable handle valid for the engine's whole lifetime.
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            registry: Arc::clone(&self.registry),
            handlers: Arc::clone(&self.handlers),
        }
    }

    /// See [`EngineHandle::on`].
    pub fn on<F>(&self, event_name: &str, callback: F) -> Option<HandlerId>
    where
        F: Fn(&Property) + Send + Sync + 'static,
    {
        self.handle().on(event_name, callback)
    }

    /// See [`EngineHandle::clear`].
    pub fn clear(&self, id: HandlerId) -> bool {
        self.handle().clear(id)
    }

    /// Spawn the decode worker.
    pub fn start(&mut self) -> Result<(), EngineError> {
        let modules = self.modules.take().ok_or(EngineError::AlreadyStarted)?;
        let channel = Arc::clone(&self.channel);
        let registry = Arc::clone(&self.registry);
        let handlers = Arc::clone(&self.handlers);
        let metrics = Arc::clone(&self.metrics);
        self.worker = Some(
            thread::Builder::new()
                .name("strix-decode".into())
                .spawn(move || run_worker(channel, registry, handlers, metrics, modules))
                .expect("failed to spawn decode worker"),
        );
        info!("decode worker started");
        Ok(())
    }

    /// Close the channel and wait for the worker to drain and exit.
    pub fn shutdown(&mut self) {
        self.channel.close();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
            info!(
                packets = self.metrics.packets(),
                bytes = self.metrics.bytes(),
                "decode worker stopped"
            );
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(
    channel: Arc<Channel<Packet>>,
    registry: Arc<ModuleRegistry>,
    handlers: Arc<Mutex<HandlerTable>>,
    metrics: Arc<EngineMetrics>,
    mut modules: Vec<Box<dyn Module>>,
) {
    let mut prop = Property::new(registry.param_count());
    let mut pd = Payload::default();
    let root = registry.root();

    while let Some(mut pkt) = channel.pull() {
        metrics.record_packet(pkt.cap_len());

        prop.init(&mut pkt);
        pd.reset(prop.cap_len());

        let mut mod_id = root;
        while let Some(id) = mod_id {
            mod_id = match modules.get_mut(id) {
                Some(module) => module.decode(&mut pd, &mut prop),
                None => None,
            };
        }

        dispatch(&handlers, &prop, &metrics);

        prop.finish(&mut pkt);
        channel.release(pkt);
    }
}

fn dispatch(handlers: &Mutex<HandlerTable>, prop: &Property, metrics: &EngineMetrics) {
    for &event in prop.events() {
        let snapshot: Vec<Arc<HandlerEntry>> = {
            let table = handlers.lock().unwrap();
            match table.by_event.get(event) {
                Some(slots) => slots.iter().flatten().cloned().collect(),
                None => continue,
            }
        };
        for entry in snapshot {
            if !entry.cancelled.load(Ordering::Acquire) {
                (entry.callback)(prop);
                metrics.record_event();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::tcp::{ACK, SYN};
    use crate::testutil::tcp_frame;
    use std::sync::atomic::AtomicUsize;

    const A: [u8; 4] = [192, 168, 0, 1];
    const B: [u8; 4] = [192, 168, 0, 2];

    fn push(channel: &Channel<Packet>, frame: &[u8], ts_sec: i64, ts_usec: u32) {
        let mut slot = channel.retain();
        slot.load(frame, frame.len(), ts_sec, ts_usec);
        channel.push(slot);
    }

    fn push_handshake(channel: &Channel<Packet>, src: [u8; 4], sport: u16, ts_sec: i64) {
        push(channel, &tcp_frame(src, B, sport, 80, SYN, 1000, 0, b""), ts_sec, 0);
        push(
            channel,
            &tcp_frame(B, src, 80, sport, SYN | ACK, 2000, 1001, b""),
            ts_sec,
            5,
        );
        push(
            channel,
            &tcp_frame(src, B, sport, 80, ACK, 1001, 2001, b""),
            ts_sec,
            10,
        );
    }

    #[test]
    fn unknown_event_name_is_rejected() {
        let engine = Engine::new(&StrixConfig::default());
        assert!(engine.on("tcp.no_such_event", |_| {}).is_none());
        assert!(engine.on("tcp.established", |_| {}).is_some());
    }

    #[test]
    fn clear_unknown_id_returns_false() {
        let engine = Engine::new(&StrixConfig::default());
        assert!(!engine.clear(42));
        let id = engine.on("tcp.closed", |_| {}).unwrap();
        assert!(engine.clear(id));
        assert!(!engine.clear(id));
    }

    #[test]
    fn events_reach_handlers_with_attributes() {
        let mut engine = Engine::new(&StrixConfig::default());
        let rtt_param = engine.registry().lookup_param("tcp.rtt_3wh").unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            engine.on("tcp.established", move |prop| {
                seen.lock().unwrap().push(prop.value_u32(rtt_param));
            });
        }

        engine.start().unwrap();
        let channel = engine.channel();
        push_handshake(&channel, A, 12345, 100);
        engine.shutdown();

        assert_eq!(seen.lock().unwrap().as_slice(), &[Some(10)]);
        assert_eq!(engine.metrics().packets(), 3);
    }

    #[test]
    fn handlers_fire_in_registration_order() {
        let mut engine = Engine::new(&StrixConfig::default());
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in [1, 2, 3] {
            let order = Arc::clone(&order);
            engine.on("tcp.established", move |_| {
                order.lock().unwrap().push(tag);
            });
        }

        engine.start().unwrap();
        let channel = engine.channel();
        push_handshake(&channel, A, 12345, 100);
        push_handshake(&channel, A, 23456, 100);
        engine.shutdown();

        assert_eq!(order.lock().unwrap().as_slice(), &[1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn cleared_handler_is_never_invoked_again() {
        let mut engine = Engine::new(&StrixConfig::default());
        let count = Arc::new(AtomicUsize::new(0));
        let id = {
            let count = Arc::clone(&count);
            engine
                .on("tcp.new_session", move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap()
        };

        engine.start().unwrap();
        let channel = engine.channel();
        push_handshake(&channel, A, 12345, 100);

        // Let the first burst drain, then cancel.
        while engine.metrics().packets() < 3 {
            thread::yield_now();
        }
        assert!(engine.clear(id));
        push_handshake(&channel, A, 23456, 100);
        engine.shutdown();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_cleared_mid_dispatch_is_skipped() {
        let mut engine = Engine::new(&StrixConfig::default());
        let handle = engine.handle();
        let second_id = Arc::new(Mutex::new(None::<HandlerId>));
        let second_calls = Arc::new(AtomicUsize::new(0));

        {
            let handle = handle.clone();
            let second_id = Arc::clone(&second_id);
            engine.on("tcp.established", move |_| {
                if let Some(id) = *second_id.lock().unwrap() {
                    handle.clear(id);
                }
            });
        }
        {
            let second_calls = Arc::clone(&second_calls);
            let id = engine
                .on("tcp.established", move |_| {
                    second_calls.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            *second_id.lock().unwrap() = Some(id);
        }

        engine.start().unwrap();
        let channel = engine.channel();
        push_handshake(&channel, A, 12345, 100);
        push_handshake(&channel, A, 23456, 100);
        engine.shutdown();

        // Tombstone semantics: handler 1 cancels handler 2 before its turn
        // in the same dispatch, so handler 2 never runs.
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn packets_are_processed_in_push_order() {
        let mut engine = Engine::new(&StrixConfig::default());
        let ids = Arc::new(Mutex::new(Vec::new()));
        let id_param = engine.registry().lookup_param("tcp.id").unwrap();
        {
            let ids = Arc::clone(&ids);
            engine.on("tcp.new_session", move |prop| {
                ids.lock().unwrap().push(prop.value_u64(id_param).unwrap());
            });
        }

        engine.start().unwrap();
        let channel = engine.channel();
        for i in 0..200u16 {
            push(
                &channel,
                &tcp_frame(A, B, 1000 + i, 80, SYN, 1, 0, b""),
                100,
                u32::from(i),
            );
        }
        engine.shutdown();

        let ids = ids.lock().unwrap();
        assert_eq!(ids.len(), 200);
        assert!(ids.windows(2).all(|w| w[1] == w[0] + 1));
    }
}
