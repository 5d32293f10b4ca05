//! Process-wide dispatch table: (service-id, message-id) -> Output factory
//!
//! The only interpretive piece of the runtime. Generated code populates it
//! once at startup (see each generated module's `register` function); the
//! reader loop consults it to build a concrete, type-erased `Output` to
//! decode an inbound frame into before handing it to the waiting caller
//! (§9 design note: "the runtime carries only a factory table").

use std::collections::HashMap;

use crate::message::Message;

type Factory = fn() -> Box<dyn Message>;

#[derive(Default)]
pub struct Registry {
    factories: HashMap<(u8, u16), Factory>,
}

impl Registry {
    /// A fresh registry, pre-seeded with the built-in CTL.AllocateCID
    /// response factory every Transport relies on for client-id allocation.
    pub fn new() -> Self {
        let mut registry = Self::default();
        crate::client::register_builtin(&mut registry);
        registry
    }

    pub fn register(&mut self, service_id: u8, message_id: u16, factory: Factory) {
        self.factories.insert((service_id, message_id), factory);
    }

    pub fn lookup(&self, service_id: u8, message_id: u16) -> Option<Factory> {
        self.factories.get(&(service_id, message_id)).copied()
    }

    pub fn knows_service(&self, service_id: u8) -> bool {
        self.factories.keys().any(|(s, _)| *s == service_id)
    }

    pub fn contains(&self, service_id: u8, message_id: u16) -> bool {
        self.factories.contains_key(&(service_id, message_id))
    }
}
