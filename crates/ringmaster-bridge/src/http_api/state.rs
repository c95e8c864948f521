use std::sync::Arc;

use ringmaster_core::event::EventBus;
use ringmaster_core::output_buffer::OutputBuffer;
use ringmaster_core::store::InMemoryStore;

/// Shared application state for every HTTP/WS handler. Thin by design: the
/// engine owns all business state behind `Store`/`EventBus`/`OutputBuffer`,
/// this struct just bundles handles to it.
#[derive(Clone)]
pub struct ApiState {
    pub store: InMemoryStore,
    pub event_bus: EventBus,
    pub output_buffer: Arc<OutputBuffer>,
}

impl ApiState {
    pub fn new(store: InMemoryStore, event_bus: EventBus, output_buffer: Arc<OutputBuffer>) -> Self {
        Self {
            store,
            event_bus,
            output_buffer,
        }
    }
}
