//! Per-subscriber event processing.
//!
//! Processors are keyed by [`SystemEventType`]. An event type with no
//! processor is delivered unchanged, and [`ProcessorRegistry::process`]
//! borrows the input in that case so the broadcaster can serialize it once
//! for every subscriber.

pub mod notification;

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use beacon_core::{Principal, ProcessError, SystemEvent, SystemEventType};

pub use notification::NotificationProcessor;

/// Produces the event one subscriber receives.
pub trait EventProcessor: Send + Sync {
    /// Transform `event` for `principal` (which may be unknown).
    fn process(
        &self,
        event: &SystemEvent,
        principal: Option<&Principal>,
    ) -> Result<SystemEvent, ProcessError>;
}

/// Processors keyed by event type.
#[derive(Default, Clone)]
pub struct ProcessorRegistry {
    processors: HashMap<SystemEventType, Arc<dyn EventProcessor>>,
}

impl ProcessorRegistry {
    /// Create an empty registry: every event passes through unchanged.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with [`NotificationProcessor`] for `NOTIFICATION` events.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let _ = registry.register(SystemEventType::Notification, Arc::new(NotificationProcessor));
        registry
    }

    /// Register `processor` for `event_type`, returning the one it replaces.
    pub fn register(
        &mut self,
        event_type: SystemEventType,
        processor: Arc<dyn EventProcessor>,
    ) -> Option<Arc<dyn EventProcessor>> {
        self.processors.insert(event_type, processor)
    }

    /// Processor for `event_type`, if any.
    pub fn resolve(&self, event_type: SystemEventType) -> Option<&Arc<dyn EventProcessor>> {
        self.processors.get(&event_type)
    }

    /// Number of registered processors.
    pub fn len(&self) -> usize {
        self.processors.len()
    }

    /// Whether no processor is registered.
    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// The event `principal` should receive. Borrowed when no processor is
    /// registered for the type.
    pub fn process<'a>(
        &self,
        event: &'a SystemEvent,
        principal: Option<&Principal>,
    ) -> Result<Cow<'a, SystemEvent>, ProcessError> {
        match self.resolve(event.event_type) {
            Some(processor) => processor.process(event, principal).map(Cow::Owned),
            None => Ok(Cow::Borrowed(event)),
        }
    }
}
