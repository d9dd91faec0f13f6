//! Event fan-out to connected subscribers.

use std::any::Any;
use std::borrow::Cow;
use std::cell::OnceCell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use beacon_core::{ConnectionId, SystemEvent};
use metrics::counter;
use serde::Serialize;
use tracing::{debug, error, warn};

use super::connection::SendError;
use super::registry::{ConnectionRegistry, RegisteredConnection};
use crate::metrics::{
    BROADCAST_DELIVERIES_TOTAL, BROADCAST_EVENTS_TOTAL, BROADCAST_FAILURES_TOTAL,
    BROADCAST_FILTERED_TOTAL, WS_BROADCAST_DROPS_TOTAL,
};
use crate::processing::ProcessorRegistry;
use crate::visibility::VisibilityFilter;

/// What one broadcast pass did. Informational only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Frames queued on a connection.
    pub delivered: usize,
    /// Subscribers the visibility filter skipped.
    pub filtered: usize,
    /// Closed connections removed from the registry after the pass.
    pub evicted: usize,
    /// Subscribers that got nothing because processing, serialization or a
    /// full send buffer got in the way.
    pub failed: usize,
}

/// Fans events out to every open, authorized subscriber.
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    filter: VisibilityFilter,
    processors: ProcessorRegistry,
}

impl Broadcaster {
    /// Create a broadcaster over `registry`.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        filter: VisibilityFilter,
        processors: ProcessorRegistry,
    ) -> Self {
        Self {
            registry,
            filter,
            processors,
        }
    }

    /// Registry this broadcaster reads.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Deliver `event` to every open connection whose principal may see it.
    ///
    /// Never fails and never blocks on a socket: frames are queued on each
    /// connection's writer. Connections found closed are unregistered once
    /// the pass is over. A panic inside one subscriber's verifier or
    /// processor skips that subscriber only.
    pub fn broadcast(&self, event: &SystemEvent) -> BroadcastReport {
        counter!(BROADCAST_EVENTS_TOTAL, "event_type" => event.event_type.as_str()).increment(1);

        if event.payload.is_none() {
            debug!(event_id = %event.id, event_type = %event.event_type, "event has no payload, skipping");
            return BroadcastReport::default();
        }

        match catch_unwind(AssertUnwindSafe(|| self.dispatch(event))) {
            Ok(report) => {
                debug!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    delivered = report.delivered,
                    filtered = report.filtered,
                    evicted = report.evicted,
                    failed = report.failed,
                    "broadcast complete"
                );
                report
            }
            Err(panic) => {
                error!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    panic = %panic_message(panic.as_ref()),
                    "broadcast pass panicked"
                );
                counter!(BROADCAST_FAILURES_TOTAL).increment(1);
                BroadcastReport::default()
            }
        }
    }

    fn dispatch(&self, event: &SystemEvent) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut closed: Vec<ConnectionId> = Vec::new();
        // Serialized once and shared by every subscriber that gets the event unchanged
        let unchanged: OnceCell<Option<Arc<String>>> = OnceCell::new();

        for entry in self.registry.snapshot() {
            let step = AssertUnwindSafe(|| self.deliver(event, &entry, &unchanged));
            let delivery = catch_unwind(step).unwrap_or_else(|panic| {
                error!(
                    conn_id = %entry.id(),
                    event_type = %event.event_type,
                    panic = %panic_message(panic.as_ref()),
                    "subscriber handling panicked, skipping subscriber"
                );
                Delivery::Failed
            });
            match delivery {
                Delivery::Delivered => report.delivered += 1,
                Delivery::Filtered => report.filtered += 1,
                Delivery::Failed => report.failed += 1,
                Delivery::Closed => closed.push(entry.id().clone()),
            }
        }

        report.evicted = self.registry.remove_all(&closed);
        record(&report);
        report
    }

    fn deliver(
        &self,
        event: &SystemEvent,
        entry: &RegisteredConnection,
        unchanged: &OnceCell<Option<Arc<String>>>,
    ) -> Delivery {
        let connection = &entry.connection;
        if !connection.is_open() {
            return Delivery::Closed;
        }

        if !self.filter.is_visible(event, Some(&entry.principal)) {
            return Delivery::Filtered;
        }

        let message = match self.processors.process(event, Some(&entry.principal)) {
            Ok(Cow::Borrowed(original)) => unchanged.get_or_init(|| encode(original)).clone(),
            Ok(Cow::Owned(processed)) => encode(&processed),
            Err(error) => {
                warn!(conn_id = %connection.id(), %error, "event processing failed, skipping subscriber");
                None
            }
        };
        let Some(message) = message else {
            return Delivery::Failed;
        };

        match connection.send(message) {
            Ok(()) => Delivery::Delivered,
            Err(SendError::Closed) => Delivery::Closed,
            Err(SendError::Full) => {
                counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
                debug!(conn_id = %connection.id(), "send buffer full, frame dropped");
                Delivery::Failed
            }
            Err(SendError::Unserializable) => Delivery::Failed,
        }
    }
}

/// What happened to one subscriber during a pass.
enum Delivery {
    Delivered,
    Filtered,
    Failed,
    Closed,
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into())
}

fn encode(event: &SystemEvent) -> Option<Arc<String>> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Arc::new(json)),
        Err(error) => {
            warn!(event_id = %event.id, %error, "failed to serialize event");
            None
        }
    }
}

fn record(report: &BroadcastReport) {
    counter!(BROADCAST_DELIVERIES_TOTAL).increment(report.delivered as u64);
    counter!(BROADCAST_FILTERED_TOTAL).increment(report.filtered as u64);
    counter!(BROADCAST_FAILURES_TOTAL).increment(report.failed as u64);
}
