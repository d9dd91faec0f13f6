//! In-memory connection double shared by the websocket unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use beacon_core::ConnectionId;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::connection::{ConnectionHandle, SendError};

pub(crate) struct MockConnection {
    id: ConnectionId,
    open: AtomicBool,
    failure: Mutex<Option<SendError>>,
    probe_failure: Mutex<Option<SendError>>,
    sent: Mutex<Vec<Arc<String>>>,
    probes: Mutex<Vec<(Instant, Bytes)>>,
    closed_with: Mutex<Option<(u16, String)>>,
}

impl MockConnection {
    pub(crate) fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::from(id),
            open: AtomicBool::new(true),
            failure: Mutex::new(None),
            probe_failure: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            probes: Mutex::new(Vec::new()),
            closed_with: Mutex::new(None),
        })
    }

    pub(crate) fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub(crate) fn fail_sends(&self, error: SendError) {
        *self.failure.lock() = Some(error);
    }

    pub(crate) fn fail_probes(&self, error: SendError) {
        *self.probe_failure.lock() = Some(error);
    }

    pub(crate) fn sent(&self) -> Vec<Arc<String>> {
        self.sent.lock().clone()
    }

    pub(crate) fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }

    pub(crate) fn probe_times(&self) -> Vec<Instant> {
        self.probes.lock().iter().map(|(at, _)| *at).collect()
    }

    pub(crate) fn probe_payloads(&self) -> Vec<Bytes> {
        self.probes.lock().iter().map(|(_, p)| p.clone()).collect()
    }

    pub(crate) fn closed_with(&self) -> Option<(u16, String)> {
        self.closed_with.lock().clone()
    }
}

impl ConnectionHandle for MockConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send(&self, message: Arc<String>) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::Closed);
        }
        if let Some(error) = *self.failure.lock() {
            return Err(error);
        }
        self.sent.lock().push(message);
        Ok(())
    }

    fn send_probe(&self, payload: Bytes) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::Closed);
        }
        if let Some(error) = *self.probe_failure.lock() {
            return Err(error);
        }
        self.probes.lock().push((Instant::now(), payload));
        Ok(())
    }

    fn close(&self, code: u16, reason: &str) {
        self.open.store(false, Ordering::SeqCst);
        let mut closed = self.closed_with.lock();
        if closed.is_none() {
            *closed = Some((code, reason.to_string()));
        }
    }
}
