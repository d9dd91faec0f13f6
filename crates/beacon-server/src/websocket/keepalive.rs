//! Ping/pong liveness monitoring.
//!
//! Every connection gets its own task: wait `interval`, send a ping carrying
//! [`PROBE_TOKEN`], wait for the client to echo it, repeat. Waiting is a
//! timer raced against the monitor's cancellation token, so one connection's
//! schedule never delays another's. Probe sends share a semaphore that bounds
//! how many are in flight at once.
//!
//! Without an `ack_timeout` a connection that never answers just stays in
//! [`ProbeState::ProbeSent`]; it is pruned by the next broadcast that finds
//! it closed. With one, the connection is closed and unregistered when the
//! timer fires.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::{CLOSE_GOING_AWAY, ConnectionHandle};
use super::registry::ConnectionRegistry;
use crate::metrics::{WS_KEEPALIVE_PROBES_TOTAL, WS_KEEPALIVE_TERMINATIONS_TOTAL};

/// Ping payload. Only a pong carrying exactly these bytes counts as an ack.
pub const PROBE_TOKEN: &[u8] = b"PING";

/// Keepalive monitor configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeepaliveConfig {
    /// Whether connections are probed at all.
    pub enabled: bool,
    /// Delay before each probe.
    pub interval: Duration,
    /// Close connections that leave a probe unanswered this long.
    pub ack_timeout: Option<Duration>,
    /// Bound on simultaneous probe sends.
    pub max_concurrent_probes: usize,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(60),
            ack_timeout: None,
            max_concurrent_probes: 64,
        }
    }
}

/// Per-connection probe state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeState {
    /// Not probing (before the first schedule, or after the loop stopped).
    Idle,
    /// Waiting for the interval to elapse.
    ProbeScheduled,
    /// Ping sent, waiting for the echo.
    ProbeSent,
    /// Echo received; about to re-arm.
    Acked,
    /// Dead-man timer fired.
    TimedOut,
    /// Connection found closed, or closed after a timeout.
    Closed,
}

/// Why a keepalive loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeepaliveOutcome {
    /// Monitor shutdown or the session stopped the loop.
    Cancelled,
    /// The connection was closed when its probe came due; it was unregistered.
    Closed,
    /// No ack within `ack_timeout`; the connection was closed and unregistered.
    TimedOut,
    /// Sending the probe failed; the connection stays registered.
    Abandoned,
}

impl KeepaliveOutcome {
    /// Metric label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::Closed => "closed",
            Self::TimedOut => "timed_out",
            Self::Abandoned => "abandoned",
        }
    }
}

/// Spawns and tracks keepalive loops.
pub struct KeepaliveMonitor {
    config: KeepaliveConfig,
    registry: Arc<ConnectionRegistry>,
    cancel: CancellationToken,
    probes: Arc<Semaphore>,
}

impl KeepaliveMonitor {
    /// Create a monitor. Cancelling `cancel` stops every loop it started.
    pub fn new(
        config: KeepaliveConfig,
        registry: Arc<ConnectionRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        let permits = config.max_concurrent_probes.max(1);
        Self {
            config,
            registry,
            cancel,
            probes: Arc::new(Semaphore::new(permits)),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &KeepaliveConfig {
        &self.config
    }

    /// Whether [`start`](Self::start) spawns anything.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Stop every loop.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Start probing `connection`. Returns `None` when keepalive is disabled.
    pub fn start(&self, connection: Arc<dyn ConnectionHandle>) -> Option<KeepaliveHandle> {
        if !self.config.enabled {
            return None;
        }
        let (state, _) = watch::channel(ProbeState::Idle);
        let state = Arc::new(state);
        let stop = self.cancel.child_token();

        let probe_loop = ProbeLoop {
            connection,
            registry: self.registry.clone(),
            interval: self.config.interval,
            ack_timeout: self.config.ack_timeout,
            probes: self.probes.clone(),
            state: state.clone(),
            cancel: stop.clone(),
        };
        let task = tokio::spawn(probe_loop.run());

        Some(KeepaliveHandle { state, stop, task })
    }
}

/// Handle to one connection's keepalive loop.
pub struct KeepaliveHandle {
    state: Arc<watch::Sender<ProbeState>>,
    stop: CancellationToken,
    task: JoinHandle<KeepaliveOutcome>,
}

impl KeepaliveHandle {
    /// Current probe state.
    pub fn state(&self) -> ProbeState {
        *self.state.borrow()
    }

    /// Watch probe state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ProbeState> {
        self.state.subscribe()
    }

    /// Feed a pong payload. Returns `true` if it matched [`PROBE_TOKEN`]
    /// while a probe was outstanding, which re-arms the timer.
    pub fn acknowledge(&self, payload: &[u8]) -> bool {
        if payload != PROBE_TOKEN {
            return false;
        }
        self.state.send_if_modified(|state| {
            if *state == ProbeState::ProbeSent {
                *state = ProbeState::Acked;
                true
            } else {
                false
            }
        })
    }

    /// Stop this loop.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Whether the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to exit.
    pub async fn join(self) -> KeepaliveOutcome {
        self.task.await.unwrap_or(KeepaliveOutcome::Cancelled)
    }
}

struct ProbeLoop {
    connection: Arc<dyn ConnectionHandle>,
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    ack_timeout: Option<Duration>,
    probes: Arc<Semaphore>,
    state: Arc<watch::Sender<ProbeState>>,
    cancel: CancellationToken,
}

impl ProbeLoop {
    async fn run(self) -> KeepaliveOutcome {
        let outcome = self.probe_until_done().await;
        let conn_id = self.connection.id();
        match outcome {
            KeepaliveOutcome::Cancelled => {
                let _ = self.state.send_replace(ProbeState::Idle);
                debug!(conn_id = %conn_id, "keepalive cancelled");
            }
            KeepaliveOutcome::Closed => {
                let _ = self.state.send_replace(ProbeState::Closed);
                let _ = self.registry.remove(conn_id);
                info!(conn_id = %conn_id, "connection closed before probe, unregistered");
            }
            KeepaliveOutcome::TimedOut => {
                self.connection.close(CLOSE_GOING_AWAY, "keepalive timeout");
                let _ = self.registry.remove(conn_id);
                let _ = self.state.send_replace(ProbeState::Closed);
                info!(conn_id = %conn_id, "keepalive ack timed out, connection closed");
            }
            KeepaliveOutcome::Abandoned => {
                let _ = self.state.send_replace(ProbeState::Idle);
            }
        }
        if outcome != KeepaliveOutcome::Cancelled {
            counter!(WS_KEEPALIVE_TERMINATIONS_TOTAL, "outcome" => outcome.as_str()).increment(1);
        }
        outcome
    }

    async fn probe_until_done(&self) -> KeepaliveOutcome {
        let conn_id = self.connection.id();
        let mut acks = self.state.subscribe();

        loop {
            let _ = self.state.send_replace(ProbeState::ProbeScheduled);
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return KeepaliveOutcome::Cancelled,
                () = time::sleep(self.interval) => {}
            }

            if !self.connection.is_open() {
                return KeepaliveOutcome::Closed;
            }

            let permit = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return KeepaliveOutcome::Cancelled,
                permit = self.probes.acquire() => permit,
            };
            let Ok(permit) = permit else {
                return KeepaliveOutcome::Cancelled;
            };

            // Published before the send so an echo racing the send still counts.
            let _ = self.state.send_replace(ProbeState::ProbeSent);
            let sent = self
                .connection
                .send_probe(Bytes::from_static(PROBE_TOKEN));
            drop(permit);
            if let Err(error) = sent {
                warn!(conn_id = %conn_id, %error, "keepalive probe failed, abandoning");
                return KeepaliveOutcome::Abandoned;
            }
            counter!(WS_KEEPALIVE_PROBES_TOTAL).increment(1);
            debug!(conn_id = %conn_id, "keepalive probe sent");

            let acked = async {
                acks.wait_for(|state| *state == ProbeState::Acked)
                    .await
                    .is_ok()
            };
            let acked = match self.ack_timeout {
                Some(limit) => tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => return KeepaliveOutcome::Cancelled,
                    result = time::timeout(limit, acked) => match result {
                        Ok(acked) => acked,
                        Err(_) => {
                            let _ = self.state.send_replace(ProbeState::TimedOut);
                            return KeepaliveOutcome::TimedOut;
                        }
                    },
                },
                None => tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => return KeepaliveOutcome::Cancelled,
                    acked = acked => acked,
                },
            };
            if !acked {
                return KeepaliveOutcome::Cancelled;
            }
            debug!(conn_id = %conn_id, "keepalive ack received");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::SendError;
    use crate::websocket::testing::MockConnection;
    use beacon_core::Principal;
    use tokio::time::Instant;

    fn config(interval_ms: u64, ack_timeout_ms: Option<u64>) -> KeepaliveConfig {
        KeepaliveConfig {
            enabled: true,
            interval: Duration::from_millis(interval_ms),
            ack_timeout: ack_timeout_ms.map(Duration::from_millis),
            max_concurrent_probes: 4,
        }
    }

    fn setup(
        cfg: KeepaliveConfig,
        ids: &[&str],
    ) -> (KeepaliveMonitor, Arc<ConnectionRegistry>, Vec<Arc<MockConnection>>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let conns: Vec<_> = ids
            .iter()
            .map(|id| {
                let conn = MockConnection::new(id);
                let _ = registry.add(conn.clone(), Arc::new(Principal::new(*id)));
                conn
            })
            .collect();
        let monitor = KeepaliveMonitor::new(cfg, registry.clone(), CancellationToken::new());
        (monitor, registry, conns)
    }

    #[tokio::test]
    async fn disabled_monitor_spawns_nothing() {
        let (monitor, _registry, conns) = setup(KeepaliveConfig::default(), &["c1"]);
        assert!(!monitor.is_enabled());
        assert!(monitor.start(conns[0].clone()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn acked_probe_rearms_from_ack_time() {
        let (monitor, _registry, conns) = setup(config(1000, None), &["c1"]);
        let conn = &conns[0];
        let start = Instant::now();
        let handle = monitor.start(conn.clone()).unwrap();

        time::sleep(Duration::from_millis(1050)).await;
        assert_eq!(conn.probe_times().len(), 1);
        assert_eq!(handle.state(), ProbeState::ProbeSent);
        assert!(handle.acknowledge(PROBE_TOKEN));

        time::sleep(Duration::from_millis(1100)).await;
        let times = conn.probe_times();
        assert_eq!(times.len(), 2);
        assert_eq!(times[0] - start, Duration::from_millis(1000));
        assert_eq!(times[1] - start, Duration::from_millis(2050));
        assert_eq!(conn.probe_payloads()[0].as_ref(), PROBE_TOKEN);
    }

    #[tokio::test(start_paused = true)]
    async fn echoing_connection_is_probed_indefinitely() {
        let (monitor, registry, conns) = setup(config(500, None), &["c1"]);
        let conn = &conns[0];
        let handle = monitor.start(conn.clone()).unwrap();
        let mut states = handle.subscribe();

        for round in 1..=20 {
            states
                .wait_for(|s| *s == ProbeState::ProbeSent)
                .await
                .unwrap();
            assert_eq!(conn.probe_times().len(), round);
            assert!(handle.acknowledge(PROBE_TOKEN));
        }
        assert!(!handle.is_finished());
        assert!(registry.contains(conn.id()));
        let gaps: Vec<_> = conn
            .probe_times()
            .windows(2)
            .map(|w| w[1] - w[0])
            .collect();
        assert!(gaps.iter().all(|gap| *gap == Duration::from_millis(500)));
    }

    #[tokio::test(start_paused = true)]
    async fn mismatched_ack_does_not_rearm() {
        let (monitor, _registry, conns) = setup(config(1000, None), &["c1"]);
        let conn = &conns[0];
        let handle = monitor.start(conn.clone()).unwrap();

        time::sleep(Duration::from_millis(1010)).await;
        assert!(!handle.acknowledge(b"PONG"));
        assert!(!handle.acknowledge(b"PING "));
        assert!(!handle.acknowledge(b""));
        time::sleep(Duration::from_secs(10)).await;

        assert_eq!(handle.state(), ProbeState::ProbeSent);
        assert_eq!(conn.probe_times().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ack_outside_probe_window_is_ignored() {
        let (monitor, _registry, conns) = setup(config(1000, None), &["c1"]);
        let handle = monitor.start(conns[0].clone()).unwrap();
        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.state(), ProbeState::ProbeScheduled);
        assert!(!handle.acknowledge(PROBE_TOKEN));
    }

    #[tokio::test(start_paused = true)]
    async fn closed_connection_is_unregistered_at_probe_time() {
        let (monitor, registry, conns) = setup(config(1000, None), &["c1"]);
        let conn = &conns[0];
        let handle = monitor.start(conn.clone()).unwrap();
        conn.set_open(false);

        let mut states = handle.subscribe();
        assert_eq!(handle.join().await, KeepaliveOutcome::Closed);
        assert!(!registry.contains(conn.id()));
        assert!(conn.probe_times().is_empty());
        assert_eq!(*states.borrow_and_update(), ProbeState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_is_abandoned_and_stays_registered() {
        let (monitor, registry, conns) = setup(config(1000, None), &["c1"]);
        let conn = &conns[0];
        conn.fail_probes(SendError::Full);
        let handle = monitor.start(conn.clone()).unwrap();

        assert_eq!(handle.join().await, KeepaliveOutcome::Abandoned);
        assert!(registry.contains(conn.id()));
        assert!(conn.closed_with().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn dead_man_timer_closes_and_unregisters() {
        let (monitor, registry, conns) = setup(config(1000, Some(300)), &["c1"]);
        let conn = &conns[0];
        let start = Instant::now();
        let handle = monitor.start(conn.clone()).unwrap();
        let states = handle.subscribe();

        assert_eq!(handle.join().await, KeepaliveOutcome::TimedOut);
        assert_eq!(start.elapsed(), Duration::from_millis(1300));
        assert!(!registry.contains(conn.id()));
        assert_eq!(
            conn.closed_with(),
            Some((CLOSE_GOING_AWAY, "keepalive timeout".to_string()))
        );
        assert_eq!(*states.borrow(), ProbeState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn ack_within_timeout_keeps_connection() {
        let (monitor, registry, conns) = setup(config(1000, Some(300)), &["c1"]);
        let conn = &conns[0];
        let handle = monitor.start(conn.clone()).unwrap();

        time::sleep(Duration::from_millis(1100)).await;
        assert!(handle.acknowledge(PROBE_TOKEN));
        time::sleep(Duration::from_millis(1100)).await;
        assert!(handle.acknowledge(PROBE_TOKEN));
        time::sleep(Duration::from_millis(100)).await;

        assert!(!handle.is_finished());
        assert!(registry.contains(conn.id()));
        assert_eq!(conn.probe_times().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_waiting_loops() {
        let (monitor, registry, conns) = setup(config(1000, None), &["c1", "c2"]);
        let first = monitor.start(conns[0].clone()).unwrap();
        let second = monitor.start(conns[1].clone()).unwrap();

        // c2 has an outstanding probe, c1 is rescheduled
        time::sleep(Duration::from_millis(1010)).await;
        assert!(first.acknowledge(PROBE_TOKEN));
        monitor.shutdown();

        assert_eq!(first.join().await, KeepaliveOutcome::Cancelled);
        assert_eq!(second.join().await, KeepaliveOutcome::Cancelled);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_one_loop_only() {
        let (monitor, _registry, conns) = setup(config(1000, None), &["c1", "c2"]);
        let first = monitor.start(conns[0].clone()).unwrap();
        let second = monitor.start(conns[1].clone()).unwrap();

        first.stop();
        assert_eq!(first.join().await, KeepaliveOutcome::Cancelled);

        time::sleep(Duration::from_millis(1010)).await;
        assert_eq!(second.state(), ProbeState::ProbeSent);
        assert!(conns[0].probe_times().is_empty());
        assert_eq!(conns[1].probe_times().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_connection_does_not_delay_others() {
        let mut cfg = config(1000, None);
        cfg.max_concurrent_probes = 1;
        let (monitor, _registry, conns) = setup(cfg, &["silent", "chatty"]);
        let _silent = monitor.start(conns[0].clone()).unwrap();
        let chatty = monitor.start(conns[1].clone()).unwrap();
        let mut states = chatty.subscribe();

        for _ in 0..5 {
            states
                .wait_for(|s| *s == ProbeState::ProbeSent)
                .await
                .unwrap();
            assert!(chatty.acknowledge(PROBE_TOKEN));
        }
        assert_eq!(conns[0].probe_times().len(), 1);
        assert_eq!(conns[1].probe_times().len(), 5);
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(KeepaliveOutcome::TimedOut.as_str(), "timed_out");
        assert_eq!(KeepaliveOutcome::Abandoned.as_str(), "abandoned");
    }
}
