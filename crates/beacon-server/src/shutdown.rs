//! Server-wide stop signal.
//!
//! The HTTP listener and every subscriber session watch [`ShutdownCoordinator::token`];
//! keepalive loops watch a child of it. Cancelling closes open sessions with 1001.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Grace period `beacond` gives the listener on Ctrl-C.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Owns the cancellation token shared by the listener, sessions and keepalive.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Token for the listener and subscriber sessions.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Token for keepalive loops. Cancelled with the server.
    pub fn keepalive_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Stop accepting subscribers and close the open ones. Idempotent.
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            info!("shutdown requested");
        }
        self.token.cancel();
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Trigger shutdown and wait up to `grace` for the listener task.
    ///
    /// Returns `false` when the listener was still running at the deadline.
    pub async fn drain(&self, listener: JoinHandle<()>, grace: Duration) -> bool {
        self.shutdown();
        match tokio::time::timeout(grace, listener).await {
            Ok(Ok(())) => true,
            Ok(Err(error)) => {
                warn!(%error, "listener task failed during shutdown");
                true
            }
            Err(_) => {
                warn!(grace_ms = grace.as_millis(), "listener still running after shutdown grace");
                false
            }
        }
    }
}
