//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the process-wide
//! resources every handler needs: the backend gateway, the tool registry and
//! the configuration. It is built once in `main` and injected into the router.

use crate::config::Config;
use colloquy_core::{ServiceGateway, ToolRegistry};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::watch;
use tracing::{info, warn};

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<dyn ServiceGateway>,
    pub tools: Arc<ToolRegistry>,
    pub config: Arc<Config>,
    /// Flips to `true` once the server starts shutting down.
    pub shutdown: watch::Receiver<bool>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        gateway: Arc<dyn ServiceGateway>,
        tools: Arc<ToolRegistry>,
        config: Arc<Config>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            gateway,
            tools,
            config,
            shutdown,
            started_at: Instant::now(),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Signals shutdown to every session and waits for them to finish.
///
/// Each session holds a receiver through `AppState`, so the channel closes
/// once the last session is gone. Returns `false` if sessions were still
/// open when `grace` ran out.
pub async fn drain_sessions(shutdown: &watch::Sender<bool>, grace: Duration) -> bool {
    shutdown.send_replace(true);
    if tokio::time::timeout(grace, shutdown.closed()).await.is_ok() {
        info!("All sessions closed");
        true
    } else {
        warn!(
            open_handles = shutdown.receiver_count(),
            "Sessions still open after the shutdown grace period"
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drain_waits_for_sessions() {
        let (tx, rx) = watch::channel(false);
        let mut session = rx.clone();
        drop(rx);
        let task = tokio::spawn(async move {
            session.changed().await.unwrap();
            assert!(*session.borrow());
            tokio::time::sleep(Duration::from_millis(50)).await;
        });

        assert!(drain_sessions(&tx, Duration::from_secs(5)).await);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_drain_gives_up_after_grace() {
        let (tx, rx) = watch::channel(false);
        assert!(!drain_sessions(&tx, Duration::from_millis(20)).await);
        assert!(*rx.borrow());
    }
}
