//! Async facade over the blocking driver.
//!
//! Holds at most one driver at a time, runs its blocking handshake on a
//! dedicated blocking task, and re-broadcasts its lifecycle events on a
//! service-lifetime channel so subscribers survive reconnects.

use crate::vpn::driver::ConnectionDriver;
use crate::vpn::logging::LogEntry;
use crate::vpn::channel::ProcessHost;
use crate::vpn::process::{
    client_version, find_client_binary, CommandSpec, PtyProcessHost, DEFAULT_CLIENT_BINARY,
};
use crate::vpn::types::{
    ConnectionInfo, ConnectionParams, ConnectionState, VpnError, VpnErrorKind, VpnEvent,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;

const SERVICE_EVENT_CAPACITY: usize = 32;

/// Shared service handle.
pub type VpnServiceState = Arc<VpnService>;

/// Owns the current connection attempt, if any.
pub struct VpnService {
    driver: RwLock<Option<Arc<ConnectionDriver>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<VpnEvent>,
}

impl VpnService {
    pub fn new() -> VpnServiceState {
        let (events, _) = broadcast::channel(SERVICE_EVENT_CAPACITY);
        Arc::new(Self {
            driver: RwLock::new(None),
            worker: Mutex::new(None),
            events,
        })
    }

    /// Receiver for lifecycle events across all connection attempts.
    pub fn subscribe(&self) -> broadcast::Receiver<VpnEvent> {
        self.events.subscribe()
    }

    // ── Lifecycle ─────────────────────────────────────────────────

    /// Start a connection attempt with the default client invocation.
    pub async fn connect(&self, params: ConnectionParams) -> Result<ConnectionInfo, VpnError> {
        let spec = CommandSpec::new(&params.server, &params.username);
        self.connect_with(params, spec, Box::new(PtyProcessHost))
            .await
    }

    /// Start a connection attempt with an explicit invocation and host.
    pub async fn connect_with(
        &self,
        params: ConnectionParams,
        spec: CommandSpec,
        host: Box<dyn ProcessHost>,
    ) -> Result<ConnectionInfo, VpnError> {
        let mut slot = self.driver.write().await;
        if let Some(existing) = slot.as_ref() {
            if !existing.state().is_terminal() {
                return Err(VpnError::new(
                    VpnErrorKind::AlreadyActive,
                    format!(
                        "a connection is already active (state {})",
                        existing.state()
                    ),
                ));
            }
        }

        let driver = Arc::new(ConnectionDriver::with_host(params, spec, host));
        let info = driver.info();

        // Re-broadcast driver events on the service channel; the forwarder
        // ends when the driver's sender is dropped.
        let mut rx = driver.subscribe();
        let tx = self.events.clone();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                let _ = tx.send(event);
            }
        });

        let runner = Arc::clone(&driver);
        let handle = tokio::task::spawn_blocking(move || {
            if let Err(e) = runner.start() {
                log::error!("connection attempt ended with error: {}", e);
            }
        });
        *self.worker.lock().await = Some(handle);
        *slot = Some(driver);
        Ok(info)
    }

    /// Tear down the established tunnel.
    pub async fn disconnect(&self) -> Result<(), VpnError> {
        let driver = self
            .driver
            .read()
            .await
            .clone()
            .ok_or_else(|| VpnError::new(VpnErrorKind::NotConnected, "no active connection"))?;
        tokio::task::spawn_blocking(move || driver.disconnect())
            .await
            .map_err(|e| {
                VpnError::new(VpnErrorKind::Internal, "disconnect worker panicked")
                    .with_detail(e.to_string())
            })?
    }

    /// Wait for the current connection attempt's worker to finish.
    pub async fn join(&self) {
        if let Some(handle) = self.worker.lock().await.take() {
            let _ = handle.await;
        }
    }

    // ── Observation ───────────────────────────────────────────────

    pub async fn status(&self) -> ConnectionState {
        match self.driver.read().await.as_ref() {
            Some(driver) => driver.state(),
            None => ConnectionState::Idle,
        }
    }

    pub async fn info(&self) -> Option<ConnectionInfo> {
        self.driver.read().await.as_ref().map(|d| d.info())
    }

    /// The last `tail` transcript entries of the current connection.
    pub async fn logs(&self, tail: usize) -> Vec<LogEntry> {
        match self.driver.read().await.as_ref() {
            Some(driver) => driver.log().tail(tail),
            None => Vec::new(),
        }
    }

    pub async fn clear_logs(&self) {
        if let Some(driver) = self.driver.read().await.as_ref() {
            driver.log().clear();
        }
    }

    // ── Environment ───────────────────────────────────────────────

    /// Locate the client binary on this system.
    pub fn find_binary(&self) -> Option<PathBuf> {
        find_client_binary(DEFAULT_CLIENT_BINARY)
    }

    /// Locate the client binary and report its version line.
    pub async fn detect_version(&self) -> Result<String, VpnError> {
        let binary = self.find_binary().ok_or_else(|| {
            VpnError::new(
                VpnErrorKind::BinaryNotFound,
                format!("{} not found on this system", DEFAULT_CLIENT_BINARY),
            )
        })?;
        client_version(&binary).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vpn::testing::{ChannelTrace, Script, ScriptedHost};

    fn params() -> ConnectionParams {
        ConnectionParams::new("vpn.example.com", "alice", "hunter2")
    }

    async fn connect_scripted(
        service: &VpnService,
        script: Script,
    ) -> Result<ConnectionInfo, VpnError> {
        let trace = Arc::new(ChannelTrace::default());
        let spec = CommandSpec::new("vpn.example.com", "alice");
        let host = ScriptedHost::new(script, trace);
        service.connect_with(params(), spec, Box::new(host)).await
    }

    #[tokio::test]
    async fn connect_reports_events_in_order() {
        let service = VpnService::new();
        let mut rx = service.subscribe();
        connect_scripted(&service, Script::PromptThenTunnel)
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), VpnEvent::Starting);
        assert_eq!(rx.recv().await.unwrap(), VpnEvent::Connecting);
        assert_eq!(rx.recv().await.unwrap(), VpnEvent::Connected);
        service.join().await;
        assert_eq!(service.status().await, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn second_connect_while_active_is_refused() {
        let service = VpnService::new();
        connect_scripted(&service, Script::PromptThenTunnel)
            .await
            .unwrap();
        service.join().await;
        let err = connect_scripted(&service, Script::PromptThenTunnel)
            .await
            .unwrap_err();
        assert_eq!(err.kind, VpnErrorKind::AlreadyActive);
    }

    #[tokio::test]
    async fn reconnect_after_terminal_state_is_allowed() {
        let service = VpnService::new();
        connect_scripted(&service, Script::EofAtOnce).await.unwrap();
        service.join().await;
        assert_eq!(service.status().await, ConnectionState::Canceled);
        // The previous attempt ended; a fresh one may begin.
        connect_scripted(&service, Script::PromptThenTunnel)
            .await
            .unwrap();
        service.join().await;
        assert_eq!(service.status().await, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn disconnect_without_connection_is_refused() {
        let service = VpnService::new();
        let err = service.disconnect().await.unwrap_err();
        assert_eq!(err.kind, VpnErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn full_cycle_ends_disconnected() {
        let service = VpnService::new();
        let mut rx = service.subscribe();
        connect_scripted(&service, Script::PromptThenTunnel)
            .await
            .unwrap();
        service.join().await;
        service.disconnect().await.unwrap();
        assert_eq!(service.status().await, ConnectionState::Disconnected);
        for expected in [
            VpnEvent::Starting,
            VpnEvent::Connecting,
            VpnEvent::Connected,
            VpnEvent::Disconnected,
        ] {
            assert_eq!(rx.recv().await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn logs_follow_the_current_connection() {
        let service = VpnService::new();
        assert!(service.logs(50).await.is_empty());
        connect_scripted(&service, Script::PromptThenEof)
            .await
            .unwrap();
        service.join().await;
        assert!(!service.logs(50).await.is_empty());
        service.clear_logs().await;
        assert!(service.logs(50).await.is_empty());
    }

    #[tokio::test]
    async fn fresh_service_is_idle_with_no_info() {
        let service = VpnService::new();
        assert_eq!(service.status().await, ConnectionState::Idle);
        assert!(service.info().await.is_none());
    }

    #[tokio::test]
    async fn info_reflects_the_attempt() {
        let service = VpnService::new();
        let info = connect_scripted(&service, Script::PromptThenTunnel)
            .await
            .unwrap();
        assert_eq!(info.server, "vpn.example.com");
        assert_eq!(info.username, "alice");
        service.join().await;
        let live = service.info().await.unwrap();
        assert_eq!(live.id, info.id);
        assert_eq!(live.state, ConnectionState::Connected);
    }
}
