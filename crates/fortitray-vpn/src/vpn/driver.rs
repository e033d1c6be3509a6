//! The connection driver.
//!
//! Owns the spawned client process and walks the expect/respond handshake:
//! spawn under the elevation wrapper, wait for the password prompt, answer
//! it, wait for the tunnel marker. Each state transition emits exactly one
//! lifecycle event, after the state field and the process handle have been
//! updated, so observers never see an event ahead of its effects.
//!
//! `start` and `disconnect` block for human-scale intervals (elevation
//! dialogs, tunnel negotiation); schedule them on a blocking worker, never
//! on the UI or async-reactor context.

use crate::vpn::channel::{ExpectOutcome, ProcessHost, VpnChannel};
use crate::vpn::logging::{ConnectionLog, LogEntry, LogLevel};
use crate::vpn::process::{CommandSpec, PtyProcessHost};
use crate::vpn::types::{
    ConnectionInfo, ConnectionParams, ConnectionState, VpnError, VpnErrorKind, VpnEvent,
};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;

/// How long `disconnect` waits for the client to wind down after the
/// interrupt before the channel is closed regardless.
pub const DISCONNECT_GRACE: Duration = Duration::from_secs(5);

const EVENT_CAPACITY: usize = 16;
const LOG_CAPACITY: usize = 1_000;

/// Drives one tunnel attempt from spawn to teardown. Single use: after a
/// terminal state is reached the driver only answers queries.
pub struct ConnectionDriver {
    id: String,
    params: ConnectionParams,
    spec: CommandSpec,
    host: Box<dyn ProcessHost>,
    state: RwLock<ConnectionState>,
    /// Open iff state is in {Connected, Disconnecting}; during the
    /// handshake the channel lives on the worker's stack.
    channel: Mutex<Option<Box<dyn VpnChannel>>>,
    events: broadcast::Sender<VpnEvent>,
    log: Arc<ConnectionLog>,
    created_at: DateTime<Utc>,
    connected_at: RwLock<Option<DateTime<Utc>>>,
    disconnected_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
}

impl ConnectionDriver {
    /// Driver with the production pty host and the default invocation
    /// shape for `params.server` / `params.username`.
    pub fn new(params: ConnectionParams) -> Self {
        let spec = CommandSpec::new(&params.server, &params.username);
        Self::with_host(params, spec, Box::new(PtyProcessHost))
    }

    /// Driver with an explicit invocation shape and process host.
    pub fn with_host(
        params: ConnectionParams,
        spec: CommandSpec,
        host: Box<dyn ProcessHost>,
    ) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            log: Arc::new(ConnectionLog::new(&id, LOG_CAPACITY)),
            id,
            params,
            spec,
            host,
            state: RwLock::new(ConnectionState::Idle),
            channel: Mutex::new(None),
            events,
            created_at: Utc::now(),
            connected_at: RwLock::new(None),
            disconnected_at: RwLock::new(None),
            last_error: RwLock::new(None),
        }
    }

    // ── Observation ───────────────────────────────────────────────

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read().expect("state lock poisoned")
    }

    /// Receiver for lifecycle events, in transition order.
    pub fn subscribe(&self) -> broadcast::Receiver<VpnEvent> {
        self.events.subscribe()
    }

    pub fn log(&self) -> Arc<ConnectionLog> {
        Arc::clone(&self.log)
    }

    pub fn info(&self) -> ConnectionInfo {
        let process_id = self
            .channel
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().and_then(|c| c.process_id()));
        ConnectionInfo {
            id: self.id.clone(),
            server: self.params.server.clone(),
            username: self.params.username.clone(),
            state: self.state(),
            process_id,
            created_at: self.created_at,
            connected_at: *self.connected_at.read().expect("time lock poisoned"),
            disconnected_at: *self.disconnected_at.read().expect("time lock poisoned"),
            last_error: self.last_error.read().expect("error lock poisoned").clone(),
        }
    }

    // ── Operations ────────────────────────────────────────────────

    /// Run the connect handshake to completion.
    ///
    /// Returns `Ok` for every outcome the state machine owns (connected,
    /// canceled, failed – reported through events); returns `Err` only for
    /// precondition violations and spawn failures.
    pub fn start(&self) -> Result<(), VpnError> {
        {
            let state = self.state.read().expect("state lock poisoned");
            if *state != ConnectionState::Idle {
                return Err(VpnError::new(
                    VpnErrorKind::AlreadyActive,
                    format!("cannot start from state {}", state),
                ));
            }
        }

        log::info!("starting VPN connection to {}", self.params.server);
        self.log.append(LogEntry::internal(
            LogLevel::Info,
            format!("Starting connection to {}", self.params.server),
        ));
        self.transition(ConnectionState::Starting, VpnEvent::Starting);

        let mut channel = match self.host.spawn(&self.spec) {
            Ok(c) => c,
            Err(e) => {
                log::error!("failed to spawn VPN client: {}", e);
                self.log.append(LogEntry::internal(
                    LogLevel::Error,
                    format!("Failed to spawn client: {}", e),
                ));
                *self.last_error.write().expect("error lock poisoned") =
                    Some(e.to_string());
                self.transition(ConnectionState::Failed, VpnEvent::Failed);
                return Err(e);
            }
        };
        self.log.append(LogEntry::internal(
            LogLevel::Debug,
            format!(
                "Spawned `{}` (pid {:?})",
                self.spec.display_line(),
                channel.process_id()
            ),
        ));

        match channel.expect(&[&self.spec.password_prompt]) {
            ExpectOutcome::Marker(_) => {}
            ExpectOutcome::Eof => {
                // Exit before any prompt: the human dismissed the elevation
                // dialog, or the process died on startup. Nothing was sent.
                channel.close();
                log::warn!("VPN connection canceled before the password prompt");
                self.log.append(LogEntry::internal(
                    LogLevel::Warning,
                    "Client exited before the password prompt",
                ));
                self.transition(ConnectionState::Canceled, VpnEvent::Canceled);
                return Ok(());
            }
        }

        log::info!("password prompt seen, authenticating");
        self.log.append(LogEntry::internal(
            LogLevel::Info,
            "Password prompt seen, sending credentials",
        ));
        self.transition(ConnectionState::Connecting, VpnEvent::Connecting);

        if let Err(e) = channel.send_line(self.params.password.expose()) {
            // A write failure means the process is gone; same terminal
            // outcome as EOF after the prompt.
            channel.close();
            log::error!("VPN connection failed: {}", e);
            self.log.append(LogEntry::internal(
                LogLevel::Error,
                "Client went away while sending credentials",
            ));
            *self.last_error.write().expect("error lock poisoned") = Some(e.to_string());
            self.transition(ConnectionState::Failed, VpnEvent::Failed);
            return Ok(());
        }

        match channel.expect(&[&self.spec.tunnel_marker]) {
            ExpectOutcome::Marker(_) => {
                // The handle stays open: closing it tears the tunnel down.
                *self.channel.lock().expect("channel lock poisoned") = Some(channel);
                *self.connected_at.write().expect("time lock poisoned") =
                    Some(Utc::now());
                log::info!("VPN tunnel established");
                self.log
                    .append(LogEntry::process(self.spec.tunnel_marker.clone()));
                self.transition(ConnectionState::Connected, VpnEvent::Connected);
                Ok(())
            }
            ExpectOutcome::Eof => {
                channel.close();
                log::error!("VPN connection failed before the tunnel came up");
                self.log.append(LogEntry::internal(
                    LogLevel::Error,
                    "Client exited before the tunnel came up",
                ));
                self.transition(ConnectionState::Failed, VpnEvent::Failed);
                Ok(())
            }
        }
    }

    /// Tear down an established tunnel: one interrupt, a bounded grace
    /// wait, then the handle is closed regardless.
    pub fn disconnect(&self) -> Result<(), VpnError> {
        {
            let state = self.state.read().expect("state lock poisoned");
            if *state != ConnectionState::Connected {
                return Err(VpnError::new(
                    VpnErrorKind::NotConnected,
                    format!("disconnect requires an established tunnel (state {})", state),
                ));
            }
        }
        self.set_state(ConnectionState::Disconnecting);

        let mut channel = self
            .channel
            .lock()
            .expect("channel lock poisoned")
            .take()
            .ok_or_else(|| {
                VpnError::new(
                    VpnErrorKind::Internal,
                    "no process handle for an established tunnel",
                )
            })?;

        log::info!("disconnecting VPN tunnel");
        self.log
            .append(LogEntry::internal(LogLevel::Info, "Disconnecting"));

        if let Err(e) = channel.interrupt() {
            log::warn!("interrupt delivery failed: {}", e);
            self.log.append(LogEntry::internal(
                LogLevel::Warning,
                format!("Interrupt delivery failed: {}", e),
            ));
        }
        match channel.wait_exit(DISCONNECT_GRACE) {
            Some(code) => self.log.append(LogEntry::internal(
                LogLevel::Debug,
                format!("Client exited with code {}", code),
            )),
            None => self.log.append(LogEntry::internal(
                LogLevel::Warning,
                "Client ignored the interrupt; closing the channel anyway",
            )),
        }
        channel.close();

        *self.disconnected_at.write().expect("time lock poisoned") = Some(Utc::now());
        log::info!("VPN tunnel disconnected");
        self.log
            .append(LogEntry::internal(LogLevel::Info, "Disconnected"));
        self.transition(ConnectionState::Disconnected, VpnEvent::Disconnected);
        Ok(())
    }

    // ── Internals ─────────────────────────────────────────────────

    fn set_state(&self, next: ConnectionState) {
        *self.state.write().expect("state lock poisoned") = next;
    }

    /// Update the state field, then emit the paired event. Events without a
    /// subscriber are dropped, which is fine: the driver works headless.
    fn transition(&self, next: ConnectionState, event: VpnEvent) {
        self.set_state(next);
        let _ = self.events.send(event);
    }
}

impl Drop for ConnectionDriver {
    fn drop(&mut self) {
        // Last-resort cleanup only; the disconnect path is the real
        // teardown and owners are expected to drive it explicitly.
        if let Ok(mut slot) = self.channel.lock() {
            if let Some(mut channel) = slot.take() {
                log::warn!("driver dropped with an open process handle; closing");
                channel.close();
            }
        }
    }
}
