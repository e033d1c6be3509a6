//! Shared types for the VPN driver – states, events, parameters, errors,
//! and info payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroizing;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Connection state machine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle state of a single tunnel attempt.
///
/// The machine is linear; once a terminal state is reached the driver never
/// transitions again and a fresh driver must be constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Fresh driver, nothing spawned yet.
    Idle,
    /// Client process spawned, waiting for the password prompt.
    Starting,
    /// Password prompt seen and answered, waiting for the tunnel marker.
    Connecting,
    /// Tunnel is up; the process handle stays open while traffic flows.
    Connected,
    /// Interrupt delivered, waiting for the client to wind down.
    Disconnecting,
    /// Tunnel torn down on request.
    Disconnected,
    /// Client exited before any password prompt (elevation declined).
    Canceled,
    /// Client exited after credentials were sent, before the tunnel came up.
    Failed,
}

impl ConnectionState {
    /// Terminal states hold no process handle and accept no operations.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Canceled | Self::Failed)
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Idle
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Starting => write!(f, "Starting"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Canceled => write!(f, "Canceled"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Lifecycle events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle event, emitted exactly once per state transition, after the
/// state field and the process handle have been updated. Carries no payload;
/// observers read state separately if they need it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VpnEvent {
    Starting,
    Canceled,
    Connecting,
    Failed,
    Connected,
    Disconnected,
}

impl fmt::Display for VpnEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Canceled => write!(f, "canceled"),
            Self::Connecting => write!(f, "connecting"),
            Self::Failed => write!(f, "failed"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Connection parameters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Password holder. Zeroed on drop, redacted in `Debug`, and deliberately
/// not serialisable – the value travels over the interactive channel and
/// nowhere else.
#[derive(Clone)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    /// Expose the raw value for writing to the process channel.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(<redacted>)")
    }
}

/// Immutable parameters for one tunnel attempt.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    pub server: String,
    pub username: String,
    pub password: Secret,
}

impl ConnectionParams {
    pub fn new(
        server: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            username: username.into(),
            password: Secret::new(password),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Connection info
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Point-in-time snapshot of a driver, safe to hand to the UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub id: String,
    pub server: String,
    pub username: String,
    pub state: ConnectionState,
    pub process_id: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub disconnected_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Error type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Crate-level error kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VpnErrorKind {
    /// The client process could not be spawned.
    SpawnFailed,
    /// A connect was requested while a driver is still live.
    AlreadyActive,
    /// An operation that requires an established tunnel was invoked without one.
    NotConnected,
    /// The process handle is gone.
    ChannelClosed,
    /// The client binary could not be located.
    BinaryNotFound,
    IoError,
    ParseError,
    Internal,
}

/// Crate-level error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VpnError {
    pub kind: VpnErrorKind,
    pub message: String,
    pub detail: Option<String>,
}

impl fmt::Display for VpnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)?;
        if let Some(d) = &self.detail {
            write!(f, " ({})", d)?;
        }
        Ok(())
    }
}

impl VpnError {
    pub fn new(kind: VpnErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl From<VpnError> for String {
    fn from(e: VpnError) -> String {
        e.to_string()
    }
}
