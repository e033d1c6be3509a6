//! Process-host seam.
//!
//! The driver talks to the spawned client only through these traits, so the
//! handshake state machine can be exercised against scripted channels
//! without a real pty or a privileged binary.

use crate::vpn::process::CommandSpec;
use crate::vpn::types::VpnError;
use std::time::Duration;

/// Result of waiting for one of several expected markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectOutcome {
    /// The marker at this index in the pattern list appeared in the output.
    Marker(usize),
    /// The process closed its side of the channel.
    ///
    /// Read errors collapse into this variant as well: the child's exit is
    /// the only reliable failure signal, so there is no separate
    /// transport-error outcome.
    Eof,
}

/// A live byte channel to a spawned client process.
pub trait VpnChannel: Send {
    /// Block until one of `markers` appears in the output stream, or the
    /// stream ends. No read timeout: the client legitimately sits for
    /// human-scale intervals behind elevation dialogs and tunnel
    /// negotiation.
    fn expect(&mut self, markers: &[&str]) -> ExpectOutcome;

    /// Write `line` followed by a line terminator.
    fn send_line(&mut self, line: &str) -> Result<(), VpnError>;

    /// Deliver an interrupt so the client can tear the tunnel down cleanly.
    /// Not a forceful kill.
    fn interrupt(&mut self) -> Result<(), VpnError>;

    /// Poll for process exit for at most `grace`. Returns the exit code if
    /// the process finished in time.
    fn wait_exit(&mut self, grace: Duration) -> Option<i32>;

    /// Release the process and its terminal. Idempotent. Still-running
    /// children are reaped forcefully; the interrupt path has already had
    /// its grace period by the time this runs.
    fn close(&mut self);

    /// OS process id of the child, while it is attached.
    fn process_id(&self) -> Option<u32>;
}

/// Spawns client processes attached to an interactive terminal.
pub trait ProcessHost: Send + Sync {
    fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn VpnChannel>, VpnError>;
}
