//! VPN module root – re-exports public API surface.

pub mod types;
pub mod channel;
pub mod process;
pub mod pty;
pub mod logging;
pub mod driver;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

pub use types::*;
pub use channel::{ExpectOutcome, ProcessHost, VpnChannel};
pub use driver::{ConnectionDriver, DISCONNECT_GRACE};
pub use service::{VpnService, VpnServiceState};
