//! # fortitray-vpn
//!
//! Specialized crate for driving openfortivpn connections through their
//! interactive, privilege-elevated handshake.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | **types** | Shared enums, structs, errors, lifecycle events |
//! | **channel** | Process-host traits the driver is written against |
//! | **process** | Client invocation shape, binary discovery, pty host |
//! | **pty** | Pseudo-terminal channel with marker scanning |
//! | **logging** | Structured per-connection transcript capture |
//! | **driver** | Blocking expect/respond connection state machine |
//! | **service** | Async facade owning one connection at a time |

pub mod vpn;
