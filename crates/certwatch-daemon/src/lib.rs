//! certwatch-daemon - platform adapters for the certwatch engine.
//!
//! The core engine consumes its collaborators through traits; this crate
//! provides the concrete backends the daemon binary wires up:
//!
//! - [`store`]: `SQLite`-backed [`AppStore`](certwatch_core::AppStore)
//! - [`events`]: pairing of two-phase package notifications and the unix
//!   socket feed they arrive on
//! - [`net`]: connectivity probe over `/sys/class/net` plus a polling watch
//! - [`prompt`]: user prompt backend delegating to a helper command
//! - [`verify`]: certificate verifier backend delegating to a helper
//!   command

pub mod events;
pub mod net;
pub mod prompt;
pub mod store;
pub mod verify;
