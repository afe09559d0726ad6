//! permafrost-daemon - control plane library
//!
//! The control plane coordinates trace freezing across a mesh: sidecars
//! consult it on every tagged request, operators drive it through a framed
//! RPC protocol. This library holds both surfaces; the binary in `main.rs`
//! wires them to sockets.
//!
//! # Modules
//!
//! - [`http`]: the sidecar-facing axum surface (`/check`, `/snapshot`,
//!   `/app-snapshot`)
//! - [`protocol`]: framing, messages, and dispatch for the operator RPC
//!   surface (shared with the CLI client)
//! - [`state`]: the shared control-plane state handle

#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod http;
pub mod protocol;
pub mod state;
