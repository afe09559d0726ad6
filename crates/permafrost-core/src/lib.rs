//! # permafrost-core
//!
//! Core library for permafrost - coordinated, trace-scoped request freezing
//! ("distributed breakpoints") for a service mesh.
//!
//! This crate holds the control plane's domain logic and owns no sockets:
//!
//! - **Breakpoints**: declarative matching rules registered by operators
//! - **Freezes**: the per-trace suspension lifecycle and its state machine
//! - **Matching**: condition evaluation over request headers and JSON bodies
//! - **Snapshots**: captured transport- and application-level state per trace
//! - **Events**: non-blocking fan-out of live trace activity to watchers
//!
//! The daemon crate wires these pieces to its HTTP and RPC surfaces; the
//! sidecar filter only ever sees the wire contracts, never these types.
//!
//! ## Example
//!
//! ```rust
//! use std::collections::BTreeMap;
//!
//! use permafrost_core::breakpoint::BreakpointRegistry;
//!
//! let registry = BreakpointRegistry::new();
//! let mut conditions = BTreeMap::new();
//! conditions.insert("body.amount".to_string(), "999".to_string());
//! let bp = registry.register("checkout", "/order", conditions);
//! assert!(registry.delete(&bp.id).is_ok());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod breakpoint;
pub mod events;
pub mod freeze;
pub mod matcher;
pub mod snapshot;

pub use breakpoint::{Breakpoint, BreakpointRegistry, RegistryError};
pub use events::{EventBus, Subscription, TraceEvent};
pub use freeze::{FreezeConfig, FreezeCoordinator, FreezeError, FreezeOrigin, FreezeState, TraceFreeze};
pub use matcher::Keyspace;
pub use snapshot::{AppSnapshot, NetworkSnapshot, SnapshotStore, TopologyLink};
