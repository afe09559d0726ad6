//! Shared control-plane state.
//!
//! One [`ControlPlane`] instance is built at startup and shared by every
//! HTTP handler and RPC connection. The contained components each guard
//! their own state; nothing here takes a lock across component boundaries.

use std::sync::Arc;

use permafrost_core::breakpoint::BreakpointRegistry;
use permafrost_core::events::EventBus;
use permafrost_core::freeze::{FreezeConfig, FreezeCoordinator};
use permafrost_core::snapshot::SnapshotStore;

/// Shared handle to the control plane.
pub type SharedPlane = Arc<ControlPlane>;

/// The control plane's long-lived components.
pub struct ControlPlane {
    /// Registered breakpoints.
    pub breakpoints: BreakpointRegistry,

    /// Freeze registry, overrides, and lifecycle timers.
    pub freezes: FreezeCoordinator,

    /// Network and application snapshots.
    pub snapshots: SnapshotStore,

    /// Fan-out of live trace and freeze lifecycle events.
    pub events: Arc<EventBus>,
}

impl ControlPlane {
    /// Builds the control plane with the given freeze tunables.
    #[must_use]
    pub fn new(freeze_config: FreezeConfig) -> SharedPlane {
        let events = Arc::new(EventBus::default());
        Arc::new(Self {
            breakpoints: BreakpointRegistry::new(),
            freezes: FreezeCoordinator::new(freeze_config, Arc::clone(&events)),
            snapshots: SnapshotStore::new(),
            events,
        })
    }
}
