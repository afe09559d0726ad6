//! The freeze lifecycle: registry, state machine, and coordinator.
//!
//! A freeze is the control plane's authoritative decision to suspend every
//! request belonging to one trace at the sidecars. The coordinator owns the
//! full lifecycle:
//!
//! ```text
//!   preparing ──> frozen ──> releasing ──> completed
//!       │           │
//!       └───────────┴──> failed
//! ```
//!
//! Transitions are forward-only and validated explicitly; an illegal jump
//! is a structured error, never a silent coercion. `preparing` is transient:
//! the sidecar polling protocol needs no per-service acknowledgement phase,
//! so a freeze enters `frozen` as soon as its registry insert lands.
//!
//! # Lifecycle ownership
//!
//! Exactly one spawned task per freeze owns its timers: the timeout that
//! auto-releases an abandoned freeze and the post-release grace period
//! after which the record (and any unconsumed override) is purged. State
//! transitions themselves happen synchronously under the registry lock so
//! callers observe them immediately.
//!
//! # Release grace
//!
//! A released freeze stays in the registry, in a terminal state, for a
//! short grace period. A sidecar long-poll issued just before the release
//! still finds the trace known (so breakpoint matching will not re-freeze
//! it) and reads `allow` together with any pending override.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Notify;

use crate::events::{EventBus, TraceEvent};

/// Default freeze timeout applied when the operator does not choose one.
pub const DEFAULT_FREEZE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default grace period between release and record deletion.
///
/// Must exceed the sidecar's `/check` dispatch timeout plus expected RTT,
/// so the last poll issued before the release can still pick up its
/// override.
pub const DEFAULT_RELEASE_GRACE: Duration = Duration::from_secs(5);

/// Errors returned by freeze operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FreezeError {
    /// A freeze already exists for this trace.
    #[error("trace {trace_id} already has an active freeze")]
    AlreadyFrozen {
        /// The conflicting trace id.
        trace_id: String,
    },

    /// No freeze record exists for this trace.
    #[error("trace {trace_id} is not frozen")]
    NotFound {
        /// The trace id that was looked up.
        trace_id: String,
    },

    /// The freeze exists but is not in the state the operation requires.
    #[error("trace {trace_id} is not in frozen state (current: {state})")]
    NotFrozen {
        /// The trace id.
        trace_id: String,
        /// The state the record was found in.
        state: FreezeState,
    },

    /// Attempted an illegal state machine transition.
    #[error("illegal freeze transition from {from} to {to}")]
    InvalidTransition {
        /// State the freeze was in.
        from: FreezeState,
        /// State the caller attempted to reach.
        to: FreezeState,
    },
}

/// Freeze lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreezeState {
    /// Inserted but not yet authoritative. Transient in this protocol.
    Preparing,
    /// Sidecars answering `/check` for this trace are told to hold.
    Frozen,
    /// Release in progress.
    Releasing,
    /// Released; record lingers only for the grace period.
    Completed,
    /// Aborted by an internal error.
    Failed,
}

impl FreezeState {
    /// Returns `true` while the freeze actually suspends traffic.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Preparing | Self::Frozen)
    }

    /// Wire/display name of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Preparing => "preparing",
            Self::Frozen => "frozen",
            Self::Releasing => "releasing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for FreezeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What initiated a freeze.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FreezeOrigin {
    /// Explicit operator request.
    Manual,
    /// A breakpoint's conditions matched; carries the breakpoint id.
    Breakpoint(String),
}

impl FreezeOrigin {
    /// Wire label: `manual` or the initiating breakpoint id.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Manual => "manual",
            Self::Breakpoint(id) => id,
        }
    }
}

impl fmt::Display for FreezeOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One freeze record.
#[derive(Debug, Clone)]
pub struct TraceFreeze {
    /// The frozen trace.
    pub trace_id: String,

    /// Services the freeze was requested for. Informational only: the
    /// polling protocol freezes whichever sidecar asks about the trace.
    pub services: Vec<String>,

    /// Current lifecycle state.
    pub state: FreezeState,

    /// What initiated the freeze.
    pub origin: FreezeOrigin,

    /// When the record was inserted.
    pub prepared_at: DateTime<Utc>,

    /// When the freeze became authoritative.
    pub frozen_at: Option<DateTime<Utc>>,

    /// When release began.
    pub released_at: Option<DateTime<Utc>>,

    /// Auto-release deadline measured from `frozen_at`.
    pub timeout: Duration,
}

impl TraceFreeze {
    fn new(
        trace_id: String,
        services: Vec<String>,
        origin: FreezeOrigin,
        timeout: Duration,
    ) -> Self {
        Self {
            trace_id,
            services,
            state: FreezeState::Preparing,
            origin,
            prepared_at: Utc::now(),
            frozen_at: None,
            released_at: None,
            timeout,
        }
    }

    /// Advances the state machine, recording transition timestamps.
    ///
    /// # Errors
    ///
    /// Returns [`FreezeError::InvalidTransition`] for any jump outside the
    /// lifecycle diagram.
    pub fn advance(&mut self, next: FreezeState) -> Result<(), FreezeError> {
        use FreezeState::{Completed, Failed, Frozen, Preparing, Releasing};

        let legal = matches!(
            (self.state, next),
            (Preparing, Frozen)
                | (Frozen, Releasing)
                | (Releasing, Completed)
                | (Preparing | Frozen, Failed)
        );
        if !legal {
            return Err(FreezeError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        match next {
            Frozen => self.frozen_at = Some(Utc::now()),
            Releasing => self.released_at = Some(Utc::now()),
            _ => {}
        }
        self.state = next;
        Ok(())
    }
}

/// Tunables for the coordinator.
#[derive(Debug, Clone, Copy)]
pub struct FreezeConfig {
    /// Timeout after which a freeze auto-releases.
    pub timeout: Duration,

    /// Grace period a released record stays reachable for late polls.
    pub release_grace: Duration,
}

impl Default for FreezeConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_FREEZE_TIMEOUT,
            release_grace: DEFAULT_RELEASE_GRACE,
        }
    }
}

struct FreezeEntry {
    record: TraceFreeze,
    released: Arc<Notify>,
}

/// Owns every freeze record, pending override, and lifecycle timer.
///
/// Cheap to clone: all clones share one registry. At most one freeze
/// exists per trace id at any instant; a trace id absent from the
/// registry is simply "not frozen".
#[derive(Clone)]
pub struct FreezeCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    config: FreezeConfig,
    bus: Arc<EventBus>,
    freezes: RwLock<HashMap<String, FreezeEntry>>,
    overrides: RwLock<HashMap<String, String>>,
}

impl FreezeCoordinator {
    /// Creates a coordinator publishing lifecycle events to `bus`.
    #[must_use]
    pub fn new(config: FreezeConfig, bus: Arc<EventBus>) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                config,
                bus,
                freezes: RwLock::new(HashMap::new()),
                overrides: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Initiates a freeze for a trace.
    ///
    /// The record enters `frozen` before this returns; the `frozen`
    /// lifecycle event is broadcast and the freeze's timer task spawned.
    /// Concurrent initiations for one trace see exactly one winner.
    ///
    /// # Errors
    ///
    /// Returns [`FreezeError::AlreadyFrozen`] when any record (active or
    /// in its grace window) exists for the trace.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime: the lifecycle task is
    /// spawned onto the ambient runtime.
    pub fn initiate(
        &self,
        trace_id: &str,
        services: Vec<String>,
        origin: FreezeOrigin,
    ) -> Result<TraceFreeze, FreezeError> {
        let released = Arc::new(Notify::new());
        let record = {
            let mut freezes = self.inner.freezes.write().expect("freeze registry poisoned");
            if freezes.contains_key(trace_id) {
                return Err(FreezeError::AlreadyFrozen {
                    trace_id: trace_id.to_string(),
                });
            }

            let mut record = TraceFreeze::new(
                trace_id.to_string(),
                services,
                origin,
                self.inner.config.timeout,
            );
            record.advance(FreezeState::Frozen)?;

            freezes.insert(
                trace_id.to_string(),
                FreezeEntry {
                    record: record.clone(),
                    released: Arc::clone(&released),
                },
            );
            record
        };

        tracing::info!(
            trace_id = %record.trace_id,
            origin = %record.origin,
            services = ?record.services,
            timeout = ?record.timeout,
            "Trace frozen"
        );
        self.inner
            .bus
            .publish(&TraceEvent::freeze_lifecycle(trace_id, "frozen"));
        spawn_lifecycle(
            Arc::clone(&self.inner),
            record.trace_id.clone(),
            released,
            record.timeout,
        );

        Ok(record)
    }

    /// Releases a frozen trace, optionally storing a body override.
    ///
    /// The override, if any, is visible to `/check` polls before the state
    /// leaves `frozen`, so a poll can never observe "not frozen" without
    /// also being able to collect the override. The record itself lingers
    /// until the grace period elapses.
    ///
    /// # Errors
    ///
    /// Returns [`FreezeError::NotFound`] for unknown traces and
    /// [`FreezeError::NotFrozen`] when the record is already past `frozen`
    /// (double release, or release racing the timeout).
    pub fn release(&self, trace_id: &str, override_body: Option<String>) -> Result<(), FreezeError> {
        self.inner.release(trace_id, override_body)
    }

    /// Aborts a freeze after an internal error.
    ///
    /// The record transitions to `failed`, the `failed` lifecycle event is
    /// broadcast, and the record is removed immediately.
    ///
    /// # Errors
    ///
    /// Returns [`FreezeError::NotFound`] for unknown traces and
    /// [`FreezeError::NotFrozen`] when the record is already terminal.
    pub fn abort(&self, trace_id: &str, reason: &str) -> Result<(), FreezeError> {
        let released = {
            let mut freezes = self.inner.freezes.write().expect("freeze registry poisoned");
            let entry = freezes
                .get_mut(trace_id)
                .ok_or_else(|| FreezeError::NotFound {
                    trace_id: trace_id.to_string(),
                })?;

            if !entry.record.state.is_active() {
                return Err(FreezeError::NotFrozen {
                    trace_id: trace_id.to_string(),
                    state: entry.record.state,
                });
            }

            entry.record.advance(FreezeState::Failed)?;
            let entry = freezes.remove(trace_id).expect("entry present");
            entry.released
        };
        self.inner
            .overrides
            .write()
            .expect("override map poisoned")
            .remove(trace_id);

        tracing::error!(trace_id = %trace_id, reason = %reason, "Freeze aborted");
        self.inner
            .bus
            .publish(&TraceEvent::freeze_lifecycle(trace_id, "failed"));
        released.notify_one();

        Ok(())
    }

    /// Releases every active freeze and removes those records immediately.
    ///
    /// Grace periods are skipped for the released freezes: the emergency
    /// path favors an immediately-empty active set over override delivery.
    /// Records already in their post-release grace window, and any pending
    /// overrides belonging to other traces, are left untouched. Returns
    /// the number of active freezes released.
    pub fn emergency_release(&self) -> usize {
        let drained = {
            let mut freezes = self.inner.freezes.write().expect("freeze registry poisoned");
            let active: Vec<String> = freezes
                .iter()
                .filter(|(_, entry)| entry.record.state.is_active())
                .map(|(trace_id, _)| trace_id.clone())
                .collect();

            let mut drained = Vec::with_capacity(active.len());
            for trace_id in active {
                let mut entry = freezes.remove(&trace_id).expect("entry present");
                entry.record.advance(FreezeState::Releasing).ok();
                entry.record.advance(FreezeState::Completed).ok();
                drained.push((trace_id, entry.released));
            }
            drained
        };
        {
            let mut overrides = self.inner.overrides.write().expect("override map poisoned");
            for (trace_id, _) in &drained {
                overrides.remove(trace_id);
            }
        }

        tracing::warn!(count = drained.len(), "Emergency release of all freezes");
        for (trace_id, released) in &drained {
            self.inner
                .bus
                .publish(&TraceEvent::freeze_lifecycle(trace_id, "released"));
            released.notify_one();
        }

        drained.len()
    }

    /// Returns `true` iff the trace has a freeze in state `frozen`.
    #[must_use]
    pub fn is_trace_frozen(&self, trace_id: &str) -> bool {
        self.inner
            .freezes
            .read()
            .expect("freeze registry poisoned")
            .get(trace_id)
            .is_some_and(|entry| entry.record.state == FreezeState::Frozen)
    }

    /// Returns `true` for traces in their post-release grace window.
    ///
    /// Such traces are excluded from breakpoint matching: the request that
    /// was just released would otherwise re-freeze on its next poll.
    #[must_use]
    pub fn is_trace_released(&self, trace_id: &str) -> bool {
        self.inner
            .freezes
            .read()
            .expect("freeze registry poisoned")
            .get(trace_id)
            .is_some_and(|entry| !entry.record.state.is_active())
    }

    /// Fetches the freeze record for a trace, if one exists.
    #[must_use]
    pub fn status(&self, trace_id: &str) -> Option<TraceFreeze> {
        self.inner
            .freezes
            .read()
            .expect("freeze registry poisoned")
            .get(trace_id)
            .map(|entry| entry.record.clone())
    }

    /// Lists freezes that are currently suspending traffic.
    #[must_use]
    pub fn list_active(&self) -> Vec<TraceFreeze> {
        self.inner
            .freezes
            .read()
            .expect("freeze registry poisoned")
            .values()
            .filter(|entry| entry.record.state.is_active())
            .map(|entry| entry.record.clone())
            .collect()
    }

    /// Takes the pending override for a trace, at most once.
    ///
    /// Subsequent calls return `None` until another release stores one.
    #[must_use]
    pub fn pop_override(&self, trace_id: &str) -> Option<String> {
        self.inner
            .overrides
            .write()
            .expect("override map poisoned")
            .remove(trace_id)
    }
}

impl fmt::Debug for FreezeCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FreezeCoordinator")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl CoordinatorInner {
    fn release(&self, trace_id: &str, override_body: Option<String>) -> Result<(), FreezeError> {
        let released = {
            let mut freezes = self.freezes.write().expect("freeze registry poisoned");
            let entry = freezes
                .get_mut(trace_id)
                .ok_or_else(|| FreezeError::NotFound {
                    trace_id: trace_id.to_string(),
                })?;

            if entry.record.state != FreezeState::Frozen {
                return Err(FreezeError::NotFrozen {
                    trace_id: trace_id.to_string(),
                    state: entry.record.state,
                });
            }

            if let Some(body) = override_body.filter(|body| !body.is_empty()) {
                self.overrides
                    .write()
                    .expect("override map poisoned")
                    .insert(trace_id.to_string(), body);
            }

            entry.record.advance(FreezeState::Releasing)?;
            entry.record.advance(FreezeState::Completed)?;
            Arc::clone(&entry.released)
        };

        tracing::info!(trace_id = %trace_id, "Trace released");
        self.bus
            .publish(&TraceEvent::freeze_lifecycle(trace_id, "released"));
        released.notify_one();

        Ok(())
    }

    /// Drops the record and any unconsumed override after the grace period.
    fn purge(&self, trace_id: &str) {
        let removed = self
            .freezes
            .write()
            .expect("freeze registry poisoned")
            .remove(trace_id)
            .is_some();
        let stale_override = self
            .overrides
            .write()
            .expect("override map poisoned")
            .remove(trace_id)
            .is_some();

        if removed {
            tracing::debug!(trace_id = %trace_id, "Purged freeze record after grace period");
        }
        if stale_override {
            tracing::debug!(trace_id = %trace_id, "Discarded unconsumed release override");
        }
    }
}

/// Spawns the single task owning one freeze's timers.
fn spawn_lifecycle(
    inner: Arc<CoordinatorInner>,
    trace_id: String,
    released: Arc<Notify>,
    timeout: Duration,
) {
    tokio::spawn(async move {
        tokio::select! {
            () = released.notified() => {}
            () = tokio::time::sleep(timeout) => {
                tracing::warn!(
                    trace_id = %trace_id,
                    timeout = ?timeout,
                    "Freeze timeout elapsed, auto-releasing"
                );
                if let Err(error) = inner.release(&trace_id, None) {
                    tracing::debug!(trace_id = %trace_id, %error, "Timeout release skipped");
                }
            }
        }

        tokio::time::sleep(inner.config.release_grace).await;
        inner.purge(&trace_id);
    });
}
