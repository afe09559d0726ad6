//! Breakpoint records and the in-memory breakpoint registry.
//!
//! A breakpoint is a declarative rule: when a request observed at a sidecar
//! matches the rule's service, endpoint, and condition predicates, the
//! control plane freezes the owning trace. Breakpoints live only in memory;
//! they do not survive a daemon restart.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Errors returned by [`BreakpointRegistry`] operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// The breakpoint id does not exist in the registry.
    #[error("breakpoint not found: {id}")]
    NotFound {
        /// The id that was looked up.
        id: String,
    },
}

/// A registered breakpoint.
///
/// The `endpoint` field is matched by substring containment against the
/// observed request path, so `/order` fires on `/api/order/123`. Conditions
/// are exact string equality checks against the unified keyspace built by
/// [`crate::matcher::Keyspace`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    /// Unique, stable identifier generated at registration time.
    pub id: String,

    /// Target service name (exact match against the request authority).
    pub service_name: String,

    /// Target endpoint fragment (substring match against the request path).
    pub endpoint: String,

    /// Condition predicates: keyspace key to expected value.
    pub conditions: BTreeMap<String, String>,

    /// Disabled breakpoints are skipped during evaluation.
    pub enabled: bool,

    /// When the breakpoint was registered.
    pub created_at: DateTime<Utc>,
}

/// In-memory registry of breakpoints keyed by generated id.
///
/// Duplicate `(service, endpoint, conditions)` tuples may coexist under
/// distinct ids; they fire identically. All operations are constant-time
/// except [`list`](Self::list), which is O(n).
#[derive(Debug, Default)]
pub struct BreakpointRegistry {
    inner: RwLock<HashMap<String, Breakpoint>>,
}

impl BreakpointRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new breakpoint and returns the stored record.
    ///
    /// The breakpoint is enabled immediately; there is no staged state.
    pub fn register(
        &self,
        service_name: impl Into<String>,
        endpoint: impl Into<String>,
        conditions: BTreeMap<String, String>,
    ) -> Breakpoint {
        let breakpoint = Breakpoint {
            id: Uuid::new_v4().to_string(),
            service_name: service_name.into(),
            endpoint: endpoint.into(),
            conditions,
            enabled: true,
            created_at: Utc::now(),
        };

        let mut inner = self.inner.write().expect("breakpoint registry poisoned");
        inner.insert(breakpoint.id.clone(), breakpoint.clone());
        drop(inner);

        tracing::info!(
            breakpoint_id = %breakpoint.id,
            service = %breakpoint.service_name,
            endpoint = %breakpoint.endpoint,
            conditions = breakpoint.conditions.len(),
            "Registered breakpoint"
        );

        breakpoint
    }

    /// Returns every registered breakpoint.
    ///
    /// Ordering is unspecified.
    #[must_use]
    pub fn list(&self) -> Vec<Breakpoint> {
        let inner = self.inner.read().expect("breakpoint registry poisoned");
        inner.values().cloned().collect()
    }

    /// Deletes a breakpoint by id.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if no breakpoint has that id.
    pub fn delete(&self, id: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().expect("breakpoint registry poisoned");
        if inner.remove(id).is_none() {
            return Err(RegistryError::NotFound { id: id.to_string() });
        }
        drop(inner);

        tracing::info!(breakpoint_id = %id, "Deleted breakpoint");
        Ok(())
    }

    /// Returns the number of registered breakpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().expect("breakpoint registry poisoned").len()
    }

    /// Returns `true` if no breakpoints are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conditions(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_register_then_list_round_trip() {
        let registry = BreakpointRegistry::new();
        let bp = registry.register("service-a", "/order", conditions(&[("body.amount", "999")]));

        let listed = registry.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0], bp);
        assert!(listed[0].enabled);
    }

    #[test]
    fn test_delete_removes_breakpoint() {
        let registry = BreakpointRegistry::new();
        let bp = registry.register("service-a", "/order", BTreeMap::new());

        registry.delete(&bp.id).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_delete_unknown_id_reports_not_found() {
        let registry = BreakpointRegistry::new();
        let err = registry.delete("no-such-id").unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { id } if id == "no-such-id"));
    }

    #[test]
    fn test_duplicate_tuples_coexist_under_distinct_ids() {
        let registry = BreakpointRegistry::new();
        let conds = conditions(&[("header.user-type", "vip")]);
        let a = registry.register("service-a", "/order", conds.clone());
        let b = registry.register("service-a", "/order", conds);

        assert_ne!(a.id, b.id);
        assert_eq!(registry.len(), 2);
    }
}
