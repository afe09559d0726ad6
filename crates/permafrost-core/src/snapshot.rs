//! Snapshot stores: captured per-trace state and its derived views.
//!
//! Two kinds of snapshot exist:
//!
//! - **Network snapshots** are captured by the sidecar at the moment a
//!   request is first told to freeze: the request line and the raw body.
//!   One per trace, first write wins.
//! - **Application snapshots** are pushed by instrumented services at
//!   named checkpoints: local variables and a stack trace. Many per trace,
//!   stored in arrival order to reconstruct the hop journey.
//!
//! The topology view and the service health summary are both derived from
//! the application snapshot table; nothing else feeds them.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// The request line and body captured at a sidecar when a freeze hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    /// Trace the snapshot belongs to.
    pub trace_id: String,

    /// Service name, derived from the request authority at the sidecar.
    pub service_name: String,

    /// Request line in `<METHOD> <PATH>` form.
    #[serde(default)]
    pub method: String,

    /// Raw request body at the moment of freeze.
    #[serde(default)]
    pub body: String,
}

/// An application-level checkpoint pushed by an instrumented service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSnapshot {
    /// Trace the checkpoint belongs to.
    pub trace_id: String,

    /// Service that captured the checkpoint.
    pub service_name: String,

    /// Checkpoint name chosen by the instrumentation call site.
    #[serde(default)]
    pub checkpoint: String,

    /// Textual stack trace at capture time.
    #[serde(default)]
    pub stack_trace: String,

    /// Captured locals; values arrive as arbitrary JSON.
    #[serde(default)]
    pub local_variables: BTreeMap<String, serde_json::Value>,

    /// RFC3339 timestamp as reported by the capturing service.
    #[serde(default)]
    pub timestamp: String,
}

impl AppSnapshot {
    /// Stringifies the captured locals for display and RPC transport.
    ///
    /// JSON strings render without quotes; everything else uses its JSON
    /// text form.
    #[must_use]
    pub fn stringified_locals(&self) -> BTreeMap<String, String> {
        self.local_variables
            .iter()
            .map(|(key, value)| {
                let rendered = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), rendered)
            })
            .collect()
    }
}

/// A directed service-to-service link derived from the hop journey.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopologyLink {
    /// Upstream service.
    pub source: String,
    /// Downstream service.
    pub target: String,
}

/// In-memory store for both snapshot kinds.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    network: RwLock<HashMap<String, NetworkSnapshot>>,
    application: RwLock<HashMap<String, Vec<AppSnapshot>>>,
}

impl SnapshotStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a network snapshot; the first write for a trace wins.
    ///
    /// Returns `false` when a snapshot already existed for the trace (the
    /// new one is discarded).
    pub fn record_network(&self, snapshot: NetworkSnapshot) -> bool {
        let mut network = self.network.write().expect("snapshot store poisoned");
        if network.contains_key(&snapshot.trace_id) {
            return false;
        }

        tracing::info!(
            trace_id = %snapshot.trace_id,
            service = %snapshot.service_name,
            body_bytes = snapshot.body.len(),
            "Captured network snapshot"
        );
        network.insert(snapshot.trace_id.clone(), snapshot);
        true
    }

    /// Fetches the network snapshot for a trace, if one was captured.
    #[must_use]
    pub fn network(&self, trace_id: &str) -> Option<NetworkSnapshot> {
        self.network
            .read()
            .expect("snapshot store poisoned")
            .get(trace_id)
            .cloned()
    }

    /// Appends an application snapshot to the trace's hop journey.
    pub fn record_application(&self, snapshot: AppSnapshot) {
        tracing::info!(
            trace_id = %snapshot.trace_id,
            service = %snapshot.service_name,
            checkpoint = %snapshot.checkpoint,
            locals = snapshot.local_variables.len(),
            "Captured application snapshot"
        );

        let mut application = self.application.write().expect("snapshot store poisoned");
        application
            .entry(snapshot.trace_id.clone())
            .or_default()
            .push(snapshot);
    }

    /// Returns the hop journey for a trace in arrival order.
    #[must_use]
    pub fn application(&self, trace_id: &str) -> Vec<AppSnapshot> {
        self.application
            .read()
            .expect("snapshot store poisoned")
            .get(trace_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Derives the deduplicated service topology from every hop journey.
    ///
    /// Consecutive snapshot pairs within a trace yield `source -> target`
    /// links; self-links are skipped. Links are returned in first-seen
    /// order.
    #[must_use]
    pub fn topology(&self) -> Vec<TopologyLink> {
        let application = self.application.read().expect("snapshot store poisoned");

        let mut seen = HashSet::new();
        let mut links = Vec::new();
        for snapshots in application.values() {
            for pair in snapshots.windows(2) {
                let source = &pair[0].service_name;
                let target = &pair[1].service_name;
                if source == target {
                    continue;
                }

                let link = TopologyLink {
                    source: source.clone(),
                    target: target.clone(),
                };
                if seen.insert(link.clone()) {
                    links.push(link);
                }
            }
        }

        links
    }

    /// Returns every service that has pushed at least one snapshot.
    #[must_use]
    pub fn observed_services(&self) -> BTreeSet<String> {
        let application = self.application.read().expect("snapshot store poisoned");
        application
            .values()
            .flatten()
            .map(|snap| snap.service_name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app_snapshot(trace: &str, service: &str, checkpoint: &str) -> AppSnapshot {
        AppSnapshot {
            trace_id: trace.to_string(),
            service_name: service.to_string(),
            checkpoint: checkpoint.to_string(),
            stack_trace: String::new(),
            local_variables: BTreeMap::new(),
            timestamp: String::new(),
        }
    }

    #[test]
    fn test_network_snapshot_first_write_wins() {
        let store = SnapshotStore::new();
        let first = NetworkSnapshot {
            trace_id: "t1".to_string(),
            service_name: "service-a".to_string(),
            method: "POST /order".to_string(),
            body: r#"{"amount":999}"#.to_string(),
        };
        let mut second = first.clone();
        second.body = "overwritten".to_string();

        assert!(store.record_network(first.clone()));
        assert!(!store.record_network(second));
        assert_eq!(store.network("t1").unwrap(), first);
    }

    #[test]
    fn test_application_snapshots_keep_arrival_order() {
        let store = SnapshotStore::new();
        store.record_application(app_snapshot("t1", "service-a", "entry"));
        store.record_application(app_snapshot("t1", "service-b", "validate"));
        store.record_application(app_snapshot("t1", "service-c", "persist"));

        let journey: Vec<_> = store
            .application("t1")
            .into_iter()
            .map(|s| s.service_name)
            .collect();
        assert_eq!(journey, ["service-a", "service-b", "service-c"]);
    }

    #[test]
    fn test_topology_dedupes_and_skips_self_links() {
        let store = SnapshotStore::new();
        for trace in ["t1", "t2"] {
            store.record_application(app_snapshot(trace, "service-a", "entry"));
            store.record_application(app_snapshot(trace, "service-a", "again"));
            store.record_application(app_snapshot(trace, "service-b", "work"));
        }

        let links = store.topology();
        assert_eq!(
            links,
            [TopologyLink {
                source: "service-a".to_string(),
                target: "service-b".to_string(),
            }]
        );
    }

    #[test]
    fn test_unknown_trace_reads_are_empty() {
        let store = SnapshotStore::new();
        assert!(store.network("missing").is_none());
        assert!(store.application("missing").is_empty());
    }

    #[test]
    fn test_stringified_locals_render_scalars_bare() {
        let mut snapshot = app_snapshot("t1", "service-a", "entry");
        snapshot
            .local_variables
            .insert("order_id".to_string(), serde_json::json!("ORD-1"));
        snapshot
            .local_variables
            .insert("amount".to_string(), serde_json::json!(999));

        let locals = snapshot.stringified_locals();
        assert_eq!(locals.get("order_id").unwrap(), "ORD-1");
        assert_eq!(locals.get("amount").unwrap(), "999");
    }
}
