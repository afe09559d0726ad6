//! Control protocol message types.
//!
//! Hand-written prost derives; there is no protoc step. Field tags are
//! frozen - append new fields, never renumber. Map fields use `BTreeMap`
//! so encodings are deterministic.
//!
//! Every response carries its business outcome in a `{success, message}`
//! envelope. Protocol-level failures (undecodable frames, unknown tags)
//! use [`ControlError`] on wire tag `0` instead.

use std::collections::BTreeMap;

// ============================================================================
// Message type tags (for routing)
// ============================================================================

/// Tag bytes identifying control operations on the wire.
///
/// Requests and their responses share a tag; `TraceEventFrame`s pushed by
/// a trace stream are tagged [`Self::StreamTraces`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlMessageType {
    /// Register a breakpoint.
    RegisterBreakpoint = 1,
    /// List all breakpoints.
    ListBreakpoints = 2,
    /// Delete a breakpoint by id.
    DeleteBreakpoint = 3,
    /// Open a server-streaming trace event subscription.
    StreamTraces = 4,
    /// Manually freeze a trace.
    FreezeTrace = 5,
    /// Release a frozen trace, optionally with a body override.
    ReleaseTrace = 6,
    /// Fetch one freeze's status.
    GetFreezeStatus = 7,
    /// List active freezes.
    ListActiveFreezes = 8,
    /// Fetch a trace's network snapshot.
    GetSnapshot = 9,
    /// Fetch a trace's application snapshots.
    GetAppSnapshot = 10,
    /// Release every active freeze.
    EmergencyRelease = 11,
    /// Control-plane and per-service health.
    GetSystemHealth = 12,
    /// Derived service topology.
    GetTopology = 13,
}

impl ControlMessageType {
    /// Parses a tag byte.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::RegisterBreakpoint),
            2 => Some(Self::ListBreakpoints),
            3 => Some(Self::DeleteBreakpoint),
            4 => Some(Self::StreamTraces),
            5 => Some(Self::FreezeTrace),
            6 => Some(Self::ReleaseTrace),
            7 => Some(Self::GetFreezeStatus),
            8 => Some(Self::ListActiveFreezes),
            9 => Some(Self::GetSnapshot),
            10 => Some(Self::GetAppSnapshot),
            11 => Some(Self::EmergencyRelease),
            12 => Some(Self::GetSystemHealth),
            13 => Some(Self::GetTopology),
            _ => None,
        }
    }

    /// The wire tag for this operation.
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }
}

/// Wire tag carrying [`ControlError`] payloads.
pub const ERROR_TAG: u8 = 0;

// ============================================================================
// Protocol-level errors
// ============================================================================

/// Classifies a protocol-level error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ControlErrorCode {
    /// Unclassified.
    Unknown = 0,
    /// The frame could not be decoded.
    MalformedFrame = 1,
    /// The tag byte named no known operation.
    UnsupportedMessage = 2,
    /// The handler failed unexpectedly; the daemon keeps running.
    Internal = 3,
}

/// Protocol-level error payload (wire tag `0`).
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ControlError {
    /// Error classification, see [`ControlErrorCode`].
    #[prost(enumeration = "ControlErrorCode", tag = "1")]
    pub code: i32,
    /// Human-readable description.
    #[prost(string, tag = "2")]
    pub message: String,
}

// ============================================================================
// Breakpoints
// ============================================================================

/// Registers a breakpoint.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RegisterBreakpointRequest {
    /// Target service name (exact match).
    #[prost(string, tag = "1")]
    pub service_name: String,
    /// Target endpoint fragment (substring match).
    #[prost(string, tag = "2")]
    pub endpoint: String,
    /// Condition predicates over the unified keyspace.
    #[prost(btree_map = "string, string", tag = "3")]
    pub conditions: BTreeMap<String, String>,
}

/// Result of a breakpoint registration.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RegisterBreakpointResponse {
    /// Generated breakpoint id (empty on failure).
    #[prost(string, tag = "1")]
    pub breakpoint_id: String,
    /// Whether registration succeeded.
    #[prost(bool, tag = "2")]
    pub success: bool,
    /// Human-readable outcome.
    #[prost(string, tag = "3")]
    pub message: String,
}

/// Lists every registered breakpoint.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct ListBreakpointsRequest {}

/// One registered breakpoint.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BreakpointRecord {
    /// Unique id.
    #[prost(string, tag = "1")]
    pub id: String,
    /// Target service name.
    #[prost(string, tag = "2")]
    pub service_name: String,
    /// Target endpoint fragment.
    #[prost(string, tag = "3")]
    pub endpoint: String,
    /// Condition predicates.
    #[prost(btree_map = "string, string", tag = "4")]
    pub conditions: BTreeMap<String, String>,
    /// Whether the breakpoint fires.
    #[prost(bool, tag = "5")]
    pub enabled: bool,
    /// Registration time, unix seconds.
    #[prost(int64, tag = "6")]
    pub created_at: i64,
}

/// Every registered breakpoint.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListBreakpointsResponse {
    /// The registered breakpoints, unordered.
    #[prost(message, repeated, tag = "1")]
    pub breakpoints: Vec<BreakpointRecord>,
}

/// Deletes a breakpoint.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteBreakpointRequest {
    /// Id to delete.
    #[prost(string, tag = "1")]
    pub breakpoint_id: String,
}

/// Result of a breakpoint deletion.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteBreakpointResponse {
    /// `false` when the id was unknown.
    #[prost(bool, tag = "1")]
    pub success: bool,
    /// Human-readable outcome.
    #[prost(string, tag = "2")]
    pub message: String,
}

// ============================================================================
// Trace streaming
// ============================================================================

/// Opens a trace event stream on this connection.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct StreamTracesRequest {}

/// One live trace event.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TraceEventFrame {
    /// Trace the event belongs to.
    #[prost(string, tag = "1")]
    pub trace_id: String,
    /// Observing service.
    #[prost(string, tag = "2")]
    pub service_name: String,
    /// Observed endpoint.
    #[prost(string, tag = "3")]
    pub endpoint: String,
    /// Unix seconds.
    #[prost(int64, tag = "4")]
    pub timestamp: i64,
    /// Optional attributes (`freeze_status` on lifecycle events).
    #[prost(btree_map = "string, string", tag = "5")]
    pub attributes: BTreeMap<String, String>,
}

// ============================================================================
// Freeze lifecycle
// ============================================================================

/// Manually freezes a trace.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FreezeTraceRequest {
    /// Trace to freeze.
    #[prost(string, tag = "1")]
    pub trace_id: String,
    /// Services the freeze is aimed at (informational).
    #[prost(string, repeated, tag = "2")]
    pub services: Vec<String>,
}

/// Result of a manual freeze.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FreezeTraceResponse {
    /// Whether the freeze was initiated.
    #[prost(bool, tag = "1")]
    pub success: bool,
    /// Human-readable outcome.
    #[prost(string, tag = "2")]
    pub message: String,
    /// Freeze state after the call (`frozen`, or `failed` on conflict).
    #[prost(string, tag = "3")]
    pub state: String,
}

/// Releases a frozen trace.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReleaseTraceRequest {
    /// Trace to release.
    #[prost(string, tag = "1")]
    pub trace_id: String,
    /// Optional replacement request body, applied by the sidecar.
    #[prost(string, tag = "2")]
    pub override_body: String,
}

/// Result of a release.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReleaseTraceResponse {
    /// Whether the release happened.
    #[prost(bool, tag = "1")]
    pub success: bool,
    /// Human-readable outcome.
    #[prost(string, tag = "2")]
    pub message: String,
}

/// Fetches one freeze's status.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetFreezeStatusRequest {
    /// Trace to look up.
    #[prost(string, tag = "1")]
    pub trace_id: String,
}

/// One freeze's status; `state` is `not_found` for unknown traces.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetFreezeStatusResponse {
    /// The queried trace id.
    #[prost(string, tag = "1")]
    pub trace_id: String,
    /// Lifecycle state, or `not_found`.
    #[prost(string, tag = "2")]
    pub state: String,
    /// Services the freeze was requested for.
    #[prost(string, repeated, tag = "3")]
    pub services: Vec<String>,
    /// When the freeze became authoritative, unix seconds (0 if never).
    #[prost(int64, tag = "4")]
    pub frozen_at: i64,
    /// `manual` or the initiating breakpoint id.
    #[prost(string, tag = "5")]
    pub origin: String,
}

/// Lists active freezes.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct ListActiveFreezesRequest {}

/// Summary of one active freeze.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FreezeInfo {
    /// Frozen trace id.
    #[prost(string, tag = "1")]
    pub trace_id: String,
    /// Lifecycle state.
    #[prost(string, tag = "2")]
    pub state: String,
    /// Services the freeze was requested for.
    #[prost(string, repeated, tag = "3")]
    pub services: Vec<String>,
    /// When the freeze became authoritative, unix seconds.
    #[prost(int64, tag = "4")]
    pub frozen_at: i64,
    /// `manual` or the initiating breakpoint id.
    #[prost(string, tag = "5")]
    pub origin: String,
}

/// Every freeze currently suspending traffic.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListActiveFreezesResponse {
    /// Active freezes, unordered.
    #[prost(message, repeated, tag = "1")]
    pub freezes: Vec<FreezeInfo>,
}

/// Releases every active freeze.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct EmergencyReleaseRequest {}

/// Result of an emergency release.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EmergencyReleaseResponse {
    /// Always `true`; the operation cannot partially fail.
    #[prost(bool, tag = "1")]
    pub success: bool,
    /// Number of freezes released.
    #[prost(uint32, tag = "2")]
    pub freed_count: u32,
    /// Human-readable outcome.
    #[prost(string, tag = "3")]
    pub message: String,
}

// ============================================================================
// Snapshots, health, topology
// ============================================================================

/// Fetches a trace's network snapshot.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetSnapshotRequest {
    /// Trace to look up.
    #[prost(string, tag = "1")]
    pub trace_id: String,
}

/// A stored network snapshot.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NetworkSnapshotRecord {
    /// Trace the snapshot belongs to.
    #[prost(string, tag = "1")]
    pub trace_id: String,
    /// Capturing service (request authority).
    #[prost(string, tag = "2")]
    pub service_name: String,
    /// Request line, `<METHOD> <PATH>`.
    #[prost(string, tag = "3")]
    pub method: String,
    /// Raw request body at freeze time.
    #[prost(string, tag = "4")]
    pub body: String,
}

/// Network snapshot lookup result.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetSnapshotResponse {
    /// `false` when no snapshot exists for the trace.
    #[prost(bool, tag = "1")]
    pub success: bool,
    /// Human-readable outcome.
    #[prost(string, tag = "2")]
    pub message: String,
    /// The snapshot, when found.
    #[prost(message, optional, tag = "3")]
    pub snapshot: Option<NetworkSnapshotRecord>,
}

/// Fetches a trace's hop journey.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetAppSnapshotRequest {
    /// Trace to look up.
    #[prost(string, tag = "1")]
    pub trace_id: String,
}

/// One application checkpoint, locals stringified for transport.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AppSnapshotRecord {
    /// Capturing service.
    #[prost(string, tag = "1")]
    pub service_name: String,
    /// Checkpoint name.
    #[prost(string, tag = "2")]
    pub checkpoint: String,
    /// Textual stack trace.
    #[prost(string, tag = "3")]
    pub stack_trace: String,
    /// Captured locals, stringified.
    #[prost(btree_map = "string, string", tag = "4")]
    pub local_variables: BTreeMap<String, String>,
    /// RFC3339 capture time as reported by the service.
    #[prost(string, tag = "5")]
    pub timestamp: String,
}

/// Hop journey lookup result.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetAppSnapshotResponse {
    /// `false` when the trace has no application snapshots.
    #[prost(bool, tag = "1")]
    pub success: bool,
    /// Checkpoints in arrival order.
    #[prost(message, repeated, tag = "2")]
    pub snapshots: Vec<AppSnapshotRecord>,
}

/// Fetches control-plane health.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct SystemHealthRequest {}

/// Control-plane and per-service health.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SystemHealthResponse {
    /// Overall verdict.
    #[prost(bool, tag = "1")]
    pub healthy: bool,
    /// Per-component status strings.
    #[prost(btree_map = "string, string", tag = "2")]
    pub component_status: BTreeMap<String, String>,
}

/// Fetches the derived service topology.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct TopologyRequest {}

/// One directed service link.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TopologyLinkRecord {
    /// Upstream service.
    #[prost(string, tag = "1")]
    pub source: String,
    /// Downstream service.
    #[prost(string, tag = "2")]
    pub target: String,
}

/// The derived service topology.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TopologyResponse {
    /// Deduplicated directed links.
    #[prost(message, repeated, tag = "1")]
    pub links: Vec<TopologyLinkRecord>,
}

#[cfg(test)]
mod tests {
    use prost::Message;

    use super::*;

    #[test]
    fn test_tag_round_trip_covers_every_operation() {
        for tag in 1..=13u8 {
            let msg_type = ControlMessageType::from_tag(tag).unwrap();
            assert_eq!(msg_type.tag(), tag);
        }
        assert!(ControlMessageType::from_tag(0).is_none());
        assert!(ControlMessageType::from_tag(14).is_none());
    }

    #[test]
    fn test_register_request_encodes_deterministically() {
        let mut request = RegisterBreakpointRequest {
            service_name: "service-a".to_string(),
            endpoint: "/order".to_string(),
            conditions: BTreeMap::new(),
        };
        request
            .conditions
            .insert("body.amount".to_string(), "999".to_string());
        request
            .conditions
            .insert("header.user-type".to_string(), "vip".to_string());

        let first = request.encode_to_vec();
        let second = request.clone().encode_to_vec();
        assert_eq!(first, second);

        let decoded = RegisterBreakpointRequest::decode(first.as_slice()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_optional_snapshot_field_round_trips() {
        let response = GetSnapshotResponse {
            success: true,
            message: String::new(),
            snapshot: Some(NetworkSnapshotRecord {
                trace_id: "t1".to_string(),
                service_name: "service-a".to_string(),
                method: "POST /order".to_string(),
                body: r#"{"amount":999}"#.to_string(),
            }),
        };

        let decoded = GetSnapshotResponse::decode(response.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, response);

        let empty = GetSnapshotResponse::decode(&b""[..]).unwrap();
        assert!(empty.snapshot.is_none());
    }
}
