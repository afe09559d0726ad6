//! Tag-routed dispatch of control requests.
//!
//! The dispatcher decodes one frame, runs the matching handler against the
//! shared plane, and produces a response frame. Handlers are synchronous:
//! every underlying operation is an in-memory registry access, so nothing
//! here awaits.
//!
//! Business failures - unknown trace, duplicate freeze, missing snapshot -
//! are reported through each response's `{success, message}` envelope and
//! never raise a protocol error. Protocol errors are reserved for frames
//! the daemon cannot interpret at all.

use bytes::Bytes;
use permafrost_core::events::TraceEvent;
use permafrost_core::freeze::{FreezeOrigin, TraceFreeze};
use prost::Message;
use tracing::{debug, warn};

use super::error::{ProtocolError, ProtocolResult};
use super::messages::{
    AppSnapshotRecord, BreakpointRecord, ControlError, ControlErrorCode, ControlMessageType,
    DeleteBreakpointRequest, DeleteBreakpointResponse, ERROR_TAG, EmergencyReleaseResponse,
    FreezeInfo, FreezeTraceRequest, FreezeTraceResponse, GetAppSnapshotRequest,
    GetAppSnapshotResponse, GetFreezeStatusRequest, GetFreezeStatusResponse, GetSnapshotRequest,
    GetSnapshotResponse, ListActiveFreezesResponse, ListBreakpointsResponse,
    NetworkSnapshotRecord, RegisterBreakpointRequest, RegisterBreakpointResponse,
    ReleaseTraceRequest, ReleaseTraceResponse, SystemHealthResponse, TopologyLinkRecord,
    TopologyResponse, TraceEventFrame,
};
use crate::state::SharedPlane;

/// A fully-formed response frame waiting to be encoded.
#[derive(Debug)]
pub enum ControlResponse {
    /// `RegisterBreakpoint` outcome.
    RegisterBreakpoint(RegisterBreakpointResponse),
    /// `ListBreakpoints` outcome.
    ListBreakpoints(ListBreakpointsResponse),
    /// `DeleteBreakpoint` outcome.
    DeleteBreakpoint(DeleteBreakpointResponse),
    /// `FreezeTrace` outcome.
    FreezeTrace(FreezeTraceResponse),
    /// `ReleaseTrace` outcome.
    ReleaseTrace(ReleaseTraceResponse),
    /// `GetFreezeStatus` outcome.
    FreezeStatus(GetFreezeStatusResponse),
    /// `ListActiveFreezes` outcome.
    ListActiveFreezes(ListActiveFreezesResponse),
    /// `GetSnapshot` outcome.
    Snapshot(GetSnapshotResponse),
    /// `GetAppSnapshot` outcome.
    AppSnapshot(GetAppSnapshotResponse),
    /// `EmergencyRelease` outcome.
    EmergencyRelease(EmergencyReleaseResponse),
    /// `GetSystemHealth` outcome.
    SystemHealth(SystemHealthResponse),
    /// `GetTopology` outcome.
    Topology(TopologyResponse),
    /// Protocol-level error (wire tag `0`).
    Error(ControlError),
}

impl ControlResponse {
    /// Builds the error frame for a protocol-level failure.
    #[must_use]
    pub fn protocol_error(error: &ProtocolError) -> Self {
        let code = match error {
            ProtocolError::MalformedFrame { reason } if reason.starts_with("unknown") => {
                ControlErrorCode::UnsupportedMessage
            }
            ProtocolError::MalformedFrame { .. } | ProtocolError::FrameTooLarge { .. } => {
                ControlErrorCode::MalformedFrame
            }
            ProtocolError::Io(_) => ControlErrorCode::Internal,
        };
        Self::Error(ControlError {
            code: code.into(),
            message: error.to_string(),
        })
    }

    /// Encodes the response as `[tag][protobuf]`.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        fn framed(tag: u8, msg: &impl Message) -> Bytes {
            let mut buf = Vec::with_capacity(1 + msg.encoded_len());
            buf.push(tag);
            msg.encode(&mut buf).expect("vec write cannot fail");
            Bytes::from(buf)
        }

        match self {
            Self::RegisterBreakpoint(r) => framed(ControlMessageType::RegisterBreakpoint.tag(), r),
            Self::ListBreakpoints(r) => framed(ControlMessageType::ListBreakpoints.tag(), r),
            Self::DeleteBreakpoint(r) => framed(ControlMessageType::DeleteBreakpoint.tag(), r),
            Self::FreezeTrace(r) => framed(ControlMessageType::FreezeTrace.tag(), r),
            Self::ReleaseTrace(r) => framed(ControlMessageType::ReleaseTrace.tag(), r),
            Self::FreezeStatus(r) => framed(ControlMessageType::GetFreezeStatus.tag(), r),
            Self::ListActiveFreezes(r) => framed(ControlMessageType::ListActiveFreezes.tag(), r),
            Self::Snapshot(r) => framed(ControlMessageType::GetSnapshot.tag(), r),
            Self::AppSnapshot(r) => framed(ControlMessageType::GetAppSnapshot.tag(), r),
            Self::EmergencyRelease(r) => framed(ControlMessageType::EmergencyRelease.tag(), r),
            Self::SystemHealth(r) => framed(ControlMessageType::GetSystemHealth.tag(), r),
            Self::Topology(r) => framed(ControlMessageType::GetTopology.tag(), r),
            Self::Error(e) => framed(ERROR_TAG, e),
        }
    }
}

/// Encodes a live trace event as a stream frame.
#[must_use]
pub fn encode_trace_event(event: &TraceEvent) -> Bytes {
    let frame = TraceEventFrame {
        trace_id: event.trace_id.clone(),
        service_name: event.service_name.clone(),
        endpoint: event.endpoint.clone(),
        timestamp: event.timestamp,
        attributes: event.attributes.clone(),
    };
    let mut buf = Vec::with_capacity(1 + frame.encoded_len());
    buf.push(ControlMessageType::StreamTraces.tag());
    frame.encode(&mut buf).expect("vec write cannot fail");
    Bytes::from(buf)
}

/// What the connection loop should do with a dispatched frame.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Send this response and keep serving requests.
    Reply(ControlResponse),
    /// Switch the connection into trace streaming.
    OpenTraceStream,
}

/// Routes control frames to their handlers.
pub struct ControlDispatcher {
    plane: SharedPlane,
}

impl ControlDispatcher {
    /// Creates a dispatcher over the shared plane.
    #[must_use]
    pub fn new(plane: SharedPlane) -> Self {
        Self { plane }
    }

    /// Dispatches one `[tag][protobuf]` frame.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] for empty frames, unknown tags, and
    /// undecodable payloads. The connection loop converts these into tag-0
    /// error frames; the connection survives.
    pub fn dispatch(&self, frame: &Bytes) -> ProtocolResult<DispatchOutcome> {
        let Some((&tag, payload)) = frame.split_first() else {
            return Err(ProtocolError::malformed("empty frame"));
        };

        let msg_type = ControlMessageType::from_tag(tag)
            .ok_or_else(|| ProtocolError::malformed(format!("unknown message tag: {tag}")))?;
        debug!(?msg_type, payload_len = payload.len(), "Dispatching control request");

        let response = match msg_type {
            ControlMessageType::RegisterBreakpoint => {
                self.handle_register(decode::<RegisterBreakpointRequest>(payload)?)
            }
            ControlMessageType::ListBreakpoints => self.handle_list_breakpoints(),
            ControlMessageType::DeleteBreakpoint => {
                self.handle_delete(&decode::<DeleteBreakpointRequest>(payload)?)
            }
            ControlMessageType::StreamTraces => return Ok(DispatchOutcome::OpenTraceStream),
            ControlMessageType::FreezeTrace => {
                self.handle_freeze(decode::<FreezeTraceRequest>(payload)?)
            }
            ControlMessageType::ReleaseTrace => {
                self.handle_release(decode::<ReleaseTraceRequest>(payload)?)
            }
            ControlMessageType::GetFreezeStatus => {
                self.handle_freeze_status(&decode::<GetFreezeStatusRequest>(payload)?)
            }
            ControlMessageType::ListActiveFreezes => self.handle_list_freezes(),
            ControlMessageType::GetSnapshot => {
                self.handle_snapshot(&decode::<GetSnapshotRequest>(payload)?)
            }
            ControlMessageType::GetAppSnapshot => {
                self.handle_app_snapshot(&decode::<GetAppSnapshotRequest>(payload)?)
            }
            ControlMessageType::EmergencyRelease => self.handle_emergency_release(),
            ControlMessageType::GetSystemHealth => self.handle_system_health(),
            ControlMessageType::GetTopology => self.handle_topology(),
        };

        Ok(DispatchOutcome::Reply(response))
    }

    fn handle_register(&self, request: RegisterBreakpointRequest) -> ControlResponse {
        if request.service_name.is_empty() {
            return ControlResponse::RegisterBreakpoint(RegisterBreakpointResponse {
                breakpoint_id: String::new(),
                success: false,
                message: "service_name must not be empty".to_string(),
            });
        }

        let breakpoint = self.plane.breakpoints.register(
            request.service_name,
            request.endpoint,
            request.conditions,
        );
        ControlResponse::RegisterBreakpoint(RegisterBreakpointResponse {
            message: format!(
                "Breakpoint registered at {} {}",
                breakpoint.service_name, breakpoint.endpoint
            ),
            breakpoint_id: breakpoint.id,
            success: true,
        })
    }

    fn handle_list_breakpoints(&self) -> ControlResponse {
        let breakpoints = self
            .plane
            .breakpoints
            .list()
            .into_iter()
            .map(|bp| BreakpointRecord {
                id: bp.id,
                service_name: bp.service_name,
                endpoint: bp.endpoint,
                conditions: bp.conditions,
                enabled: bp.enabled,
                created_at: bp.created_at.timestamp(),
            })
            .collect();
        ControlResponse::ListBreakpoints(ListBreakpointsResponse { breakpoints })
    }

    fn handle_delete(&self, request: &DeleteBreakpointRequest) -> ControlResponse {
        let response = match self.plane.breakpoints.delete(&request.breakpoint_id) {
            Ok(()) => DeleteBreakpointResponse {
                success: true,
                message: "Breakpoint deleted".to_string(),
            },
            Err(error) => DeleteBreakpointResponse {
                success: false,
                message: error.to_string(),
            },
        };
        ControlResponse::DeleteBreakpoint(response)
    }

    fn handle_freeze(&self, request: FreezeTraceRequest) -> ControlResponse {
        if request.trace_id.is_empty() {
            return ControlResponse::FreezeTrace(FreezeTraceResponse {
                success: false,
                message: "trace_id must not be empty".to_string(),
                state: "failed".to_string(),
            });
        }

        let response = match self.plane.freezes.initiate(
            &request.trace_id,
            request.services,
            FreezeOrigin::Manual,
        ) {
            Ok(record) => FreezeTraceResponse {
                success: true,
                message: "Freeze initiated".to_string(),
                state: record.state.as_str().to_string(),
            },
            Err(error) => {
                warn!(trace_id = %request.trace_id, %error, "Manual freeze rejected");
                FreezeTraceResponse {
                    success: false,
                    message: error.to_string(),
                    state: "failed".to_string(),
                }
            }
        };
        ControlResponse::FreezeTrace(response)
    }

    fn handle_release(&self, request: ReleaseTraceRequest) -> ControlResponse {
        let override_body =
            Some(request.override_body).filter(|body| !body.is_empty());
        let response = match self.plane.freezes.release(&request.trace_id, override_body) {
            Ok(()) => ReleaseTraceResponse {
                success: true,
                message: "Trace released".to_string(),
            },
            Err(error) => ReleaseTraceResponse {
                success: false,
                message: error.to_string(),
            },
        };
        ControlResponse::ReleaseTrace(response)
    }

    fn handle_freeze_status(&self, request: &GetFreezeStatusRequest) -> ControlResponse {
        let response = self.plane.freezes.status(&request.trace_id).map_or_else(
            || GetFreezeStatusResponse {
                trace_id: request.trace_id.clone(),
                state: "not_found".to_string(),
                services: Vec::new(),
                frozen_at: 0,
                origin: String::new(),
            },
            freeze_status_response,
        );
        ControlResponse::FreezeStatus(response)
    }

    fn handle_list_freezes(&self) -> ControlResponse {
        let freezes = self
            .plane
            .freezes
            .list_active()
            .into_iter()
            .map(|freeze| FreezeInfo {
                trace_id: freeze.trace_id.clone(),
                state: freeze.state.as_str().to_string(),
                services: freeze.services.clone(),
                frozen_at: freeze.frozen_at.map_or(0, |at| at.timestamp()),
                origin: freeze.origin.label().to_string(),
            })
            .collect();
        ControlResponse::ListActiveFreezes(ListActiveFreezesResponse { freezes })
    }

    fn handle_snapshot(&self, request: &GetSnapshotRequest) -> ControlResponse {
        let response = self.plane.snapshots.network(&request.trace_id).map_or_else(
            || GetSnapshotResponse {
                success: false,
                message: "Snapshot not found (trace may not have hit a freeze yet)".to_string(),
                snapshot: None,
            },
            |snapshot| GetSnapshotResponse {
                success: true,
                message: String::new(),
                snapshot: Some(NetworkSnapshotRecord {
                    trace_id: snapshot.trace_id,
                    service_name: snapshot.service_name,
                    method: snapshot.method,
                    body: snapshot.body,
                }),
            },
        );
        ControlResponse::Snapshot(response)
    }

    fn handle_app_snapshot(&self, request: &GetAppSnapshotRequest) -> ControlResponse {
        let snapshots: Vec<AppSnapshotRecord> = self
            .plane
            .snapshots
            .application(&request.trace_id)
            .into_iter()
            .map(|snap| AppSnapshotRecord {
                local_variables: snap.stringified_locals(),
                service_name: snap.service_name,
                checkpoint: snap.checkpoint,
                stack_trace: snap.stack_trace,
                timestamp: snap.timestamp,
            })
            .collect();
        ControlResponse::AppSnapshot(GetAppSnapshotResponse {
            success: !snapshots.is_empty(),
            snapshots,
        })
    }

    fn handle_emergency_release(&self) -> ControlResponse {
        let freed = self.plane.freezes.emergency_release();
        ControlResponse::EmergencyRelease(EmergencyReleaseResponse {
            success: true,
            freed_count: u32::try_from(freed).unwrap_or(u32::MAX),
            message: format!("Released {freed} active freezes; traffic is flowing normally"),
        })
    }

    fn handle_system_health(&self) -> ControlResponse {
        let mut component_status = std::collections::BTreeMap::new();
        component_status.insert("control-plane".to_string(), "healthy".to_string());

        let services = self.plane.snapshots.observed_services();
        if services.is_empty() {
            component_status.insert("services".to_string(), "no_heartbeats_yet".to_string());
        } else {
            for service in services {
                component_status.insert(format!("service:{service}"), "active".to_string());
            }
        }

        ControlResponse::SystemHealth(SystemHealthResponse {
            healthy: true,
            component_status,
        })
    }

    fn handle_topology(&self) -> ControlResponse {
        let links = self
            .plane
            .snapshots
            .topology()
            .into_iter()
            .map(|link| TopologyLinkRecord {
                source: link.source,
                target: link.target,
            })
            .collect();
        ControlResponse::Topology(TopologyResponse { links })
    }
}

fn freeze_status_response(freeze: TraceFreeze) -> GetFreezeStatusResponse {
    GetFreezeStatusResponse {
        trace_id: freeze.trace_id.clone(),
        state: freeze.state.as_str().to_string(),
        services: freeze.services.clone(),
        frozen_at: freeze.frozen_at.map_or(0, |at| at.timestamp()),
        origin: freeze.origin.label().to_string(),
    }
}

fn decode<M: Message + Default>(payload: &[u8]) -> ProtocolResult<M> {
    M::decode(payload)
        .map_err(|error| ProtocolError::malformed(format!("undecodable payload: {error}")))
}
