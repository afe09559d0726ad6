//! End-to-end tests for the operator RPC surface over real sockets.
//!
//! A `ControlServer` is bound on an ephemeral port and driven by a framed
//! client, covering every operation the CLI exposes plus the streaming
//! path and the timeout-driven freeze lifecycle.

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use permafrost_core::events::TraceEvent;
use permafrost_core::freeze::FreezeConfig;
use permafrost_core::snapshot::{AppSnapshot, NetworkSnapshot};
use permafrost_daemon::protocol::messages::{
    ControlMessageType, DeleteBreakpointRequest, DeleteBreakpointResponse,
    EmergencyReleaseRequest, EmergencyReleaseResponse, FreezeTraceRequest, FreezeTraceResponse,
    GetAppSnapshotRequest, GetAppSnapshotResponse, GetFreezeStatusRequest,
    GetFreezeStatusResponse, GetSnapshotRequest, GetSnapshotResponse, ListActiveFreezesRequest,
    ListActiveFreezesResponse, ListBreakpointsRequest, ListBreakpointsResponse,
    RegisterBreakpointRequest, RegisterBreakpointResponse, ReleaseTraceRequest,
    ReleaseTraceResponse, StreamTracesRequest, SystemHealthRequest, SystemHealthResponse,
    TopologyRequest, TopologyResponse, TraceEventFrame,
};
use permafrost_daemon::protocol::{ControlServer, FrameCodec};
use permafrost_daemon::state::{ControlPlane, SharedPlane};
use prost::Message;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

const TRACE: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

type Client = Framed<TcpStream, FrameCodec>;

async fn start_plane(config: FreezeConfig) -> (SharedPlane, std::net::SocketAddr) {
    let plane = ControlPlane::new(config);
    let server = ControlServer::bind("127.0.0.1:0".parse().unwrap(), plane.clone())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    (plane, addr)
}

async fn connect(addr: std::net::SocketAddr) -> Client {
    let stream = TcpStream::connect(addr).await.unwrap();
    Framed::new(stream, FrameCodec::new())
}

async fn call<Req: Message, Resp: Message + Default>(
    client: &mut Client,
    msg_type: ControlMessageType,
    request: &Req,
) -> Resp {
    let mut frame = vec![msg_type.tag()];
    request.encode(&mut frame).unwrap();
    client.send(Bytes::from(frame)).await.unwrap();

    let reply = client.next().await.unwrap().unwrap();
    let (&tag, payload) = reply.split_first().unwrap();
    assert_eq!(tag, msg_type.tag(), "expected same-tag response");
    Resp::decode(payload).unwrap()
}

#[tokio::test]
async fn test_breakpoint_register_list_delete_round_trip() {
    let (_plane, addr) = start_plane(FreezeConfig::default()).await;
    let mut client = connect(addr).await;

    let mut conditions = BTreeMap::new();
    conditions.insert("body.amount".to_string(), "999".to_string());
    let registered: RegisterBreakpointResponse = call(
        &mut client,
        ControlMessageType::RegisterBreakpoint,
        &RegisterBreakpointRequest {
            service_name: "service-a".to_string(),
            endpoint: "/order".to_string(),
            conditions: conditions.clone(),
        },
    )
    .await;
    assert!(registered.success);
    assert!(!registered.breakpoint_id.is_empty());

    let listed: ListBreakpointsResponse = call(
        &mut client,
        ControlMessageType::ListBreakpoints,
        &ListBreakpointsRequest {},
    )
    .await;
    assert_eq!(listed.breakpoints.len(), 1);
    assert_eq!(listed.breakpoints[0].id, registered.breakpoint_id);
    assert_eq!(listed.breakpoints[0].conditions, conditions);
    assert!(listed.breakpoints[0].enabled);

    let deleted: DeleteBreakpointResponse = call(
        &mut client,
        ControlMessageType::DeleteBreakpoint,
        &DeleteBreakpointRequest {
            breakpoint_id: registered.breakpoint_id,
        },
    )
    .await;
    assert!(deleted.success);

    let listed: ListBreakpointsResponse = call(
        &mut client,
        ControlMessageType::ListBreakpoints,
        &ListBreakpointsRequest {},
    )
    .await;
    assert!(listed.breakpoints.is_empty());

    let missing: DeleteBreakpointResponse = call(
        &mut client,
        ControlMessageType::DeleteBreakpoint,
        &DeleteBreakpointRequest {
            breakpoint_id: "no-such-id".to_string(),
        },
    )
    .await;
    assert!(!missing.success);
}

#[tokio::test]
async fn test_freeze_lifecycle_over_rpc() {
    let (_plane, addr) = start_plane(FreezeConfig::default()).await;
    let mut client = connect(addr).await;

    let frozen: FreezeTraceResponse = call(
        &mut client,
        ControlMessageType::FreezeTrace,
        &FreezeTraceRequest {
            trace_id: TRACE.to_string(),
            services: vec!["service-a".to_string()],
        },
    )
    .await;
    assert!(frozen.success);
    assert_eq!(frozen.state, "frozen");

    // A second freeze for the same trace conflicts without touching the
    // existing record.
    let conflict: FreezeTraceResponse = call(
        &mut client,
        ControlMessageType::FreezeTrace,
        &FreezeTraceRequest {
            trace_id: TRACE.to_string(),
            services: vec![],
        },
    )
    .await;
    assert!(!conflict.success);
    assert!(conflict.message.contains("already"));

    let status: GetFreezeStatusResponse = call(
        &mut client,
        ControlMessageType::GetFreezeStatus,
        &GetFreezeStatusRequest {
            trace_id: TRACE.to_string(),
        },
    )
    .await;
    assert_eq!(status.state, "frozen");
    assert_eq!(status.services, ["service-a"]);
    assert_eq!(status.origin, "manual");
    assert!(status.frozen_at > 0);

    let active: ListActiveFreezesResponse = call(
        &mut client,
        ControlMessageType::ListActiveFreezes,
        &ListActiveFreezesRequest {},
    )
    .await;
    assert_eq!(active.freezes.len(), 1);
    assert_eq!(active.freezes[0].trace_id, TRACE);

    let released: ReleaseTraceResponse = call(
        &mut client,
        ControlMessageType::ReleaseTrace,
        &ReleaseTraceRequest {
            trace_id: TRACE.to_string(),
            override_body: String::new(),
        },
    )
    .await;
    assert!(released.success);

    let active: ListActiveFreezesResponse = call(
        &mut client,
        ControlMessageType::ListActiveFreezes,
        &ListActiveFreezesRequest {},
    )
    .await;
    assert!(active.freezes.is_empty());

    let missing: ReleaseTraceResponse = call(
        &mut client,
        ControlMessageType::ReleaseTrace,
        &ReleaseTraceRequest {
            trace_id: "unknown-trace".to_string(),
            override_body: String::new(),
        },
    )
    .await;
    assert!(!missing.success);
}

#[tokio::test]
async fn test_emergency_release_frees_everything() {
    let (_plane, addr) = start_plane(FreezeConfig::default()).await;
    let mut client = connect(addr).await;

    for i in 0..3 {
        let response: FreezeTraceResponse = call(
            &mut client,
            ControlMessageType::FreezeTrace,
            &FreezeTraceRequest {
                trace_id: format!("trace-{i}"),
                services: vec![],
            },
        )
        .await;
        assert!(response.success);
    }

    let released: EmergencyReleaseResponse = call(
        &mut client,
        ControlMessageType::EmergencyRelease,
        &EmergencyReleaseRequest {},
    )
    .await;
    assert!(released.success);
    assert_eq!(released.freed_count, 3);

    let active: ListActiveFreezesResponse = call(
        &mut client,
        ControlMessageType::ListActiveFreezes,
        &ListActiveFreezesRequest {},
    )
    .await;
    assert!(active.freezes.is_empty());
}

#[tokio::test]
async fn test_timeout_auto_release_reaches_not_found() {
    let config = FreezeConfig {
        timeout: Duration::from_millis(200),
        release_grace: Duration::from_millis(200),
    };
    let (_plane, addr) = start_plane(config).await;
    let mut client = connect(addr).await;

    let frozen: FreezeTraceResponse = call(
        &mut client,
        ControlMessageType::FreezeTrace,
        &FreezeTraceRequest {
            trace_id: TRACE.to_string(),
            services: vec![],
        },
    )
    .await;
    assert!(frozen.success);

    tokio::time::sleep(Duration::from_millis(600)).await;

    let status: GetFreezeStatusResponse = call(
        &mut client,
        ControlMessageType::GetFreezeStatus,
        &GetFreezeStatusRequest {
            trace_id: TRACE.to_string(),
        },
    )
    .await;
    assert_eq!(status.state, "not_found");
}

#[tokio::test]
async fn test_snapshot_reads_over_rpc() {
    let (plane, addr) = start_plane(FreezeConfig::default()).await;
    let mut client = connect(addr).await;

    let missing: GetSnapshotResponse = call(
        &mut client,
        ControlMessageType::GetSnapshot,
        &GetSnapshotRequest {
            trace_id: TRACE.to_string(),
        },
    )
    .await;
    assert!(!missing.success);
    assert!(missing.snapshot.is_none());

    plane.snapshots.record_network(NetworkSnapshot {
        trace_id: TRACE.to_string(),
        service_name: "service-a".to_string(),
        method: "POST /order".to_string(),
        body: r#"{"amount":999}"#.to_string(),
    });
    let mut locals = BTreeMap::new();
    locals.insert("amount".to_string(), serde_json::json!(999));
    plane.snapshots.record_application(AppSnapshot {
        trace_id: TRACE.to_string(),
        service_name: "service-a".to_string(),
        checkpoint: "entry".to_string(),
        stack_trace: "main -> handler".to_string(),
        local_variables: locals,
        timestamp: "2025-11-02T10:00:00Z".to_string(),
    });
    plane.snapshots.record_application(AppSnapshot {
        trace_id: TRACE.to_string(),
        service_name: "service-b".to_string(),
        checkpoint: "validate".to_string(),
        stack_trace: String::new(),
        local_variables: BTreeMap::new(),
        timestamp: String::new(),
    });

    let found: GetSnapshotResponse = call(
        &mut client,
        ControlMessageType::GetSnapshot,
        &GetSnapshotRequest {
            trace_id: TRACE.to_string(),
        },
    )
    .await;
    assert!(found.success);
    assert_eq!(found.snapshot.unwrap().service_name, "service-a");

    let journey: GetAppSnapshotResponse = call(
        &mut client,
        ControlMessageType::GetAppSnapshot,
        &GetAppSnapshotRequest {
            trace_id: TRACE.to_string(),
        },
    )
    .await;
    assert!(journey.success);
    assert_eq!(journey.snapshots.len(), 2);
    assert_eq!(journey.snapshots[0].checkpoint, "entry");
    assert_eq!(
        journey.snapshots[0].local_variables.get("amount").unwrap(),
        "999"
    );

    let health: SystemHealthResponse = call(
        &mut client,
        ControlMessageType::GetSystemHealth,
        &SystemHealthRequest {},
    )
    .await;
    assert!(health.healthy);
    assert_eq!(
        health.component_status.get("service:service-a").unwrap(),
        "active"
    );

    let topology: TopologyResponse = call(
        &mut client,
        ControlMessageType::GetTopology,
        &TopologyRequest {},
    )
    .await;
    assert_eq!(topology.links.len(), 1);
    assert_eq!(topology.links[0].source, "service-a");
    assert_eq!(topology.links[0].target, "service-b");
}

#[tokio::test]
async fn test_health_before_any_snapshot_reports_no_heartbeats() {
    let (_plane, addr) = start_plane(FreezeConfig::default()).await;
    let mut client = connect(addr).await;

    let health: SystemHealthResponse = call(
        &mut client,
        ControlMessageType::GetSystemHealth,
        &SystemHealthRequest {},
    )
    .await;
    assert!(health.healthy);
    assert_eq!(
        health.component_status.get("services").unwrap(),
        "no_heartbeats_yet"
    );
}

#[tokio::test]
async fn test_stream_traces_pushes_events_until_disconnect() {
    let (plane, addr) = start_plane(FreezeConfig::default()).await;

    let mut watcher = connect(addr).await;
    let mut frame = vec![ControlMessageType::StreamTraces.tag()];
    StreamTracesRequest {}.encode(&mut frame).unwrap();
    watcher.send(Bytes::from(frame)).await.unwrap();

    // Give the server a beat to attach the subscriber before publishing.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(plane.events.subscriber_count(), 1);

    plane
        .events
        .publish(&TraceEvent::observed(TRACE, "service-a", "/order"));

    let frame = watcher.next().await.unwrap().unwrap();
    let (&tag, payload) = frame.split_first().unwrap();
    assert_eq!(tag, ControlMessageType::StreamTraces.tag());
    let event = TraceEventFrame::decode(payload).unwrap();
    assert_eq!(event.trace_id, TRACE);
    assert_eq!(event.service_name, "service-a");

    // Disconnecting detaches the subscriber.
    drop(watcher);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(plane.events.subscriber_count(), 0);
}

#[tokio::test]
async fn test_malformed_frames_get_tag_zero_errors_and_connection_survives() {
    let (_plane, addr) = start_plane(FreezeConfig::default()).await;
    let mut client = connect(addr).await;

    // Unknown tag.
    client.send(Bytes::from_static(&[200, 1, 2, 3])).await.unwrap();
    let reply = client.next().await.unwrap().unwrap();
    assert_eq!(reply[0], 0);

    // Empty frame.
    client.send(Bytes::new()).await.unwrap();
    let reply = client.next().await.unwrap().unwrap();
    assert_eq!(reply[0], 0);

    // The connection still serves real requests afterwards.
    let health: SystemHealthResponse = call(
        &mut client,
        ControlMessageType::GetSystemHealth,
        &SystemHealthRequest {},
    )
    .await;
    assert!(health.healthy);
}
