//! Synchronous client for the control protocol.
//!
//! One TCP connection per CLI invocation: connect, exchange length-prefixed
//! `[tag][protobuf]` frames, close. The `watch` path holds the connection
//! open and consumes the server's event stream instead.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use anyhow::{Context, Result, bail, ensure};
use permafrost_daemon::protocol::MAX_FRAME_SIZE;
use permafrost_daemon::protocol::messages::{
    ControlError, ControlMessageType, DeleteBreakpointRequest, DeleteBreakpointResponse,
    ERROR_TAG, EmergencyReleaseRequest, EmergencyReleaseResponse, FreezeTraceRequest,
    FreezeTraceResponse, GetAppSnapshotRequest, GetAppSnapshotResponse, GetFreezeStatusRequest,
    GetFreezeStatusResponse, GetSnapshotRequest, GetSnapshotResponse, ListActiveFreezesRequest,
    ListActiveFreezesResponse, ListBreakpointsRequest, ListBreakpointsResponse,
    RegisterBreakpointRequest, RegisterBreakpointResponse, ReleaseTraceRequest,
    ReleaseTraceResponse, StreamTracesRequest, SystemHealthRequest, SystemHealthResponse,
    TopologyRequest, TopologyResponse, TraceEventFrame,
};
use prost::Message;

/// Per-request socket timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Synchronous control-plane client.
pub struct PlaneClient {
    stream: TcpStream,
}

impl PlaneClient {
    /// Connects to the control plane at `addr` (`host:port`).
    pub fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .with_context(|| format!("failed to connect to control plane at {addr}"))?;
        stream.set_read_timeout(Some(REQUEST_TIMEOUT))?;
        stream.set_write_timeout(Some(REQUEST_TIMEOUT))?;
        Ok(Self { stream })
    }

    /// Registers a breakpoint.
    pub fn register_breakpoint(
        &mut self,
        request: RegisterBreakpointRequest,
    ) -> Result<RegisterBreakpointResponse> {
        self.request(ControlMessageType::RegisterBreakpoint, &request)
    }

    /// Lists every breakpoint.
    pub fn list_breakpoints(&mut self) -> Result<ListBreakpointsResponse> {
        self.request(ControlMessageType::ListBreakpoints, &ListBreakpointsRequest {})
    }

    /// Deletes a breakpoint by id.
    pub fn delete_breakpoint(&mut self, breakpoint_id: String) -> Result<DeleteBreakpointResponse> {
        self.request(
            ControlMessageType::DeleteBreakpoint,
            &DeleteBreakpointRequest { breakpoint_id },
        )
    }

    /// Manually freezes a trace.
    pub fn freeze_trace(
        &mut self,
        trace_id: String,
        services: Vec<String>,
    ) -> Result<FreezeTraceResponse> {
        self.request(
            ControlMessageType::FreezeTrace,
            &FreezeTraceRequest { trace_id, services },
        )
    }

    /// Releases a frozen trace, optionally with a body override.
    pub fn release_trace(
        &mut self,
        trace_id: String,
        override_body: String,
    ) -> Result<ReleaseTraceResponse> {
        self.request(
            ControlMessageType::ReleaseTrace,
            &ReleaseTraceRequest {
                trace_id,
                override_body,
            },
        )
    }

    /// Fetches one freeze's status.
    pub fn freeze_status(&mut self, trace_id: String) -> Result<GetFreezeStatusResponse> {
        self.request(
            ControlMessageType::GetFreezeStatus,
            &GetFreezeStatusRequest { trace_id },
        )
    }

    /// Lists active freezes.
    pub fn list_active_freezes(&mut self) -> Result<ListActiveFreezesResponse> {
        self.request(
            ControlMessageType::ListActiveFreezes,
            &ListActiveFreezesRequest {},
        )
    }

    /// Releases every active freeze.
    pub fn emergency_release(&mut self) -> Result<EmergencyReleaseResponse> {
        self.request(
            ControlMessageType::EmergencyRelease,
            &EmergencyReleaseRequest {},
        )
    }

    /// Fetches a trace's network snapshot.
    pub fn get_snapshot(&mut self, trace_id: String) -> Result<GetSnapshotResponse> {
        self.request(ControlMessageType::GetSnapshot, &GetSnapshotRequest { trace_id })
    }

    /// Fetches a trace's hop journey.
    pub fn get_app_snapshot(&mut self, trace_id: String) -> Result<GetAppSnapshotResponse> {
        self.request(
            ControlMessageType::GetAppSnapshot,
            &GetAppSnapshotRequest { trace_id },
        )
    }

    /// Fetches control-plane health.
    pub fn system_health(&mut self) -> Result<SystemHealthResponse> {
        self.request(ControlMessageType::GetSystemHealth, &SystemHealthRequest {})
    }

    /// Fetches the derived topology.
    pub fn topology(&mut self) -> Result<TopologyResponse> {
        self.request(ControlMessageType::GetTopology, &TopologyRequest {})
    }

    /// Streams trace events, invoking `on_event` per event until the
    /// server closes the connection.
    pub fn watch(mut self, mut on_event: impl FnMut(TraceEventFrame)) -> Result<()> {
        // Streaming has no request/response rhythm to bound.
        self.stream.set_read_timeout(None)?;
        self.send_frame(ControlMessageType::StreamTraces.tag(), &StreamTracesRequest {})?;

        while let Some((tag, payload)) = self.read_frame()? {
            if tag == ERROR_TAG {
                let error = ControlError::decode(payload.as_slice())?;
                bail!("control plane error: {}", error.message);
            }
            ensure!(
                tag == ControlMessageType::StreamTraces.tag(),
                "unexpected frame tag {tag} on trace stream"
            );
            on_event(TraceEventFrame::decode(payload.as_slice())?);
        }

        Ok(())
    }

    fn request<Req: Message, Resp: Message + Default>(
        &mut self,
        msg_type: ControlMessageType,
        request: &Req,
    ) -> Result<Resp> {
        self.send_frame(msg_type.tag(), request)?;

        let (tag, payload) = self
            .read_frame()?
            .context("control plane closed the connection")?;
        if tag == ERROR_TAG {
            let error = ControlError::decode(payload.as_slice())?;
            bail!("control plane error: {}", error.message);
        }
        ensure!(
            tag == msg_type.tag(),
            "unexpected response tag {tag} (expected {})",
            msg_type.tag()
        );

        Resp::decode(payload.as_slice()).context("undecodable response payload")
    }

    fn send_frame(&mut self, tag: u8, message: &impl Message) -> Result<()> {
        let mut payload = Vec::with_capacity(1 + message.encoded_len());
        payload.push(tag);
        message.encode(&mut payload)?;

        let len = u32::try_from(payload.len()).context("frame too large")?;
        self.stream.write_all(&len.to_be_bytes())?;
        self.stream.write_all(&payload)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Reads one frame; `None` on clean EOF.
    fn read_frame(&mut self) -> Result<Option<(u8, Vec<u8>)>> {
        let mut len_buf = [0u8; 4];
        match self.stream.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        ensure!(len <= MAX_FRAME_SIZE, "frame of {len} bytes exceeds protocol limit");
        ensure!(len > 0, "zero-length frame has no tag byte");

        let mut payload = vec![0u8; len];
        self.stream
            .read_exact(&mut payload)
            .context("truncated frame")?;

        let tag = payload.remove(0);
        Ok(Some((tag, payload)))
    }
}
