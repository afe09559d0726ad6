//! TCP server for the control protocol.
//!
//! Each accepted connection gets its own task running a request/response
//! loop over the frame codec. A `StreamTraces` request flips the
//! connection into streaming mode: the server pushes trace event frames
//! until the client hangs up, then the connection ends.
//!
//! Malformed frames are answered with a tag-0 error frame and the
//! connection keeps serving; only transport failures end it early.

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use super::dispatch::{ControlDispatcher, ControlResponse, DispatchOutcome, encode_trace_event};
use super::error::ProtocolResult;
use super::framing::FrameCodec;
use crate::state::SharedPlane;

/// The operator-facing RPC server.
pub struct ControlServer {
    listener: TcpListener,
    plane: SharedPlane,
}

impl ControlServer {
    /// Binds the control listener.
    ///
    /// # Errors
    ///
    /// Returns the bind error; the caller treats this as fatal.
    pub async fn bind(addr: std::net::SocketAddr, plane: SharedPlane) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, plane })
    }

    /// The address the server actually bound (port 0 resolves here).
    ///
    /// # Errors
    ///
    /// Propagates the underlying socket error.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves connections until the surrounding task is dropped.
    ///
    /// # Errors
    ///
    /// Returns only on accept-loop failure; per-connection errors are
    /// logged and do not stop the server.
    pub async fn run(self) -> std::io::Result<()> {
        info!(addr = %self.listener.local_addr()?, "Control RPC server listening");

        loop {
            let (stream, peer) = self.listener.accept().await?;
            debug!(%peer, "Control connection accepted");

            let plane = self.plane.clone();
            tokio::spawn(async move {
                if let Err(error) = handle_connection(stream, plane).await {
                    debug!(%peer, %error, "Control connection ended with error");
                }
                debug!(%peer, "Control connection closed");
            });
        }
    }
}

/// Request/response loop for one connection.
async fn handle_connection(stream: TcpStream, plane: SharedPlane) -> ProtocolResult<()> {
    let mut framed = Framed::new(stream, FrameCodec::new());
    let dispatcher = ControlDispatcher::new(plane.clone());

    while let Some(frame) = framed.next().await {
        let frame = frame?;
        match dispatcher.dispatch(&frame) {
            Ok(DispatchOutcome::Reply(response)) => {
                framed.send(response.encode()).await?;
            }
            Ok(DispatchOutcome::OpenTraceStream) => {
                return stream_traces(framed, &plane).await;
            }
            Err(error) => {
                warn!(%error, "Rejected control frame");
                framed
                    .send(ControlResponse::protocol_error(&error).encode())
                    .await?;
            }
        }
    }

    Ok(())
}

/// Pushes trace events to the client until it disconnects.
///
/// The subscription detaches when this returns, so a gone watcher stops
/// consuming queue space immediately.
async fn stream_traces(
    mut framed: Framed<TcpStream, FrameCodec>,
    plane: &SharedPlane,
) -> ProtocolResult<()> {
    let mut subscription = plane.events.subscribe();
    info!("Trace stream opened");

    loop {
        tokio::select! {
            incoming = framed.next() => {
                // Anything from the client - data or EOF - ends the stream.
                if incoming.is_some() {
                    debug!("Client spoke during trace stream, closing");
                }
                break;
            }
            event = subscription.recv() => {
                let Some(event) = event else { break };
                framed.send(encode_trace_event(&event)).await?;
            }
        }
    }

    info!("Trace stream closed");
    Ok(())
}
