//! Operator RPC protocol: framing, messages, dispatch, and the TCP server.
//!
//! The CLI talks to the control plane over a persistent TCP connection
//! carrying length-prefixed binary frames:
//!
//! ```text
//! +----------------------------+-------------+------------------+
//! | Length (4 bytes, BE)       | Tag (1 byte)| Protobuf payload |
//! +----------------------------+-------------+------------------+
//! ```
//!
//! The tag byte selects the operation (see
//! [`messages::ControlMessageType`]); responses reuse the request's tag,
//! and tag `0` carries a protocol-level [`messages::ControlError`].
//! Business failures (unknown trace, duplicate freeze, missing snapshot)
//! are **not** protocol errors: they travel inside the response message's
//! `{success, message}` envelope.
//!
//! `StreamTraces` is the one streaming operation: after the request frame,
//! the server pushes one `TraceEventFrame` per event until the client
//! closes the connection.
//!
//! # Layering
//!
//! - [`framing`]: length-prefixed codec, frame size validated before any
//!   allocation
//! - [`messages`]: hand-written prost message types and the tag registry
//! - [`dispatch`]: tag-routed request handling against the shared plane
//! - [`server`]: TCP accept loop, per-connection tasks, trace streaming

pub mod dispatch;
pub mod error;
pub mod framing;
pub mod messages;
pub mod server;

pub use dispatch::{ControlDispatcher, ControlResponse, DispatchOutcome};
pub use error::{MAX_FRAME_SIZE, ProtocolError, ProtocolResult};
pub use framing::FrameCodec;
pub use server::ControlServer;
