//! Sidecar-facing HTTP surface.
//!
//! Three endpoints, all JSON over HTTP/1.1:
//!
//! - `POST /check` - the freeze/allow decision a suspended request polls on
//! - `POST /snapshot` - network snapshot ingress from the sidecar filter
//! - `POST /app-snapshot` - checkpoint ingress from instrumented services
//!
//! Every decision path here must terminate quickly: the caller is a paused
//! in-proxy request with a bounded dispatch timeout. Nothing on this
//! surface blocks on anything but its own locks.

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use permafrost_core::events::TraceEvent;
use permafrost_core::freeze::{FreezeError, FreezeOrigin};
use permafrost_core::matcher::{self, Keyspace};
use permafrost_core::snapshot::{AppSnapshot, NetworkSnapshot};
use serde::{Deserialize, Serialize};

use crate::state::SharedPlane;

/// Maximum accepted request body on any ingress endpoint (1 MiB).
///
/// Bodies under debug are expected to be small JSON documents; the limit
/// exists so a misbehaving sidecar cannot exhaust memory here.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Transport prefix under which the sidecar mirrors original headers.
const ORIG_HEADER_PREFIX: &str = "x-orig-";

/// The `/check` verdict returned to a polling sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResponse {
    /// `freeze` to keep the request suspended, `allow` to resume it.
    pub action: String,

    /// Replacement request body, delivered at most once per release.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub override_body: String,
}

impl CheckResponse {
    fn freeze() -> Self {
        Self {
            action: "freeze".to_string(),
            override_body: String::new(),
        }
    }

    fn allow(override_body: Option<String>) -> Self {
        Self {
            action: "allow".to_string(),
            override_body: override_body.unwrap_or_default(),
        }
    }
}

/// Builds the router for the sidecar surface.
pub fn router(plane: SharedPlane) -> Router {
    Router::new()
        .route("/check", post(check))
        .route("/snapshot", post(network_snapshot))
        .route("/app-snapshot", post(app_snapshot))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(plane)
}

/// `POST /check`: decide whether a suspended request stays frozen.
///
/// Decision order: an existing freeze wins; a pending release override is
/// consumed next; only then are breakpoints evaluated. Traces inside the
/// post-release grace window are excluded from matching so a just-released
/// request cannot re-freeze itself on its next poll.
async fn check(
    State(plane): State<SharedPlane>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<CheckResponse> {
    let trace_id = header_str(&headers, "x-trace-id");
    let service = header_str(&headers, "x-service-name");
    let endpoint = header_str(&headers, "x-endpoint");

    if !trace_id.is_empty() {
        plane
            .events
            .publish(&TraceEvent::observed(trace_id, service, endpoint));
    }

    let mut frozen = plane.freezes.is_trace_frozen(trace_id);
    let released = plane.freezes.is_trace_released(trace_id);

    if !frozen && !released && !trace_id.is_empty() && !service.is_empty() {
        if let Some(breakpoint_id) = evaluate_breakpoints(&plane, service, endpoint, &headers, &body)
        {
            match plane.freezes.initiate(
                trace_id,
                vec![service.to_string()],
                FreezeOrigin::Breakpoint(breakpoint_id),
            ) {
                Ok(_) => frozen = true,
                // Lost an initiation race; defer to whatever won.
                Err(FreezeError::AlreadyFrozen { .. }) => {
                    frozen = plane.freezes.is_trace_frozen(trace_id);
                }
                Err(error) => {
                    tracing::error!(trace_id = %trace_id, %error, "Failed to initiate freeze");
                }
            }
        }
    }

    if frozen {
        tracing::debug!(trace_id = %trace_id, service = %service, "Holding request");
        Json(CheckResponse::freeze())
    } else {
        let override_body = if trace_id.is_empty() {
            None
        } else {
            plane.freezes.pop_override(trace_id)
        };
        if override_body.is_some() {
            tracing::info!(trace_id = %trace_id, "Releasing request with body override");
        }
        Json(CheckResponse::allow(override_body))
    }
}

/// `POST /snapshot`: store the request line + body captured at freeze time.
async fn network_snapshot(State(plane): State<SharedPlane>, body: Bytes) -> StatusCode {
    let snapshot: NetworkSnapshot = match serde_json::from_slice(&body) {
        Ok(snapshot) => snapshot,
        Err(error) => {
            tracing::warn!(%error, "Rejected malformed network snapshot");
            return StatusCode::BAD_REQUEST;
        }
    };

    if !plane.snapshots.record_network(snapshot) {
        // First write won; duplicates from re-polling sidecars are expected.
        tracing::debug!("Ignored duplicate network snapshot");
    }
    StatusCode::OK
}

/// `POST /app-snapshot`: append a checkpoint to the trace's hop journey.
async fn app_snapshot(State(plane): State<SharedPlane>, body: Bytes) -> StatusCode {
    let snapshot: AppSnapshot = match serde_json::from_slice(&body) {
        Ok(snapshot) => snapshot,
        Err(error) => {
            tracing::warn!(%error, "Rejected malformed application snapshot");
            return StatusCode::BAD_REQUEST;
        }
    };

    plane.snapshots.record_application(snapshot);
    StatusCode::OK
}

fn evaluate_breakpoints(
    plane: &SharedPlane,
    service: &str,
    endpoint: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Option<String> {
    let original: Vec<(&str, &str)> = headers
        .iter()
        .filter_map(|(name, value)| {
            let name = name.as_str().strip_prefix(ORIG_HEADER_PREFIX)?;
            Some((name, value.to_str().ok()?))
        })
        .collect();

    let keyspace = Keyspace::build(original, body);
    let breakpoints = plane.breakpoints.list();
    matcher::find_match(&breakpoints, service, endpoint, &keyspace)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}
