//! Wire contracts between the filter and the control plane.
//!
//! Everything here is pure data shaping, kept separate from the host
//! callbacks so it can be unit tested on any target.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Body substituted when a request had none: the control plane always
/// receives valid JSON.
pub const EMPTY_JSON_BODY: &[u8] = b"{}";

/// Plugin configuration, read from the Envoy filter config block.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Logical cluster name the check and snapshot calls are dispatched to.
    pub cluster: String,

    /// `:authority` used on calls to the control plane.
    pub authority: String,

    /// Per-call dispatch timeout in milliseconds.
    pub dispatch_timeout_ms: u64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            cluster: "control_plane".to_string(),
            authority: "control-plane".to_string(),
            dispatch_timeout_ms: 5_000,
        }
    }
}

impl FilterConfig {
    /// The dispatch timeout as a [`Duration`].
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }
}

/// The control plane's verdict for one check call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Keep the request suspended and poll again.
    Freeze,
    /// Resume the request, with a replacement body when non-empty.
    Allow {
        /// Replacement request body; empty means resume unchanged.
        override_body: String,
    },
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    action: String,
    #[serde(default)]
    override_body: String,
}

/// Parses a check response body into a [`Decision`].
///
/// Returns `None` for anything unexpected - undecodable JSON, a missing
/// or unknown `action` - which the caller treats as fail-open.
pub fn parse_decision(body: &[u8]) -> Option<Decision> {
    let response: CheckResponse = serde_json::from_slice(body).ok()?;
    match response.action.as_str() {
        "freeze" => Some(Decision::Freeze),
        "allow" => Some(Decision::Allow {
            override_body: response.override_body,
        }),
        _ => None,
    }
}

/// Network snapshot payload posted to `/snapshot` on the first freeze.
#[derive(Debug, Serialize)]
pub struct SnapshotPayload<'a> {
    /// Frozen trace id.
    pub trace_id: &'a str,
    /// Service name (the request authority).
    pub service_name: &'a str,
    /// Request line, `<METHOD> <PATH>`.
    pub method: String,
    /// Raw request body at freeze time.
    pub body: String,
}

/// Builds the header set for a check call.
///
/// Besides the routing pseudo-headers, the call carries the trace
/// identity and mirrors every original (non-pseudo) request header under
/// an `x-orig-` prefix so the match engine can evaluate header
/// conditions.
pub fn check_call_headers(
    authority: &str,
    trace_id: &str,
    service: &str,
    endpoint: &str,
    original_headers: &[(String, String)],
) -> Vec<(String, String)> {
    let mut headers = vec![
        (":method".to_string(), "POST".to_string()),
        (":path".to_string(), "/check".to_string()),
        (":authority".to_string(), authority.to_string()),
        ("x-trace-id".to_string(), trace_id.to_string()),
        ("x-service-name".to_string(), service.to_string()),
        ("x-endpoint".to_string(), endpoint.to_string()),
        ("content-type".to_string(), "application/json".to_string()),
    ];
    for (name, value) in original_headers {
        headers.push((format!("x-orig-{}", name.to_ascii_lowercase()), value.clone()));
    }
    headers
}

/// Builds the header set for the snapshot call.
pub fn snapshot_call_headers(authority: &str) -> Vec<(String, String)> {
    vec![
        (":method".to_string(), "POST".to_string()),
        (":path".to_string(), "/snapshot".to_string()),
        (":authority".to_string(), authority.to_string()),
        ("content-type".to_string(), "application/json".to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decision_freeze_and_allow() {
        assert_eq!(parse_decision(br#"{"action":"freeze"}"#), Some(Decision::Freeze));
        assert_eq!(
            parse_decision(br#"{"action":"allow"}"#),
            Some(Decision::Allow {
                override_body: String::new()
            })
        );
        assert_eq!(
            parse_decision(br#"{"action":"allow","override_body":"{\"a\":1}"}"#),
            Some(Decision::Allow {
                override_body: r#"{"a":1}"#.to_string()
            })
        );
    }

    #[test]
    fn test_parse_decision_fails_open_on_garbage() {
        assert_eq!(parse_decision(b"not json"), None);
        assert_eq!(parse_decision(br#"{"action":"detonate"}"#), None);
        assert_eq!(parse_decision(br#"{"override_body":"x"}"#), None);
    }

    #[test]
    fn test_check_headers_mirror_originals_lowercased() {
        let original = vec![
            ("User-Type".to_string(), "vip".to_string()),
            ("content-length".to_string(), "14".to_string()),
        ];
        let headers = check_call_headers(
            "control-plane",
            "trace-1",
            "localhost:10001",
            "/order",
            &original,
        );

        let find = |name: &str| {
            headers
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(find(":path"), Some("/check"));
        assert_eq!(find("x-trace-id"), Some("trace-1"));
        assert_eq!(find("x-service-name"), Some("localhost:10001"));
        assert_eq!(find("x-endpoint"), Some("/order"));
        assert_eq!(find("x-orig-user-type"), Some("vip"));
        assert_eq!(find("x-orig-content-length"), Some("14"));
    }

    #[test]
    fn test_config_defaults_match_mesh_wiring() {
        let config: FilterConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.cluster, "control_plane");
        assert_eq!(config.authority, "control-plane");
        assert_eq!(config.dispatch_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_config_overrides_apply() {
        let config: FilterConfig =
            serde_json::from_str(r#"{"cluster":"cp","dispatch_timeout_ms":1500}"#).unwrap();
        assert_eq!(config.cluster, "cp");
        assert_eq!(config.authority, "control-plane");
        assert_eq!(config.dispatch_timeout(), Duration::from_millis(1_500));
    }

    #[test]
    fn test_snapshot_payload_shape() {
        let payload = SnapshotPayload {
            trace_id: "t1",
            service_name: "localhost:10001",
            method: "POST /order".to_string(),
            body: r#"{"amount":999}"#.to_string(),
        };
        let json: serde_json::Value =
            serde_json::from_slice(&serde_json::to_vec(&payload).unwrap()).unwrap();
        assert_eq!(json["trace_id"], "t1");
        assert_eq!(json["service_name"], "localhost:10001");
        assert_eq!(json["method"], "POST /order");
        assert_eq!(json["body"], r#"{"amount":999}"#);
    }
}
