//! Trace identity extraction.
//!
//! The filter correlates requests to freezes solely by trace id, taken
//! from the request headers in priority order: W3C `traceparent`, then
//! the `x-b3-traceid` and `x-trace-id` vendor headers. A request with no
//! usable id bypasses interception entirely.

/// Vendor headers consulted after `traceparent`, in order.
const VENDOR_HEADERS: [&str; 2] = ["x-b3-traceid", "x-trace-id"];

/// Extracts the trace id from a request's headers.
///
/// Returns `None` when no source yields a non-empty id; the caller must
/// then pass the request through without any delay.
pub fn extract_trace_id(headers: &[(String, String)]) -> Option<String> {
    if let Some(value) = header(headers, "traceparent") {
        if let Some(id) = traceparent_trace_id(value) {
            return Some(id);
        }
    }

    for name in VENDOR_HEADERS {
        if let Some(value) = header(headers, name) {
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }

    None
}

/// Pulls the 32-hex trace-id field out of a well-formed `traceparent`.
///
/// The field sits between the first and second dash (`00-<trace-id>-...`);
/// anything but exactly 32 hex digits fails extraction.
fn traceparent_trace_id(value: &str) -> Option<String> {
    let field = value.split('-').nth(1)?;
    if field.len() == 32 && field.bytes().all(|b| b.is_ascii_hexdigit()) {
        Some(field.to_ascii_lowercase())
    } else {
        None
    }
}

fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_traceparent_wins_over_vendor_headers() {
        let headers = headers(&[
            ("x-b3-traceid", "deadbeefdeadbeefdeadbeefdeadbeef"),
            (
                "traceparent",
                "00-aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-bbbbbbbbbbbbbbbb-01",
            ),
        ]);
        assert_eq!(
            extract_trace_id(&headers).as_deref(),
            Some("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa")
        );
    }

    #[test]
    fn test_short_traceparent_field_falls_through() {
        // Fewer than 32 hex digits: traceparent extraction fails, but the
        // vendor header still resolves.
        let with_fallback = headers(&[
            ("traceparent", "00-abc123-bbbbbbbbbbbbbbbb-01"),
            ("x-trace-id", "trace-from-vendor"),
        ]);
        assert_eq!(
            extract_trace_id(&with_fallback).as_deref(),
            Some("trace-from-vendor")
        );

        let alone = headers(&[("traceparent", "00-abc123-bbbbbbbbbbbbbbbb-01")]);
        assert_eq!(extract_trace_id(&alone), None);
    }

    #[test]
    fn test_non_hex_traceparent_field_is_rejected() {
        let headers = headers(&[(
            "traceparent",
            "00-zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz-bbbbbbbbbbbbbbbb-01",
        )]);
        assert_eq!(extract_trace_id(&headers), None);
    }

    #[test]
    fn test_b3_takes_precedence_over_x_trace_id() {
        let headers = headers(&[
            ("x-trace-id", "second-choice"),
            ("x-b3-traceid", "first-choice"),
        ]);
        assert_eq!(extract_trace_id(&headers).as_deref(), Some("first-choice"));
    }

    #[test]
    fn test_untagged_request_yields_none() {
        let headers = headers(&[("content-type", "application/json"), ("x-trace-id", "")]);
        assert_eq!(extract_trace_id(&headers), None);
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let headers = headers(&[("X-Trace-Id", "mixed-case")]);
        assert_eq!(extract_trace_id(&headers).as_deref(), Some("mixed-case"));
    }
}
