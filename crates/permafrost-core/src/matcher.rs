//! Condition evaluation for breakpoint matching.
//!
//! A `/check` query carries the original request headers (as `x-orig-*`
//! mirrors) and the raw request body. This module folds both into a flat
//! `string -> string` keyspace and evaluates breakpoint conditions against
//! it.
//!
//! # Keyspace
//!
//! Three key shapes address the same data:
//!
//! - `header.<name>` - strictly the header with that (lowercased) name
//! - `body.<dotted.path>` - strictly the JSON body leaf at that path,
//!   arrays addressed by numeric index
//! - `<name>` / `<dotted.path>` - the short form; headers write it first,
//!   the body overwrites on collision, so `amount=999` tests the body when
//!   both a header and a body field are called `amount`
//!
//! A body that is not valid JSON contributes nothing; evaluation never
//! fails on malformed input.

use std::collections::HashMap;

use crate::breakpoint::Breakpoint;

/// Flat lookup table built from one `/check` query.
#[derive(Debug, Default)]
pub struct Keyspace {
    entries: HashMap<String, String>,
}

impl Keyspace {
    /// Builds the keyspace from original header pairs and the raw body.
    ///
    /// `headers` yields the original request header names (already stripped
    /// of the `x-orig-` transport prefix) with their values; names are
    /// lowercased on insertion. `body` is the verbatim request body and may
    /// be empty or non-JSON.
    #[must_use]
    pub fn build<'a, I>(headers: I, body: &[u8]) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut entries = HashMap::new();

        for (name, value) in headers {
            let name = name.to_ascii_lowercase();
            entries.insert(format!("header.{name}"), value.to_string());
            // Short key: first header wins for now; the body pass below
            // overwrites unconditionally.
            entries.entry(name).or_insert_with(|| value.to_string());
        }

        if let Ok(json) = serde_json::from_slice::<serde_json::Value>(body) {
            let mut flat = Vec::new();
            flatten_json(&json, String::new(), &mut flat);
            for (path, value) in flat {
                entries.insert(format!("body.{path}"), value.clone());
                entries.insert(path, value);
            }
        }

        Self { entries }
    }

    /// Looks up a condition key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Number of addressable keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the keyspace holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Flattens a JSON value into `(dotted-path, stringified-leaf)` pairs.
///
/// Objects concatenate keys with `.`, arrays use numeric indices, and
/// nulls are skipped entirely (there is no string form a condition could
/// name them by).
fn flatten_json(value: &serde_json::Value, prefix: String, out: &mut Vec<(String, String)>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_json(child, path, out);
            }
        }
        serde_json::Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                let path = if prefix.is_empty() {
                    index.to_string()
                } else {
                    format!("{prefix}.{index}")
                };
                flatten_json(child, path, out);
            }
        }
        serde_json::Value::String(s) => out.push((prefix, s.clone())),
        serde_json::Value::Number(n) => out.push((prefix, n.to_string())),
        serde_json::Value::Bool(b) => out.push((prefix, b.to_string())),
        serde_json::Value::Null => {}
    }
}

/// Evaluates breakpoints against one query and returns the first full match.
///
/// A breakpoint is eligible when it is enabled, its service equals the
/// query's service, and its endpoint is a substring of the query's
/// endpoint. Every condition must then hold exactly. At most one id is
/// returned per query; ordering among equally-matching breakpoints is
/// unspecified.
#[must_use]
pub fn find_match(
    breakpoints: &[Breakpoint],
    service: &str,
    endpoint: &str,
    keyspace: &Keyspace,
) -> Option<String> {
    for bp in breakpoints {
        if !bp.enabled || bp.service_name != service || !endpoint.contains(&bp.endpoint) {
            continue;
        }

        let satisfied = bp
            .conditions
            .iter()
            .all(|(key, expected)| keyspace.get(key) == Some(expected.as_str()));

        if satisfied {
            tracing::info!(
                breakpoint_id = %bp.id,
                service = %service,
                endpoint = %endpoint,
                "Breakpoint conditions satisfied"
            );
            return Some(bp.id.clone());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::*;

    fn breakpoint(service: &str, endpoint: &str, conditions: &[(&str, &str)]) -> Breakpoint {
        Breakpoint {
            id: "bp-test".to_string(),
            service_name: service.to_string(),
            endpoint: endpoint.to_string(),
            conditions: conditions
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect::<BTreeMap<_, _>>(),
            enabled: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_keyspace_header_keys() {
        let keyspace = Keyspace::build([("User-Type", "vip")], b"");

        assert_eq!(keyspace.get("header.user-type"), Some("vip"));
        assert_eq!(keyspace.get("user-type"), Some("vip"));
        assert_eq!(keyspace.get("header.User-Type"), None);
    }

    #[test]
    fn test_keyspace_flattens_nested_body() {
        let body = br#"{"order":{"items":[{"sku":"A-1"},{"sku":"B-2"}],"amount":999}}"#;
        let keyspace = Keyspace::build([], body);

        assert_eq!(keyspace.get("body.order.amount"), Some("999"));
        assert_eq!(keyspace.get("body.order.items.1.sku"), Some("B-2"));
        assert_eq!(keyspace.get("order.items.0.sku"), Some("A-1"));
    }

    #[test]
    fn test_body_wins_short_key_collision() {
        let keyspace = Keyspace::build([("amount", "1")], br#"{"amount":999}"#);

        assert_eq!(keyspace.get("amount"), Some("999"));
        assert_eq!(keyspace.get("header.amount"), Some("1"));
        assert_eq!(keyspace.get("body.amount"), Some("999"));
    }

    #[test]
    fn test_non_json_body_contributes_nothing() {
        let keyspace = Keyspace::build([("x", "1")], b"not json at all");
        assert_eq!(keyspace.get("body.x"), None);
        assert_eq!(keyspace.get("x"), Some("1"));
    }

    #[test]
    fn test_match_requires_every_condition() {
        let bp = breakpoint(
            "service-a",
            "/order",
            &[("body.amount", "999"), ("header.user-type", "vip")],
        );
        let partial = Keyspace::build([("user-type", "vip")], br#"{"amount":1}"#);
        let full = Keyspace::build([("user-type", "vip")], br#"{"amount":999}"#);

        assert_eq!(find_match(&[bp.clone()], "service-a", "/order", &partial), None);
        assert_eq!(
            find_match(&[bp], "service-a", "/order", &full),
            Some("bp-test".to_string())
        );
    }

    #[test]
    fn test_endpoint_is_substring_matched() {
        let bp = breakpoint("service-a", "/order", &[]);
        let keyspace = Keyspace::build([], b"{}");

        assert!(find_match(&[bp.clone()], "service-a", "/api/order/123", &keyspace).is_some());
        assert!(find_match(&[bp], "service-a", "/payments", &keyspace).is_none());
    }

    #[test]
    fn test_disabled_and_foreign_service_breakpoints_are_skipped() {
        let mut disabled = breakpoint("service-a", "/order", &[]);
        disabled.enabled = false;
        let foreign = breakpoint("service-b", "/order", &[]);
        let keyspace = Keyspace::build([], b"{}");

        assert!(find_match(&[disabled, foreign], "service-a", "/order", &keyspace).is_none());
    }

    #[test]
    fn test_missing_condition_key_never_matches() {
        let bp = breakpoint("service-a", "/order", &[("body.x", "1")]);
        let keyspace = Keyspace::build([], b"not json");

        assert_eq!(find_match(&[bp], "service-a", "/order", &keyspace), None);
    }
}
