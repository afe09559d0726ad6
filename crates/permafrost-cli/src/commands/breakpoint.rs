//! Breakpoint management commands.

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use permafrost_daemon::protocol::messages::RegisterBreakpointRequest;

use crate::client::PlaneClient;

/// Register a breakpoint.
pub fn set(plane: &str, service: &str, endpoint: &str, conditions: &[String]) -> Result<()> {
    let conditions = parse_conditions(conditions)?;

    let mut client = PlaneClient::connect(plane)?;
    let response = client.register_breakpoint(RegisterBreakpointRequest {
        service_name: service.to_string(),
        endpoint: endpoint.to_string(),
        conditions,
    })?;

    if !response.success {
        bail!("Failed to register breakpoint: {}", response.message);
    }
    println!("Registered breakpoint {}", response.breakpoint_id);
    Ok(())
}

/// List registered breakpoints.
pub fn list(plane: &str) -> Result<()> {
    let mut client = PlaneClient::connect(plane)?;
    let response = client.list_breakpoints()?;

    if response.breakpoints.is_empty() {
        println!("No breakpoints registered");
        return Ok(());
    }

    for bp in response.breakpoints {
        let conditions = if bp.conditions.is_empty() {
            "(unconditional)".to_string()
        } else {
            bp.conditions
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let state = if bp.enabled { "enabled" } else { "disabled" };
        println!("{}  {} {}  {}  [{}]", bp.id, bp.service_name, bp.endpoint, conditions, state);
    }
    Ok(())
}

/// Delete a breakpoint.
pub fn delete(plane: &str, id: &str) -> Result<()> {
    let mut client = PlaneClient::connect(plane)?;
    let response = client.delete_breakpoint(id.to_string())?;

    if !response.success {
        bail!("Failed to delete '{id}': {}", response.message);
    }
    println!("Deleted breakpoint {id}");
    Ok(())
}

fn parse_conditions(raw: &[String]) -> Result<BTreeMap<String, String>> {
    let mut conditions = BTreeMap::new();
    for entry in raw {
        let Some((key, value)) = entry.split_once('=') else {
            bail!("invalid condition '{entry}': expected key=value");
        };
        conditions.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(conditions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_conditions_accepts_key_value_pairs() {
        let parsed = parse_conditions(&[
            "body.amount=999".to_string(),
            "header.user-type=vip".to_string(),
        ])
        .unwrap();
        assert_eq!(parsed.get("body.amount").unwrap(), "999");
        assert_eq!(parsed.get("header.user-type").unwrap(), "vip");
    }

    #[test]
    fn test_parse_conditions_keeps_equals_in_value() {
        let parsed = parse_conditions(&["query=a=b".to_string()]).unwrap();
        assert_eq!(parsed.get("query").unwrap(), "a=b");
    }

    #[test]
    fn test_parse_conditions_rejects_bare_keys() {
        assert!(parse_conditions(&["no-value".to_string()]).is_err());
    }
}
