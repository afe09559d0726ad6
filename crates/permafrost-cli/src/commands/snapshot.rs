//! Captured-state commands.

use anyhow::{Result, bail};

use crate::client::PlaneClient;

/// Show the network snapshot captured for a trace.
pub fn network(plane: &str, trace_id: String) -> Result<()> {
    let mut client = PlaneClient::connect(plane)?;
    let response = client.get_snapshot(trace_id.clone())?;

    if !response.success {
        bail!("No snapshot for '{trace_id}': {}", response.message);
    }
    let snapshot = response
        .snapshot
        .ok_or_else(|| anyhow::anyhow!("control plane sent success without a snapshot"))?;

    println!("trace:   {}", snapshot.trace_id);
    println!("service: {}", snapshot.service_name);
    println!("request: {}", snapshot.method);
    println!("body:    {}", render_body(&snapshot.body));
    Ok(())
}

/// Show a trace's application checkpoints in hop order.
pub fn journey(plane: &str, trace_id: String) -> Result<()> {
    let mut client = PlaneClient::connect(plane)?;
    let response = client.get_app_snapshot(trace_id.clone())?;

    if !response.success {
        bail!("No application snapshots for '{trace_id}'");
    }

    for (hop, snapshot) in response.snapshots.iter().enumerate() {
        println!(
            "[{hop}] {} @ {} ({})",
            snapshot.service_name, snapshot.checkpoint, snapshot.timestamp
        );
        for (name, value) in &snapshot.local_variables {
            println!("      {name} = {value}");
        }
        if !snapshot.stack_trace.is_empty() {
            println!("      stack: {}", snapshot.stack_trace.lines().next().unwrap_or_default());
        }
    }
    Ok(())
}

/// Normalizes JSON bodies for display, passing non-JSON through verbatim.
fn render_body(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .map_or_else(|_| body.to_string(), |value| value.to_string())
}
