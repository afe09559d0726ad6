//! Freeze lifecycle commands.

use anyhow::{Result, bail};

use crate::client::PlaneClient;

/// Manually freeze a trace.
pub fn freeze(plane: &str, trace_id: String, services: Vec<String>) -> Result<()> {
    let mut client = PlaneClient::connect(plane)?;
    let response = client.freeze_trace(trace_id.clone(), services)?;

    if !response.success {
        bail!("Failed to freeze '{trace_id}': {}", response.message);
    }
    println!("Trace {trace_id} is {}", response.state);
    Ok(())
}

/// Release a frozen trace, optionally replacing its request body.
pub fn release(plane: &str, trace_id: String, override_body: Option<String>) -> Result<()> {
    let mut client = PlaneClient::connect(plane)?;
    let with_override = override_body.is_some();
    let response = client.release_trace(trace_id.clone(), override_body.unwrap_or_default())?;

    if !response.success {
        bail!("Failed to release '{trace_id}': {}", response.message);
    }
    if with_override {
        println!("Released {trace_id} with body override");
    } else {
        println!("Released {trace_id}");
    }
    Ok(())
}

/// Show one freeze's status.
pub fn status(plane: &str, trace_id: String) -> Result<()> {
    let mut client = PlaneClient::connect(plane)?;
    let response = client.freeze_status(trace_id)?;

    println!("trace:     {}", response.trace_id);
    println!("state:     {}", response.state);
    if response.state != "not_found" {
        println!("origin:    {}", response.origin);
        println!("services:  {}", response.services.join(", "));
        if response.frozen_at > 0 {
            println!("frozen_at: {} (unix)", response.frozen_at);
        }
    }
    Ok(())
}

/// List active freezes.
pub fn list(plane: &str) -> Result<()> {
    let mut client = PlaneClient::connect(plane)?;
    let response = client.list_active_freezes()?;

    if response.freezes.is_empty() {
        println!("No active freezes");
        return Ok(());
    }

    for freeze in response.freezes {
        println!(
            "{}  {}  origin={}  services=[{}]",
            freeze.trace_id,
            freeze.state,
            freeze.origin,
            freeze.services.join(", ")
        );
    }
    Ok(())
}

/// Release every active freeze.
pub fn emergency_release(plane: &str) -> Result<()> {
    let mut client = PlaneClient::connect(plane)?;
    let response = client.emergency_release()?;

    println!("{} ({} released)", response.message, response.freed_count);
    Ok(())
}
