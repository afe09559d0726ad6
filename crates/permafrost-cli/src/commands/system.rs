//! Observation commands: live stream, health, topology.

use anyhow::Result;

use crate::client::PlaneClient;

/// Stream live trace events until the connection ends.
pub fn watch(plane: &str) -> Result<()> {
    let client = PlaneClient::connect(plane)?;
    println!("Watching trace events (Ctrl-C to stop)...");

    client.watch(|event| {
        if let Some(status) = event.attributes.get("freeze_status") {
            println!("[{}] trace {} {status}", event.timestamp, event.trace_id);
        } else {
            println!(
                "[{}] trace {} {} {}",
                event.timestamp, event.trace_id, event.service_name, event.endpoint
            );
        }
    })
}

/// Show control-plane and service health.
pub fn health(plane: &str) -> Result<()> {
    let mut client = PlaneClient::connect(plane)?;
    let response = client.system_health()?;

    println!("healthy: {}", response.healthy);
    for (component, status) in response.component_status {
        println!("  {component}: {status}");
    }
    Ok(())
}

/// Show the derived service topology.
pub fn topology(plane: &str) -> Result<()> {
    let mut client = PlaneClient::connect(plane)?;
    let response = client.topology()?;

    if response.links.is_empty() {
        println!("No topology observed yet");
        return Ok(());
    }
    for link in response.links {
        println!("{} -> {}", link.source, link.target);
    }
    Ok(())
}
