//! permafrost - operator CLI for the control plane.
//!
//! Every subcommand maps 1:1 to a control RPC operation; `watch` holds the
//! connection open and prints the live trace stream.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod client;
mod commands;

/// permafrost - coordinated trace freezing for service meshes
#[derive(Parser, Debug)]
#[command(name = "permafrost")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Control plane RPC address
    #[arg(long, default_value = "127.0.0.1:50051", env = "PERMAFROST_CONTROL_ADDR")]
    plane: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    // === Breakpoints ===
    /// Breakpoint management
    #[command(subcommand)]
    Breakpoint(BreakpointCommands),

    // === Freeze lifecycle ===
    /// Freeze a trace across the mesh
    Freeze {
        /// Trace id to freeze
        trace_id: String,

        /// Service(s) the freeze is aimed at (repeatable)
        #[arg(long = "service")]
        services: Vec<String>,
    },

    /// Release a frozen trace
    Release {
        /// Trace id to release
        trace_id: String,

        /// Replacement request body applied before the request resumes
        #[arg(long)]
        override_body: Option<String>,
    },

    /// Show a freeze's status
    Status {
        /// Trace id to look up
        trace_id: String,
    },

    /// List active freezes
    #[command(alias = "ls")]
    Freezes,

    /// Release every active freeze immediately
    EmergencyRelease,

    // === Captured state ===
    /// Show the network snapshot captured for a trace
    Snapshot {
        /// Trace id to look up
        trace_id: String,
    },

    /// Show a trace's application checkpoints in hop order
    Journey {
        /// Trace id to look up
        trace_id: String,
    },

    // === Observation ===
    /// Stream live trace events until interrupted
    Watch,

    /// Control plane and service health
    Health,

    /// Derived service-to-service topology
    Topology,
}

#[derive(Subcommand, Debug)]
enum BreakpointCommands {
    /// Register a breakpoint
    Set {
        /// Target service name (matched exactly)
        service: String,

        /// Target endpoint fragment (matched as a substring)
        endpoint: String,

        /// Condition as key=value; repeatable. Keys address the unified
        /// keyspace: `amount`, `body.amount`, or `header.user-type`.
        #[arg(short, long = "condition")]
        conditions: Vec<String>,
    },

    /// List registered breakpoints
    #[command(alias = "ls")]
    List,

    /// Delete a breakpoint by id
    Delete {
        /// Breakpoint id
        id: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone())),
        )
        .init();

    match cli.command {
        Commands::Breakpoint(BreakpointCommands::Set {
            service,
            endpoint,
            conditions,
        }) => commands::breakpoint::set(&cli.plane, &service, &endpoint, &conditions),
        Commands::Breakpoint(BreakpointCommands::List) => commands::breakpoint::list(&cli.plane),
        Commands::Breakpoint(BreakpointCommands::Delete { id }) => {
            commands::breakpoint::delete(&cli.plane, &id)
        }
        Commands::Freeze { trace_id, services } => {
            commands::freeze::freeze(&cli.plane, trace_id, services)
        }
        Commands::Release {
            trace_id,
            override_body,
        } => commands::freeze::release(&cli.plane, trace_id, override_body),
        Commands::Status { trace_id } => commands::freeze::status(&cli.plane, trace_id),
        Commands::Freezes => commands::freeze::list(&cli.plane),
        Commands::EmergencyRelease => commands::freeze::emergency_release(&cli.plane),
        Commands::Snapshot { trace_id } => commands::snapshot::network(&cli.plane, trace_id),
        Commands::Journey { trace_id } => commands::snapshot::journey(&cli.plane, trace_id),
        Commands::Watch => commands::system::watch(&cli.plane),
        Commands::Health => commands::system::health(&cli.plane),
        Commands::Topology => commands::system::topology(&cli.plane),
    }
}
